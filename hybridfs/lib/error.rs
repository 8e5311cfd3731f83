use std::{
    io,
    path::{Path, PathBuf},
};

use nix::errno::Errno;
use thiserror::Error;

use crate::SessionId;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a union filesystem operation.
pub type HybridResult<T> = Result<T, HybridError>;

/// An error that occurred during a union filesystem operation.
///
/// Errors that come from the operating system remember their native error code so that a bridge
/// can hand the exact code back to its client with [`HybridError::to_reply_code`].
#[derive(pretty_error_debug::Debug, Error)]
pub enum HybridError {
    /// The path does not exist
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    /// Insufficient permissions to perform the operation
    #[error("insufficient permissions for operation on: {path} ({errno})")]
    PermissionDenied {
        /// The path the operation was attempted on
        path: PathBuf,

        /// Either `EACCES` or `EPERM`
        errno: Errno,
    },

    /// The path already exists
    #[error("path already exists: {0}")]
    AlreadyExists(PathBuf),

    /// The path is not a directory
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The path is a directory
    #[error("path is a directory: {0}")]
    IsADirectory(PathBuf),

    /// The directory is not empty
    #[error("directory is not empty: {0}")]
    NotEmpty(PathBuf),

    /// The resolved physical path is longer than allowed
    #[error("path exceeds {max} bytes: {path}")]
    PathTooLong {
        /// The path that was rejected
        path: PathBuf,

        /// The maximum number of bytes allowed
        max: usize,
    },

    /// No space left on the backing device
    #[error("no space left on device: {0}")]
    NoSpace(PathBuf),

    /// Any other failure reported by the operating system
    #[error("io error on {path}: {errno}")]
    Io {
        /// The path the operation was attempted on
        path: PathBuf,

        /// The native error code
        errno: Errno,
    },

    /// Invalid path component (e.g. "..")
    #[error("invalid path component: {0}")]
    InvalidPathComponent(String),

    /// The session id does not belong to an open session
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The union filesystem requires at least one backing root
    #[error("union filesystem requires at least one backing root")]
    RequiresAtLeastOneRoot,

    /// A backing root does not exist or cannot be canonicalized
    #[error("backing root does not exist: {0}")]
    RootNotFound(PathBuf),

    /// A backing root is not a directory
    #[error("backing root is not a directory: {0}")]
    RootNotADirectory(PathBuf),

    /// A backing root cannot be read by the current user
    #[error("backing root is not readable: {0}")]
    RootNotReadable(PathBuf),

    /// The mount point does not exist
    #[error("mount point does not exist: {0}")]
    MountPointNotFound(PathBuf),

    /// The mount point is not a directory
    #[error("mount point is not a directory: {0}")]
    MountPointNotADirectory(PathBuf),

    /// The mount point is not an empty directory
    #[error("mount point is not empty: {0}")]
    MountPointNotEmpty(PathBuf),

    /// Any other invalid startup configuration
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HybridError {
    /// Classifies a native error code reported for `path`.
    pub fn from_errno(errno: Errno, path: impl Into<PathBuf>) -> HybridError {
        let path = path.into();
        match errno {
            Errno::ENOENT => HybridError::NotFound(path),
            Errno::EACCES | Errno::EPERM => HybridError::PermissionDenied { path, errno },
            Errno::EEXIST => HybridError::AlreadyExists(path),
            Errno::ENOTDIR => HybridError::NotADirectory(path),
            Errno::EISDIR => HybridError::IsADirectory(path),
            Errno::ENOTEMPTY => HybridError::NotEmpty(path),
            Errno::ENAMETOOLONG => HybridError::PathTooLong {
                path,
                max: crate::DEFAULT_MAX_PATH_LEN,
            },
            Errno::ENOSPC => HybridError::NoSpace(path),
            errno => HybridError::Io { path, errno },
        }
    }

    /// Classifies an [`io::Error`] reported for `path`.
    ///
    /// Errors without a native code (for example a path containing an interior NUL byte) are
    /// mapped to the closest code.
    pub fn from_io(error: io::Error, path: impl AsRef<Path>) -> HybridError {
        let path = path.as_ref();
        match error.raw_os_error() {
            Some(code) => HybridError::from_errno(Errno::from_raw(code), path),
            None => match error.kind() {
                io::ErrorKind::NotFound => HybridError::NotFound(path.to_path_buf()),
                io::ErrorKind::InvalidInput => HybridError::from_errno(Errno::EINVAL, path),
                _ => HybridError::from_errno(Errno::EIO, path),
            },
        }
    }

    /// Returns the native error code a bridge should report for this error.
    pub fn errno(&self) -> Errno {
        match self {
            HybridError::NotFound(_) => Errno::ENOENT,
            HybridError::PermissionDenied { errno, .. } => *errno,
            HybridError::AlreadyExists(_) => Errno::EEXIST,
            HybridError::NotADirectory(_) => Errno::ENOTDIR,
            HybridError::IsADirectory(_) => Errno::EISDIR,
            HybridError::NotEmpty(_) => Errno::ENOTEMPTY,
            HybridError::PathTooLong { .. } => Errno::ENAMETOOLONG,
            HybridError::NoSpace(_) => Errno::ENOSPC,
            HybridError::Io { errno, .. } => *errno,
            HybridError::InvalidPathComponent(_) => Errno::EINVAL,
            HybridError::UnknownSession(_) => Errno::EBADF,
            HybridError::RequiresAtLeastOneRoot
            | HybridError::RootNotFound(_)
            | HybridError::RootNotADirectory(_)
            | HybridError::RootNotReadable(_)
            | HybridError::MountPointNotFound(_)
            | HybridError::MountPointNotADirectory(_)
            | HybridError::MountPointNotEmpty(_)
            | HybridError::Configuration(_) => Errno::EINVAL,
        }
    }

    /// Returns the negative error code expected by callback-style filesystem bridges.
    pub fn to_reply_code(&self) -> i32 {
        -(self.errno() as i32)
    }

    /// Returns `true` if the error comes from invalid startup arguments.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HybridError::RequiresAtLeastOneRoot
                | HybridError::RootNotFound(_)
                | HybridError::RootNotADirectory(_)
                | HybridError::RootNotReadable(_)
                | HybridError::MountPointNotFound(_)
                | HybridError::MountPointNotADirectory(_)
                | HybridError::MountPointNotEmpty(_)
                | HybridError::Configuration(_)
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_round_trips_through_classification() {
        for errno in [
            Errno::ENOENT,
            Errno::EACCES,
            Errno::EPERM,
            Errno::EEXIST,
            Errno::ENOTDIR,
            Errno::EISDIR,
            Errno::ENOTEMPTY,
            Errno::ENAMETOOLONG,
            Errno::ENOSPC,
            Errno::EXDEV,
            Errno::ENODATA,
            Errno::EROFS,
        ] {
            let error = HybridError::from_errno(errno, "/a");
            assert_eq!(error.errno(), errno, "classification of {errno} lost its code");
            assert_eq!(error.to_reply_code(), -(errno as i32));
        }
    }

    #[test]
    fn test_from_errno_picks_taxonomy_variant() {
        assert!(matches!(
            HybridError::from_errno(Errno::ENOENT, "/a"),
            HybridError::NotFound(_)
        ));
        assert!(matches!(
            HybridError::from_errno(Errno::EPERM, "/a"),
            HybridError::PermissionDenied {
                errno: Errno::EPERM,
                ..
            }
        ));
        assert!(matches!(
            HybridError::from_errno(Errno::EXDEV, "/a"),
            HybridError::Io {
                errno: Errno::EXDEV,
                ..
            }
        ));
    }

    #[test]
    fn test_from_io_without_native_code() {
        let error = HybridError::from_io(io::Error::new(io::ErrorKind::InvalidInput, "nul"), "/a");
        assert_eq!(error.errno(), Errno::EINVAL);

        let error = HybridError::from_io(io::Error::other("boom"), "/a");
        assert_eq!(error.errno(), Errno::EIO);

        let error = HybridError::from_io(io::Error::from_raw_os_error(libc::ENOENT), "/a");
        assert!(matches!(error, HybridError::NotFound(path) if path == Path::new("/a")));
    }

    #[test]
    fn test_configuration_errors() {
        assert!(HybridError::RequiresAtLeastOneRoot.is_configuration());
        assert!(HybridError::MountPointNotEmpty(PathBuf::from("/mnt")).is_configuration());
        assert!(!HybridError::NotFound(PathBuf::from("/a")).is_configuration());
        assert_eq!(HybridError::RequiresAtLeastOneRoot.errno(), Errno::EINVAL);
        assert_eq!(
            HybridError::UnknownSession(SessionId::from(7)).errno(),
            Errno::EBADF
        );
    }
}
