use std::{
    os::unix::ffi::OsStrExt,
    path::{Component, Path, PathBuf},
};

use getset::{CopyGetters, Getters};

use crate::{HybridError, HybridResult, RootIndex, RootRegistry};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Maps virtual paths onto the physical namespace of a backing root.
///
/// A virtual path names the same relative location in every root, so resolving it is a checked
/// join of the root path and the path's normal components. The join never truncates: a result
/// longer than `max_path_len` is rejected with [`HybridError::PathTooLong`].
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct PathResolver {
    /// The backing roots to resolve against.
    #[getset(get = "pub with_prefix")]
    registry: RootRegistry,

    /// The maximum length in bytes of a physical path, counting the trailing NUL.
    #[getset(get_copy = "pub with_prefix")]
    max_path_len: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PathResolver {
    /// Creates a resolver over `registry` that rejects physical paths of `max_path_len` bytes or
    /// more.
    pub fn new(registry: RootRegistry, max_path_len: usize) -> Self {
        Self {
            registry,
            max_path_len,
        }
    }

    /// Builds the physical path of `virtual_path` inside the root at `index`.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - `index` does not name a root
    /// - The virtual path has a `..` component
    /// - The physical path would exceed the maximum length
    pub fn physical_path(&self, virtual_path: &Path, index: RootIndex) -> HybridResult<PathBuf> {
        let mut physical = self.registry.resolve(index)?.get_path().clone();
        let mut named = false;
        for component in virtual_path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(segment) => {
                    physical.push(segment);
                    named = true;
                }
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(HybridError::InvalidPathComponent(
                        component.as_os_str().to_string_lossy().into_owned(),
                    ));
                }
            }
        }

        // A trailing separator asks the kernel for a directory; keep it.
        if named && virtual_path.as_os_str().as_bytes().ends_with(b"/") {
            physical.push("");
        }

        self.check_len(virtual_path, physical)
    }

    /// Builds the stored target of a symlink whose union target is the absolute `target`.
    ///
    /// The target is text, not a lookup, so it is prefixed with the root path as written,
    /// `..` components included. Only the length is checked.
    pub fn target_path(&self, target: &Path, index: RootIndex) -> HybridResult<PathBuf> {
        let root = self.registry.resolve(index)?;
        let mut physical = root.get_path().as_os_str().to_os_string();
        if !target.as_os_str().as_bytes().starts_with(b"/") {
            physical.push("/");
        }
        physical.push(target.as_os_str());

        self.check_len(target, PathBuf::from(physical))
    }

    /// Checks a virtual path used as-is, without joining it to any root.
    pub fn direct_path(&self, virtual_path: &Path) -> HybridResult<PathBuf> {
        self.check_len(virtual_path, virtual_path.to_path_buf())
    }

    fn check_len(&self, virtual_path: &Path, physical: PathBuf) -> HybridResult<PathBuf> {
        // The kernel counts the terminating NUL against PATH_MAX.
        if physical.as_os_str().len() + 1 > self.max_path_len {
            return Err(HybridError::PathTooLong {
                path: virtual_path.to_path_buf(),
                max: self.max_path_len,
            });
        }

        Ok(physical)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
