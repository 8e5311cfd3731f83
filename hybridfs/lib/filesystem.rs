use std::{
    ffi::{OsStr, OsString},
    fs::Metadata,
    path::{Path, PathBuf},
};

use nix::{fcntl::OFlag, sys::statvfs::Statvfs, unistd::AccessFlags};

use crate::{DirEntry, HybridResult, NodeKind, SessionId, TimeUpdate, XattrFlags};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The callback contract between a user-space filesystem bridge and a union filesystem.
///
/// A bridge receives requests from the kernel, calls the matching method with a slash-rooted
/// virtual path (relative to the mount point) or with a [`SessionId`] it obtained earlier, and
/// turns the result into a reply. Errors carry the native error code to reply with, see
/// [`HybridError::to_reply_code`][crate::HybridError::to_reply_code].
///
/// Methods may be called concurrently from several threads. A bridge never issues concurrent I/O
/// through the same session.
pub trait UnionFileSystem {
    /// Gets the attributes of the object at `path` without following a final symlink.
    ///
    /// ## Errors
    ///
    /// Returns the error of the lowest-priority root if no root has the object.
    fn getattr(&self, path: &Path) -> HybridResult<Metadata>;

    /// Gets the attributes of the object behind an open session.
    ///
    /// The union root has no single physical identity, so for `/` this behaves like
    /// [`getattr`][Self::getattr] regardless of the session.
    fn fgetattr(&self, path: &Path, session: SessionId) -> HybridResult<Metadata>;

    /// Reads the target of the symlink at `path`.
    fn readlink(&self, path: &Path) -> HybridResult<PathBuf>;

    /// Checks whether the caller may access `path` with the given mask.
    fn access(&self, path: &Path, mask: AccessFlags) -> HybridResult<()>;

    /// Gets usage statistics of the filesystem holding `path`.
    fn statfs(&self, path: &Path) -> HybridResult<Statvfs>;

    /// Creates a non-directory, non-symlink node at `path`.
    ///
    /// ## Arguments
    ///
    /// * `path` - The path of the new node
    /// * `kind` - The type of node to create
    /// * `mode` - The permission bits of the new node
    ///
    /// ## Errors
    ///
    /// Returns an error if no root accepts the creation, for example because the parent
    /// directory exists nowhere or the node already exists in every root that has the parent.
    fn mknod(&self, path: &Path, kind: NodeKind, mode: u32) -> HybridResult<()>;

    /// Creates a directory at `path` in the first root that accepts it.
    fn mkdir(&self, path: &Path, mode: u32) -> HybridResult<()>;

    /// Removes the highest-priority file at `path`.
    ///
    /// Copies of the file in lower-priority roots stay in place and become visible.
    fn unlink(&self, path: &Path) -> HybridResult<()>;

    /// Removes the highest-priority empty directory at `path`.
    fn rmdir(&self, path: &Path) -> HybridResult<()>;

    /// Creates a symlink at `link` pointing to `target`.
    ///
    /// An absolute `target` is a union path and is resolved in the same root as `link`. A
    /// relative target is stored as given.
    fn symlink(&self, target: &Path, link: &Path) -> HybridResult<()>;

    /// Renames `from` to `to` inside a single root.
    ///
    /// ## Errors
    ///
    /// Returns an error if no root has both the source and the destination parent. The rename is
    /// never carried out across two roots.
    fn rename(&self, from: &Path, to: &Path) -> HybridResult<()>;

    /// Creates a hard link `to` of the file `from` inside a single root.
    fn link(&self, from: &Path, to: &Path) -> HybridResult<()>;

    /// Changes the permission bits of `path`.
    fn chmod(&self, path: &Path, mode: u32) -> HybridResult<()>;

    /// Changes the owner and group of `path`. `None` leaves the id unchanged.
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> HybridResult<()>;

    /// Changes the size of the file at `path`.
    fn truncate(&self, path: &Path, size: u64) -> HybridResult<()>;

    /// Changes the access and modification times of `path`.
    fn utimens(&self, path: &Path, atime: TimeUpdate, mtime: TimeUpdate) -> HybridResult<()>;

    /// Opens the file at `path` and pins the new session to the root that produced it.
    ///
    /// ## Arguments
    ///
    /// * `path` - The path of the file to open
    /// * `flags` - The open flags; creation flags are not expected here
    fn open(&self, path: &Path, flags: OFlag) -> HybridResult<SessionId>;

    /// Creates and opens a file at `path` in the first root that accepts it.
    fn create(&self, path: &Path, mode: u32, flags: OFlag) -> HybridResult<SessionId>;

    /// Reads up to `size` bytes at `offset` from an open file.
    ///
    /// Fewer bytes are returned only at end of file.
    fn read(&self, session: SessionId, offset: u64, size: usize) -> HybridResult<Vec<u8>>;

    /// Writes `data` at `offset` to an open file and returns the number of bytes written.
    fn write(&self, session: SessionId, offset: u64, data: &[u8]) -> HybridResult<usize>;

    /// Changes the size of an open file.
    fn ftruncate(&self, session: SessionId, size: u64) -> HybridResult<()>;

    /// Flushes cached data of an open file. There is no cache, so this always succeeds.
    fn flush(&self, session: SessionId) -> HybridResult<()>;

    /// Synchronizes an open file with its storage. With `datasync` only the contents are synced.
    fn fsync(&self, session: SessionId, datasync: bool) -> HybridResult<()>;

    /// Closes an open file. Failures are logged, never reported.
    fn release(&self, session: SessionId);

    /// Opens the directory at `path` and pins the new session to the root that produced it.
    fn opendir(&self, path: &Path) -> HybridResult<SessionId>;

    /// Lists the directory at `path` across every root, in priority order.
    ///
    /// The whole listing is produced in one call. Whether a name present in several roots is
    /// listed once or once per root depends on the configured
    /// [`ReaddirPolicy`][crate::ReaddirPolicy].
    fn readdir(&self, path: &Path) -> HybridResult<Vec<DirEntry>>;

    /// Closes an open directory. Failures are logged, never reported.
    fn releasedir(&self, session: SessionId);

    /// Synchronizes an open directory. This always succeeds.
    fn fsyncdir(&self, session: SessionId, datasync: bool) -> HybridResult<()>;

    /// Sets the extended attribute `name` of `path`.
    fn setxattr(
        &self,
        path: &Path,
        name: &OsStr,
        value: &[u8],
        flags: XattrFlags,
    ) -> HybridResult<()>;

    /// Gets the value of the extended attribute `name` of `path`.
    fn getxattr(&self, path: &Path, name: &OsStr) -> HybridResult<Vec<u8>>;

    /// Lists the extended attribute names of `path`.
    fn listxattr(&self, path: &Path) -> HybridResult<Vec<OsString>>;

    /// Removes the extended attribute `name` of `path`.
    fn removexattr(&self, path: &Path, name: &OsStr) -> HybridResult<()>;
}
