use std::{
    collections::HashSet,
    ffi::{CString, OsStr, OsString},
    fs::{DirBuilder, File, Metadata, OpenOptions, Permissions},
    io,
    os::unix::{
        ffi::OsStrExt,
        fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt},
    },
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};

use getset::{CopyGetters, Getters};
use nix::{
    dir::Dir,
    errno::Errno,
    fcntl::OFlag,
    sys::{
        stat::{Mode, SFlag, UtimensatFlags},
        statvfs::Statvfs,
        time::TimeSpec,
    },
    unistd::{AccessFlags, Gid, Uid},
};

use crate::{
    DirEntry, Dispatched, DirectorySession, FallbackDispatcher, FileKind, FileSession,
    HybridConfig, HybridError, HybridResult, NodeKind, OpenStrategy, PathResolver, ReaddirPolicy,
    RootRegistry, Session, SessionId, SessionOrigin, SessionTable, TimeUpdate, UnionFileSystem,
    XattrFlags,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A union filesystem that overlays several backing directory trees.
///
/// ## Priority
///
/// Roots are given highest priority first. Every path-based operation is tried against the roots
/// in that order and the first root that succeeds serves the request:
///
/// ```
/// use std::path::Path;
/// use hybridfs::{HybridConfig, HybridFileSystem, UnionFileSystem};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let upper = tempfile::tempdir()?;
/// let lower = tempfile::tempdir()?;
/// std::fs::write(upper.path().join("a"), b"x")?;
/// std::fs::write(lower.path().join("a"), b"yy")?;
///
/// let fs = HybridFileSystem::new(HybridConfig::new([upper.path(), lower.path()]))?;
///
/// // The upper copy shadows the lower one
/// assert_eq!(fs.getattr(Path::new("/a"))?.len(), 1);
///
/// // Removing it uncovers the lower copy
/// fs.unlink(Path::new("/a"))?;
/// assert_eq!(fs.getattr(Path::new("/a"))?.len(), 2);
/// # Ok(())
/// # }
/// ```
///
/// ## Creation
///
/// New objects land in the first root that accepts the creation, which in practice is the
/// highest-priority root whose copy of the parent directory is writable.
///
/// ## Sessions
///
/// `open`, `opendir` and `create` return a [`SessionId`]. The session stays bound to the physical
/// object it was opened on: reads and writes through it never consult the roots again, even if a
/// higher-priority root later gains an object at the same path.
///
/// ## Non-goals
///
/// There is no copy-up, no whiteout handling, no cache and no attempt to keep the roots
/// consistent with each other. Each root's own on-disk state is authoritative.
#[derive(Debug, Getters, CopyGetters)]
pub struct HybridFileSystem {
    /// Applies path-based operations to the roots.
    #[getset(get = "pub with_prefix")]
    dispatcher: FallbackDispatcher,

    /// The open sessions.
    #[getset(get = "pub with_prefix")]
    sessions: SessionTable,

    /// How directory listings are combined.
    #[getset(get_copy = "pub with_prefix")]
    readdir_policy: ReaddirPolicy,

    /// How sessions are opened.
    #[getset(get_copy = "pub with_prefix")]
    open_strategy: OpenStrategy,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HybridFileSystem {
    /// Creates a union filesystem from its configuration.
    ///
    /// ## Errors
    ///
    /// Returns a configuration error if there is no root or a root is not an existing directory.
    pub fn new(config: HybridConfig) -> HybridResult<Self> {
        let registry = RootRegistry::new(config.get_roots())?;
        for root in registry.iter() {
            tracing::info!(
                root = %root.get_index(),
                path = %root.get_path().display(),
                "registered backing root"
            );
        }

        let resolver = PathResolver::new(registry, config.get_max_path_len());
        Ok(Self {
            dispatcher: FallbackDispatcher::new(resolver),
            sessions: SessionTable::new(),
            readdir_policy: config.get_readdir_policy(),
            open_strategy: config.get_open_strategy(),
        })
    }

    /// Returns the backing roots.
    pub fn get_registry(&self) -> &RootRegistry {
        self.dispatcher.registry()
    }

    /// Finds the root that serves `path`, together with the object's attributes.
    pub fn which(&self, path: &Path) -> HybridResult<Dispatched<Metadata>> {
        self.dispatcher.try_each_root("getattr", path, lstat)
    }

    /// Returns the session with the given id.
    pub fn session(&self, session: SessionId) -> HybridResult<Arc<Session>> {
        self.sessions.get(session)
    }

    /// Opens `path` with `open`, first as given when the strategy asks for it, then in each root.
    fn open_session(
        &self,
        op: &'static str,
        path: &Path,
        open: impl Fn(&Path) -> HybridResult<File>,
        wrap: impl FnOnce(File, SessionOrigin) -> Session,
    ) -> HybridResult<SessionId> {
        if self.open_strategy == OpenStrategy::Passthrough {
            match self
                .dispatcher
                .get_resolver()
                .direct_path(path)
                .and_then(|direct| open(&direct))
            {
                Ok(file) => return Ok(self.pin(op, wrap(file, SessionOrigin::Direct))),
                Err(error) => tracing::trace!(
                    op,
                    path = %path.display(),
                    %error,
                    "direct open failed, scanning roots"
                ),
            }
        }

        let opened = self.dispatcher.try_each_root(op, path, open)?;
        let origin = SessionOrigin::Root(opened.get_root());
        Ok(self.pin(op, wrap(opened.into_value(), origin)))
    }

    fn pin(&self, op: &'static str, session: Session) -> SessionId {
        let path = session.path().to_path_buf();
        let origin = session.origin();
        let id = self.sessions.insert(session);
        tracing::debug!(op, session = %id, ?origin, path = %path.display(), "session opened");
        id
    }

    fn close_session(&self, op: &'static str, session: SessionId) {
        let Some(entry) = self.sessions.remove(session) else {
            tracing::warn!(op, %session, "release of unknown session ignored");
            return;
        };

        match Arc::try_unwrap(entry) {
            Ok(entry) => {
                if let Err(error) = entry.close() {
                    tracing::warn!(op, %session, %error, "closing session failed");
                } else {
                    tracing::debug!(op, %session, "session closed");
                }
            }
            // Another thread still holds the session; the handle closes when it lets go.
            Err(_) => tracing::debug!(op, %session, "session detached while in use"),
        }
    }

    fn file_session(&self, session: SessionId) -> HybridResult<Arc<Session>> {
        let entry = self.sessions.get(session)?;
        entry.as_file()?;
        Ok(entry)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl UnionFileSystem for HybridFileSystem {
    fn getattr(&self, path: &Path) -> HybridResult<Metadata> {
        self.which(path).map(Dispatched::into_value)
    }

    fn fgetattr(&self, path: &Path, session: SessionId) -> HybridResult<Metadata> {
        if is_union_root(path) {
            return self.getattr(path);
        }

        let entry = self.sessions.get(session)?;
        entry
            .handle()
            .metadata()
            .map_err(|e| HybridError::from_io(e, entry.path()))
    }

    fn readlink(&self, path: &Path) -> HybridResult<PathBuf> {
        self.dispatcher
            .try_each_root("readlink", path, |physical| {
                std::fs::read_link(physical).map_err(io_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn access(&self, path: &Path, mask: AccessFlags) -> HybridResult<()> {
        self.dispatcher
            .try_each_root("access", path, |physical| {
                nix::unistd::access(physical, mask).map_err(os_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn statfs(&self, path: &Path) -> HybridResult<Statvfs> {
        self.dispatcher
            .try_each_root("statfs", path, |physical| {
                nix::sys::statvfs::statvfs(physical).map_err(os_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn mknod(&self, path: &Path, kind: NodeKind, mode: u32) -> HybridResult<()> {
        let perm = Mode::from_bits_truncate(mode);
        self.dispatcher
            .try_each_root("mknod", path, |physical| match kind {
                NodeKind::Regular => OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(perm.bits())
                    .open(physical)
                    .map(drop)
                    .map_err(io_error(physical)),
                NodeKind::Fifo => nix::unistd::mkfifo(physical, perm).map_err(os_error(physical)),
                NodeKind::CharDevice(dev) => {
                    nix::sys::stat::mknod(physical, SFlag::S_IFCHR, perm, dev)
                        .map_err(os_error(physical))
                }
                NodeKind::BlockDevice(dev) => {
                    nix::sys::stat::mknod(physical, SFlag::S_IFBLK, perm, dev)
                        .map_err(os_error(physical))
                }
                NodeKind::Socket => nix::sys::stat::mknod(physical, SFlag::S_IFSOCK, perm, 0)
                    .map_err(os_error(physical)),
            })
            .map(Dispatched::into_value)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> HybridResult<()> {
        self.dispatcher
            .try_each_root("mkdir", path, |physical| {
                DirBuilder::new()
                    .mode(mode)
                    .create(physical)
                    .map_err(io_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn unlink(&self, path: &Path) -> HybridResult<()> {
        self.dispatcher
            .try_each_root("unlink", path, |physical| {
                std::fs::remove_file(physical).map_err(io_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn rmdir(&self, path: &Path) -> HybridResult<()> {
        self.dispatcher
            .try_each_root("rmdir", path, |physical| {
                std::fs::remove_dir(physical).map_err(io_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn symlink(&self, target: &Path, link: &Path) -> HybridResult<()> {
        let resolver = self.dispatcher.get_resolver();
        self.dispatcher
            .try_each_root_at("symlink", link, |index, link| {
                let stored = if target.has_root() {
                    resolver.target_path(target, index)?
                } else {
                    target.to_path_buf()
                };

                std::os::unix::fs::symlink(&stored, link).map_err(io_error(link))
            })
            .map(Dispatched::into_value)
    }

    fn rename(&self, from: &Path, to: &Path) -> HybridResult<()> {
        self.dispatcher
            .try_each_root_pair("rename", from, to, |from, to| {
                std::fs::rename(from, to).map_err(io_error(from))
            })
            .map(Dispatched::into_value)
    }

    fn link(&self, from: &Path, to: &Path) -> HybridResult<()> {
        self.dispatcher
            .try_each_root_pair("link", from, to, |from, to| {
                std::fs::hard_link(from, to).map_err(io_error(from))
            })
            .map(Dispatched::into_value)
    }

    fn chmod(&self, path: &Path, mode: u32) -> HybridResult<()> {
        self.dispatcher
            .try_each_root("chmod", path, |physical| {
                std::fs::set_permissions(physical, Permissions::from_mode(mode))
                    .map_err(io_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> HybridResult<()> {
        let uid = uid.map(Uid::from_raw);
        let gid = gid.map(Gid::from_raw);
        self.dispatcher
            .try_each_root("chown", path, |physical| {
                nix::unistd::chown(physical, uid, gid).map_err(os_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn truncate(&self, path: &Path, size: u64) -> HybridResult<()> {
        let size = i64::try_from(size).map_err(|_| HybridError::from_errno(Errno::EFBIG, path))?;
        self.dispatcher
            .try_each_root("truncate", path, |physical| {
                nix::unistd::truncate(physical, size).map_err(os_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn utimens(&self, path: &Path, atime: TimeUpdate, mtime: TimeUpdate) -> HybridResult<()> {
        let atime = to_timespec(atime);
        let mtime = to_timespec(mtime);
        self.dispatcher
            .try_each_root("utimens", path, |physical| {
                nix::sys::stat::utimensat(
                    None,
                    physical,
                    &atime,
                    &mtime,
                    UtimensatFlags::FollowSymlink,
                )
                .map_err(os_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn open(&self, path: &Path, flags: OFlag) -> HybridResult<SessionId> {
        self.open_session(
            "open",
            path,
            |physical| open_file(physical, flags, None),
            |file, origin| Session::File(FileSession::new(file, origin, path)),
        )
    }

    fn create(&self, path: &Path, mode: u32, flags: OFlag) -> HybridResult<SessionId> {
        let opened = self.dispatcher.try_each_root("create", path, |physical| {
            open_file(physical, flags | OFlag::O_CREAT, Some(mode))
        })?;

        let origin = SessionOrigin::Root(opened.get_root());
        let session = Session::File(FileSession::new(opened.into_value(), origin, path));
        Ok(self.pin("create", session))
    }

    fn read(&self, session: SessionId, offset: u64, size: usize) -> HybridResult<Vec<u8>> {
        let entry = self.file_session(session)?;
        let file = entry.handle();

        let mut buffer = vec![0; size];
        let mut filled = 0;
        while filled < size {
            match file.read_at(&mut buffer[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(HybridError::from_io(e, entry.path())),
            }
        }

        buffer.truncate(filled);
        Ok(buffer)
    }

    fn write(&self, session: SessionId, offset: u64, data: &[u8]) -> HybridResult<usize> {
        let entry = self.file_session(session)?;
        entry
            .handle()
            .write_all_at(data, offset)
            .map_err(|e| HybridError::from_io(e, entry.path()))?;

        Ok(data.len())
    }

    fn ftruncate(&self, session: SessionId, size: u64) -> HybridResult<()> {
        let entry = self.file_session(session)?;
        entry
            .handle()
            .set_len(size)
            .map_err(|e| HybridError::from_io(e, entry.path()))
    }

    fn flush(&self, _session: SessionId) -> HybridResult<()> {
        Ok(())
    }

    fn fsync(&self, session: SessionId, datasync: bool) -> HybridResult<()> {
        let entry = self.sessions.get(session)?;
        let handle = entry.handle();
        let synced = if datasync {
            handle.sync_data()
        } else {
            handle.sync_all()
        };

        synced.map_err(|e| HybridError::from_io(e, entry.path()))
    }

    fn release(&self, session: SessionId) {
        self.close_session("release", session)
    }

    fn opendir(&self, path: &Path) -> HybridResult<SessionId> {
        self.open_session(
            "opendir",
            path,
            open_directory,
            |directory, origin| Session::Directory(DirectorySession::new(directory, origin, path)),
        )
    }

    fn readdir(&self, path: &Path) -> HybridResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        self.dispatcher
            .visit_every_root("readdir", path, |index, physical| {
                let mut directory =
                    Dir::open(physical, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())
                        .map_err(os_error(physical))?;

                let listing = directory
                    .iter()
                    .map(|entry| -> HybridResult<DirEntry> {
                        let entry = entry.map_err(os_error(physical))?;
                        let name = OsStr::from_bytes(entry.file_name().to_bytes());
                        Ok(DirEntry::new(
                            name,
                            entry.file_type().map(FileKind::from),
                            index,
                        ))
                    })
                    .collect::<HybridResult<Vec<_>>>()?;

                entries.extend(listing);
                Ok(())
            })?;

        if self.readdir_policy == ReaddirPolicy::Merge {
            let mut seen = HashSet::new();
            entries.retain(|entry| seen.insert(entry.get_name().clone()));
        }

        Ok(entries)
    }

    fn releasedir(&self, session: SessionId) {
        self.close_session("releasedir", session)
    }

    fn fsyncdir(&self, _session: SessionId, _datasync: bool) -> HybridResult<()> {
        Ok(())
    }

    fn setxattr(
        &self,
        path: &Path,
        name: &OsStr,
        value: &[u8],
        flags: XattrFlags,
    ) -> HybridResult<()> {
        self.dispatcher
            .try_each_root("setxattr", path, |physical| {
                if flags == XattrFlags::Upsert {
                    return xattr::set(physical, name, value).map_err(io_error(physical));
                }

                set_xattr_exclusive(physical, name, value, flags)
            })
            .map(Dispatched::into_value)
    }

    fn getxattr(&self, path: &Path, name: &OsStr) -> HybridResult<Vec<u8>> {
        self.dispatcher
            .try_each_root("getxattr", path, |physical| {
                xattr::get(physical, name)
                    .map_err(io_error(physical))?
                    .ok_or_else(|| HybridError::from_errno(Errno::ENODATA, physical))
            })
            .map(Dispatched::into_value)
    }

    fn listxattr(&self, path: &Path) -> HybridResult<Vec<OsString>> {
        self.dispatcher
            .try_each_root("listxattr", path, |physical| {
                xattr::list(physical)
                    .map(|names| names.collect())
                    .map_err(io_error(physical))
            })
            .map(Dispatched::into_value)
    }

    fn removexattr(&self, path: &Path, name: &OsStr) -> HybridResult<()> {
        self.dispatcher
            .try_each_root("removexattr", path, |physical| {
                xattr::remove(physical, name).map_err(io_error(physical))
            })
            .map(Dispatched::into_value)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> HybridError + '_ {
    move |error| HybridError::from_io(error, path)
}

fn os_error(path: &Path) -> impl FnOnce(Errno) -> HybridError + '_ {
    move |errno| HybridError::from_errno(errno, path)
}

/// Sets an extended attribute with `XATTR_CREATE` or `XATTR_REPLACE` in a single system call, so
/// the existence check and the write cannot interleave with another writer.
fn set_xattr_exclusive(
    physical: &Path,
    name: &OsStr,
    value: &[u8],
    flags: XattrFlags,
) -> HybridResult<()> {
    let c_path = CString::new(physical.as_os_str().as_bytes())
        .map_err(|_| HybridError::from_errno(Errno::EINVAL, physical))?;
    let c_name = CString::new(name.as_bytes())
        .map_err(|_| HybridError::from_errno(Errno::EINVAL, physical))?;

    // SAFETY: both strings are NUL-terminated and outlive the call, and `value` is a live slice
    // of `value.len()` bytes.
    let result = unsafe {
        libc::lsetxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            flags.bits(),
        )
    };

    Errno::result(result).map(drop).map_err(os_error(physical))
}

fn lstat(physical: &Path) -> HybridResult<Metadata> {
    std::fs::symlink_metadata(physical).map_err(io_error(physical))
}

/// Returns `true` if `path` names the union root itself.
fn is_union_root(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::RootDir | Component::CurDir))
}

/// Opens a file with raw open flags. `mode` is applied only when the flags create the file.
fn open_file(physical: &Path, flags: OFlag, mode: Option<u32>) -> HybridResult<File> {
    let access = flags & OFlag::O_ACCMODE;

    let mut options = OpenOptions::new();
    if access == OFlag::O_WRONLY {
        options.write(true);
    } else if access == OFlag::O_RDWR {
        options.read(true).write(true);
    } else {
        options.read(true);
    }

    if let Some(mode) = mode {
        options.mode(mode);
    }

    options
        .custom_flags((flags & !OFlag::O_ACCMODE).bits())
        .open(physical)
        .map_err(io_error(physical))
}

fn open_directory(physical: &Path) -> HybridResult<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(physical)
        .map_err(io_error(physical))
}

fn to_timespec(update: TimeUpdate) -> TimeSpec {
    match update {
        TimeUpdate::Now => TimeSpec::new(0, libc::UTIME_NOW),
        TimeUpdate::Omit => TimeSpec::new(0, libc::UTIME_OMIT),
        TimeUpdate::Set(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(since) => TimeSpec::from_duration(since),
            Err(before) => -TimeSpec::from_duration(before.duration()),
        },
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
