use std::{
    collections::HashMap,
    fmt::{self, Display},
    fs::File,
    os::fd::IntoRawFd,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use getset::{CopyGetters, Getters};

use crate::{HybridError, HybridResult, RootIndex};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An opaque handle to an open session, handed to the bridge and passed back on every
/// handle-bound operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

/// Where the native resource of a session was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// The object was opened inside a backing root.
    Root(RootIndex),

    /// The object was opened at the path exactly as the caller gave it.
    Direct,
}

/// An open regular file pinned to the object that produced it.
#[derive(Debug, Getters, CopyGetters)]
pub struct FileSession {
    /// The open file.
    #[getset(get = "pub with_prefix")]
    file: File,

    /// Where the file was opened.
    #[getset(get_copy = "pub with_prefix")]
    origin: SessionOrigin,

    /// The virtual path the session was opened with.
    #[getset(get = "pub with_prefix")]
    path: PathBuf,
}

/// An open directory pinned to the object that produced it.
#[derive(Debug, Getters, CopyGetters)]
pub struct DirectorySession {
    /// The open directory.
    #[getset(get = "pub with_prefix")]
    directory: File,

    /// Where the directory was opened.
    #[getset(get_copy = "pub with_prefix")]
    origin: SessionOrigin,

    /// The virtual path the session was opened with.
    #[getset(get = "pub with_prefix")]
    path: PathBuf,
}

/// A live reference to an open file or directory.
///
/// Each variant owns its native resource. Dropping a session closes it, so the resource is
/// released on every exit path.
#[derive(Debug)]
pub enum Session {
    /// A session created by `open` or `create`
    File(FileSession),

    /// A session created by `opendir`
    Directory(DirectorySession),
}

/// The table of open sessions, keyed by [`SessionId`].
///
/// The lock only guards insertion, lookup and removal. I/O on a session happens on a shared
/// reference after the lock is released.
#[derive(Debug)]
pub struct SessionTable {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SessionId {
    /// Returns the raw handle value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl FileSession {
    /// Creates a file session.
    pub fn new(file: File, origin: SessionOrigin, path: impl Into<PathBuf>) -> Self {
        Self {
            file,
            origin,
            path: path.into(),
        }
    }
}

impl DirectorySession {
    /// Creates a directory session.
    pub fn new(directory: File, origin: SessionOrigin, path: impl Into<PathBuf>) -> Self {
        Self {
            directory,
            origin,
            path: path.into(),
        }
    }
}

impl Session {
    /// Returns where the session was opened.
    pub fn origin(&self) -> SessionOrigin {
        match self {
            Session::File(session) => session.origin,
            Session::Directory(session) => session.origin,
        }
    }

    /// Returns the virtual path the session was opened with.
    pub fn path(&self) -> &Path {
        match self {
            Session::File(session) => &session.path,
            Session::Directory(session) => &session.path,
        }
    }

    /// Returns the native handle of either variant.
    pub fn handle(&self) -> &File {
        match self {
            Session::File(session) => &session.file,
            Session::Directory(session) => &session.directory,
        }
    }

    /// Returns the file session, or `IsADirectory` for a directory session.
    pub fn as_file(&self) -> HybridResult<&FileSession> {
        match self {
            Session::File(session) => Ok(session),
            Session::Directory(session) => Err(HybridError::IsADirectory(session.path.clone())),
        }
    }

    /// Returns `true` for a directory session.
    pub fn is_directory(&self) -> bool {
        matches!(self, Session::Directory(_))
    }

    /// Closes the native handle and reports the status of the close.
    pub fn close(self) -> HybridResult<()> {
        let (file, path) = match self {
            Session::File(session) => (session.file, session.path),
            Session::Directory(session) => (session.directory, session.path),
        };

        nix::unistd::close(file.into_raw_fd())
            .map_err(|errno| HybridError::from_errno(errno, path))
    }
}

impl SessionTable {
    /// Creates an empty table. Session ids start at 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Stores `session` and returns its new id.
    pub fn insert(&self, session: Session) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(session));
        id
    }

    /// Returns the session with the given id.
    pub fn get(&self, id: SessionId) -> HybridResult<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(HybridError::UnknownSession(id))
    }

    /// Removes the session with the given id and returns it.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Returns the number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no session is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        SessionId(id)
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
