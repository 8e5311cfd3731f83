use std::{ffi::OsString, time::SystemTime};

use getset::{CopyGetters, Getters};
use nix::dir::Type;

use crate::RootIndex;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The type of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// A regular file
    File,

    /// A directory
    Directory,

    /// A symbolic link
    Symlink,

    /// A named pipe
    Fifo,

    /// A character device
    CharDevice,

    /// A block device
    BlockDevice,

    /// A unix domain socket
    Socket,
}

/// A single entry produced by enumerating a union directory.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct DirEntry {
    /// The entry name, exactly as the backing directory stream reported it.
    #[getset(get = "pub with_prefix")]
    name: OsString,

    /// The entry type, when the backing filesystem reports one.
    #[getset(get_copy = "pub with_prefix")]
    kind: Option<FileKind>,

    /// The root whose directory stream produced the entry.
    #[getset(get_copy = "pub with_prefix")]
    root: RootIndex,
}

/// The kind of node `mknod` creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// An empty regular file
    Regular,

    /// A named pipe
    Fifo,

    /// A character device with the given device number
    CharDevice(u64),

    /// A block device with the given device number
    BlockDevice(u64),

    /// A unix domain socket node
    Socket,
}

/// How a timestamp is changed by `utimens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUpdate {
    /// Set the timestamp to the current time
    Now,

    /// Leave the timestamp unchanged
    Omit,

    /// Set the timestamp to the given time
    Set(SystemTime),
}

/// How `setxattr` treats an existing attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XattrFlags {
    /// Create the attribute or replace its value
    #[default]
    Upsert,

    /// Fail if the attribute already exists
    Create,

    /// Fail if the attribute does not exist
    Replace,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DirEntry {
    /// Creates a directory entry.
    pub fn new(name: impl Into<OsString>, kind: Option<FileKind>, root: RootIndex) -> Self {
        Self {
            name: name.into(),
            kind,
            root,
        }
    }
}

impl NodeKind {
    /// Decodes the type bits of a `mknod` mode and its device number.
    ///
    /// Returns `None` for type bits that do not describe a node `mknod` can create.
    pub fn from_mode(mode: u32, rdev: u64) -> Option<Self> {
        match mode & libc::S_IFMT {
            // A mode without type bits is a regular file.
            0 | libc::S_IFREG => Some(NodeKind::Regular),
            libc::S_IFIFO => Some(NodeKind::Fifo),
            libc::S_IFCHR => Some(NodeKind::CharDevice(rdev)),
            libc::S_IFBLK => Some(NodeKind::BlockDevice(rdev)),
            libc::S_IFSOCK => Some(NodeKind::Socket),
            _ => None,
        }
    }
}

impl XattrFlags {
    /// Decodes the `XATTR_CREATE`/`XATTR_REPLACE` flag word passed to `setxattr`.
    pub fn from_bits(flags: i32) -> Self {
        if flags & libc::XATTR_CREATE != 0 {
            XattrFlags::Create
        } else if flags & libc::XATTR_REPLACE != 0 {
            XattrFlags::Replace
        } else {
            XattrFlags::Upsert
        }
    }

    /// Encodes the flags as the flag word `setxattr` expects.
    pub fn bits(self) -> i32 {
        match self {
            XattrFlags::Upsert => 0,
            XattrFlags::Create => libc::XATTR_CREATE,
            XattrFlags::Replace => libc::XATTR_REPLACE,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<Type> for FileKind {
    fn from(kind: Type) -> Self {
        match kind {
            Type::File => FileKind::File,
            Type::Directory => FileKind::Directory,
            Type::Symlink => FileKind::Symlink,
            Type::Fifo => FileKind::Fifo,
            Type::CharacterDevice => FileKind::CharDevice,
            Type::BlockDevice => FileKind::BlockDevice,
            Type::Socket => FileKind::Socket,
        }
    }
}

impl From<std::fs::FileType> for FileKind {
    fn from(file_type: std::fs::FileType) -> Self {
        use std::os::unix::fs::FileTypeExt;

        if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_fifo() {
            FileKind::Fifo
        } else if file_type.is_char_device() {
            FileKind::CharDevice
        } else if file_type.is_block_device() {
            FileKind::BlockDevice
        } else if file_type.is_socket() {
            FileKind::Socket
        } else {
            FileKind::File
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
