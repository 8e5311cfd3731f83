use std::{
    collections::HashSet,
    ffi::{OsStr, OsString},
    fs,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use hybridfs::{
    DirEntry, HybridConfig, HybridError, HybridFileSystem, ReaddirPolicy, UnionFileSystem,
    XattrFlags,
};
use nix::errno::Errno;
use tempfile::TempDir;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test]
fn test_union_unlink_uncovers_lower_copy() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(2)?;
    fs::write(roots[0].join("a"), b"x")?;
    fs::write(roots[1].join("a"), b"yy")?;

    let found = fs.which(Path::new("/a"))?;
    assert_eq!(found.get_root().get(), 0);
    assert_eq!(found.get_value().len(), 1);

    fs.unlink(Path::new("/a"))?;
    assert!(!roots[0].join("a").exists());
    assert_eq!(fs::read(roots[1].join("a"))?, b"yy");

    let found = fs.which(Path::new("/a"))?;
    assert_eq!(found.get_root().get(), 1);
    assert_eq!(found.get_value().len(), 2);

    fs.unlink(Path::new("/a"))?;
    assert!(matches!(
        fs.getattr(Path::new("/a")),
        Err(HybridError::NotFound(_))
    ));

    Ok(())
}

#[test_log::test]
fn test_union_lower_root_visible_when_upper_lacks_path() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(3)?;
    fs::create_dir_all(roots[2].join("deep/nested"))?;
    fs::write(roots[2].join("deep/nested/file"), b"lowest")?;

    let metadata = fs.getattr(Path::new("/deep/nested/file"))?;
    assert_eq!(
        metadata.ino(),
        fs::metadata(roots[2].join("deep/nested/file"))?.ino()
    );

    Ok(())
}

#[test_log::test]
fn test_union_missing_path_reports_last_root() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(3)?;

    let err = fs.getattr(Path::new("/nowhere")).unwrap_err();
    assert_eq!(err.errno(), Errno::ENOENT);
    assert_eq!(err.to_reply_code(), -libc::ENOENT);
    assert!(matches!(err, HybridError::NotFound(path) if path == roots[2].join("nowhere")));

    assert!(matches!(
        fs.readlink(Path::new("/nowhere")),
        Err(HybridError::NotFound(_))
    ));
    assert!(matches!(
        fs.listxattr(Path::new("/nowhere")),
        Err(HybridError::NotFound(_))
    ));

    Ok(())
}

#[test_log::test]
fn test_union_mkdir_and_create_land_in_accepting_root() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(3)?;

    // Absent everywhere: the first root takes it
    fs.mkdir(Path::new("/top"), 0o755)?;
    assert!(roots[0].join("top").is_dir());
    assert_eq!(fs.which(Path::new("/top"))?.get_root().get(), 0);

    // The parent only exists in the third root, so the creation lands there
    fs::create_dir(roots[2].join("only3"))?;
    let session = fs.create(Path::new("/only3/f"), 0o644, nix::fcntl::OFlag::O_WRONLY)?;
    fs.release(session);
    assert!(roots[2].join("only3/f").is_file());
    assert_eq!(fs.which(Path::new("/only3/f"))?.get_root().get(), 2);

    fs.mkdir(Path::new("/only3/sub"), 0o700)?;
    assert!(roots[2].join("only3/sub").is_dir());

    // Every root has the union root, so repeated creations move down the stack
    fs.mkdir(Path::new("/top"), 0o755)?;
    assert!(roots[1].join("top").is_dir());
    fs.mkdir(Path::new("/top"), 0o755)?;
    assert!(roots[2].join("top").is_dir());

    let err = fs.mkdir(Path::new("/top"), 0o755).unwrap_err();
    assert!(matches!(err, HybridError::AlreadyExists(path) if path == roots[2].join("top")));

    Ok(())
}

#[test_log::test]
fn test_union_rmdir_non_empty() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(1)?;
    fs::create_dir(roots[0].join("d"))?;
    fs::write(roots[0].join("d/f"), b"x")?;

    let err = fs.rmdir(Path::new("/d")).unwrap_err();
    assert!(matches!(err, HybridError::NotEmpty(_)));

    fs.unlink(Path::new("/d/f"))?;
    fs.rmdir(Path::new("/d"))?;
    assert!(!roots[0].join("d").exists());

    Ok(())
}

#[test_log::test]
fn test_union_rename_never_crosses_roots() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(2)?;
    fs::write(roots[0].join("src"), b"data")?;
    fs::create_dir(roots[1].join("dst_dir"))?;

    // The source lives in root 0 and the destination parent in root 1
    let err = fs
        .rename(Path::new("/src"), Path::new("/dst_dir/moved"))
        .unwrap_err();
    assert_eq!(err.errno(), Errno::ENOENT);
    assert!(roots[0].join("src").exists());
    assert!(!roots[1].join("dst_dir/moved").exists());

    // Within one root it succeeds
    fs.rename(Path::new("/src"), Path::new("/renamed"))?;
    assert!(!roots[0].join("src").exists());
    assert_eq!(fs::read(roots[0].join("renamed"))?, b"data");

    Ok(())
}

#[test_log::test]
fn test_union_readdir_concatenates_roots() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(2)?;
    fs::write(roots[0].join("shared"), b"1")?;
    fs::write(roots[0].join("upper_only"), b"1")?;
    fs::write(roots[1].join("shared"), b"2")?;
    fs::write(roots[1].join("lower_only"), b"2")?;

    let entries = fs.readdir(Path::new("/"))?;
    let names = helper::names(&entries);

    assert_eq!(names.iter().filter(|name| *name == "shared").count(), 2);
    assert_eq!(names.iter().filter(|name| *name == ".").count(), 2);
    assert!(names.contains(&OsString::from("upper_only")));
    assert!(names.contains(&OsString::from("lower_only")));

    // Entries of the first root come before those of the second
    let first_lower = entries
        .iter()
        .position(|entry| entry.get_root().get() == 1)
        .unwrap();
    assert!(entries[..first_lower]
        .iter()
        .all(|entry| entry.get_root().get() == 0));

    Ok(())
}

#[test_log::test]
fn test_union_readdir_merge_policy() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let roots = helper::make_roots(&temp_dir, 2)?;
    fs::write(roots[0].join("shared"), b"1")?;
    fs::write(roots[1].join("shared"), b"2")?;
    fs::write(roots[1].join("lower_only"), b"2")?;

    let config = HybridConfig::builder()
        .roots(roots.clone())
        .readdir_policy(ReaddirPolicy::Merge)
        .build();
    let fs = HybridFileSystem::new(config)?;

    let entries = fs.readdir(Path::new("/"))?;
    let names = helper::names(&entries);
    let unique: HashSet<_> = names.iter().collect();
    assert_eq!(unique.len(), names.len());

    let shared = entries
        .iter()
        .find(|entry| entry.get_name() == "shared")
        .unwrap();
    assert_eq!(shared.get_root().get(), 0);

    let lower = entries
        .iter()
        .find(|entry| entry.get_name() == "lower_only")
        .unwrap();
    assert_eq!(lower.get_root().get(), 1);

    Ok(())
}

#[test_log::test]
fn test_union_rejects_long_and_escaping_paths() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let roots = helper::make_roots(&temp_dir, 1)?;
    let budget = roots[0].as_os_str().len() + 16;
    let config = HybridConfig::builder()
        .roots(roots.clone())
        .max_path_len(budget)
        .build();
    let fs = HybridFileSystem::new(config)?;

    fs::write(roots[0].join("short"), b"x")?;
    fs.getattr(Path::new("/short"))?;

    let long = format!("/{}", "n".repeat(32));
    let err = fs.getattr(Path::new(&long)).unwrap_err();
    assert!(matches!(err, HybridError::PathTooLong { .. }));
    assert_eq!(err.errno(), Errno::ENAMETOOLONG);

    let err = fs.getattr(Path::new("/../etc/passwd")).unwrap_err();
    assert!(matches!(err, HybridError::InvalidPathComponent(_)));

    Ok(())
}

#[test_log::test]
fn test_union_symlink_and_readlink() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(2)?;
    fs::write(roots[1].join("target"), b"x")?;

    fs.symlink(Path::new("target"), Path::new("/link"))?;
    assert_eq!(fs.readlink(Path::new("/link"))?, PathBuf::from("target"));
    assert!(fs.getattr(Path::new("/link"))?.file_type().is_symlink());
    assert!(fs::symlink_metadata(roots[0].join("link"))?
        .file_type()
        .is_symlink());

    Ok(())
}

#[test_log::test]
fn test_union_xattr_lifecycle() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(2)?;
    fs::write(roots[1].join("f"), b"x")?;

    let path = Path::new("/f");
    let name = OsStr::new("user.hybridfs.test");
    match fs.setxattr(path, name, b"v1", XattrFlags::Create) {
        Ok(()) => {}
        // Some filesystems have no user xattr support
        Err(err) if err.errno() == Errno::EOPNOTSUPP => return Ok(()),
        Err(err) => return Err(err.into()),
    }

    assert_eq!(fs.getxattr(path, name)?, b"v1");
    assert!(fs.listxattr(path)?.iter().any(|listed| listed == name));

    let err = fs
        .setxattr(path, name, b"v2", XattrFlags::Create)
        .unwrap_err();
    assert_eq!(err.errno(), Errno::EEXIST);

    fs.setxattr(path, name, b"v2", XattrFlags::Replace)?;
    assert_eq!(fs.getxattr(path, name)?, b"v2");
    assert_eq!(xattr::get(roots[1].join("f"), name)?, Some(b"v2".to_vec()));

    fs.removexattr(path, name)?;
    assert_eq!(fs.getxattr(path, name).unwrap_err().errno(), Errno::ENODATA);

    let err = fs
        .setxattr(path, name, b"v3", XattrFlags::Replace)
        .unwrap_err();
    assert_eq!(err.errno(), Errno::ENODATA);

    Ok(())
}

#[test_log::test]
fn test_union_exclusive_xattr_flags_under_contention() -> anyhow::Result<()> {
    let (_temp_dir, roots, fs) = helper::setup_union(2)?;
    fs::write(roots[1].join("f"), b"x")?;
    let path = Path::new("/f");

    match fs.setxattr(path, OsStr::new("user.hybridfs.support"), b"", XattrFlags::Upsert) {
        Ok(()) => {}
        // Some filesystems have no user xattr support
        Err(err) if err.errno() == Errno::EOPNOTSUPP => return Ok(()),
        Err(err) => return Err(err.into()),
    }

    for round in 0..200 {
        let name = OsString::from(format!("user.hybridfs.round{round}"));
        let created = AtomicUsize::new(0);
        let replaced = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for worker in 0..4u8 {
                let (fs, name, created) = (&fs, &name, &created);
                scope.spawn(move || {
                    match fs.setxattr(path, name, &[worker], XattrFlags::Create) {
                        Ok(()) => {
                            created.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => assert_eq!(err.errno(), Errno::EEXIST),
                    }
                });
            }
        });
        assert_eq!(created.load(Ordering::SeqCst), 1, "round {round}");

        fs.removexattr(path, &name)?;
        std::thread::scope(|scope| {
            for worker in 0..4u8 {
                let (fs, name, replaced) = (&fs, &name, &replaced);
                scope.spawn(move || {
                    match fs.setxattr(path, name, &[worker], XattrFlags::Replace) {
                        Ok(()) => {
                            replaced.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => assert_eq!(err.errno(), Errno::ENODATA),
                    }
                });
            }
        });
        assert_eq!(replaced.load(Ordering::SeqCst), 0, "round {round}");
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

mod helper {
    use super::*;

    /// Creates `count` canonical root directories under `temp_dir`.
    pub(super) fn make_roots(temp_dir: &TempDir, count: usize) -> anyhow::Result<Vec<PathBuf>> {
        (0..count)
            .map(|i| {
                let path = temp_dir.path().join(format!("root{i}"));
                fs::create_dir(&path)?;
                Ok(path.canonicalize()?)
            })
            .collect()
    }

    /// Creates `count` roots and a union filesystem with default settings over them.
    pub(super) fn setup_union(
        count: usize,
    ) -> anyhow::Result<(TempDir, Vec<PathBuf>, HybridFileSystem)> {
        let temp_dir = TempDir::new()?;
        let roots = make_roots(&temp_dir, count)?;
        let fs = HybridFileSystem::new(HybridConfig::new(roots.clone()))?;
        Ok((temp_dir, roots, fs))
    }

    pub(super) fn names(entries: &[DirEntry]) -> Vec<OsString> {
        entries.iter().map(|entry| entry.get_name().clone()).collect()
    }
}
