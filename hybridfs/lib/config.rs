//! Startup configuration of a union filesystem.

use std::path::{Path, PathBuf};

use getset::{CopyGetters, Getters};
use nix::unistd::{access, AccessFlags};
use typed_builder::TypedBuilder;

use crate::{HybridError, HybridResult, DEFAULT_MAX_PATH_LEN};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How `readdir` combines the listings of the backing roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaddirPolicy {
    /// Emit every entry of every root in priority order. A name present in two roots is listed
    /// twice.
    #[default]
    Concatenate,

    /// Emit each name once, taking the entry from the highest-priority root that has it.
    Merge,
}

/// Where `open` and `opendir` look for the object before scanning the roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenStrategy {
    /// Only scan the backing roots in priority order.
    #[default]
    Resolved,

    /// Try the path exactly as given first, then scan the backing roots. This lets callers that
    /// already hold an absolute host path open it directly.
    Passthrough,
}

/// The immutable configuration a [`HybridFileSystem`][crate::HybridFileSystem] is built from.
#[derive(Debug, Clone, TypedBuilder, Getters, CopyGetters)]
pub struct HybridConfig {
    /// The backing roots, highest priority first.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    roots: Vec<PathBuf>,

    /// The maximum length in bytes of a resolved physical path.
    #[builder(default = DEFAULT_MAX_PATH_LEN)]
    #[getset(get_copy = "pub with_prefix")]
    max_path_len: usize,

    /// How directory listings of the roots are combined.
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    readdir_policy: ReaddirPolicy,

    /// How sessions are opened.
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    open_strategy: OpenStrategy,
}

/// Validated startup arguments: `mountpoint root_1 [root_2 … root_N]`.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct MountConfig {
    /// The existing, empty directory the union is mounted on.
    mount_point: PathBuf,

    /// The canonical backing roots, highest priority first.
    roots: Vec<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HybridConfig {
    /// Creates a configuration with default settings for the given roots.
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        HybridConfig::builder()
            .roots(roots.into_iter().map(Into::into).collect::<Vec<_>>())
            .build()
    }
}

impl MountConfig {
    /// Validates the startup argument surface.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The mount point does not exist, is not a directory or is not empty
    /// - No root is given
    /// - A root does not exist, is not a directory or cannot be read
    pub fn from_args(
        mount_point: impl AsRef<Path>,
        roots: impl IntoIterator<Item = impl AsRef<Path>>,
    ) -> HybridResult<Self> {
        let mount_point = mount_point.as_ref();
        let metadata = std::fs::metadata(mount_point)
            .map_err(|_| HybridError::MountPointNotFound(mount_point.to_path_buf()))?;
        if !metadata.is_dir() {
            return Err(HybridError::MountPointNotADirectory(
                mount_point.to_path_buf(),
            ));
        }

        let mut entries = std::fs::read_dir(mount_point)
            .map_err(|e| HybridError::from_io(e, mount_point))?;
        if entries.next().is_some() {
            return Err(HybridError::MountPointNotEmpty(mount_point.to_path_buf()));
        }

        let roots = roots
            .into_iter()
            .map(|root| validate_root(root.as_ref()))
            .collect::<HybridResult<Vec<_>>>()?;
        if roots.is_empty() {
            return Err(HybridError::RequiresAtLeastOneRoot);
        }

        let mount_point = mount_point
            .canonicalize()
            .map_err(|e| HybridError::from_io(e, mount_point))?;

        if let Some(root) = roots.iter().find(|root| mount_point.starts_with(root)) {
            return Err(HybridError::Configuration(format!(
                "mount point {} lies inside backing root {}",
                mount_point.display(),
                root.display()
            )));
        }

        Ok(Self { mount_point, roots })
    }

    /// Builds the filesystem configuration for these roots.
    pub fn to_hybrid_config(&self) -> HybridConfig {
        HybridConfig::new(self.roots.clone())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Canonicalizes a root argument and checks it can be read and traversed.
fn validate_root(root: &Path) -> HybridResult<PathBuf> {
    let canonical = root
        .canonicalize()
        .map_err(|_| HybridError::RootNotFound(root.to_path_buf()))?;

    if !canonical.is_dir() {
        return Err(HybridError::RootNotADirectory(root.to_path_buf()));
    }

    access(&canonical, AccessFlags::R_OK | AccessFlags::X_OK)
        .map_err(|_| HybridError::RootNotReadable(root.to_path_buf()))?;

    Ok(canonical)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_hybrid_config_defaults() {
        let config = HybridConfig::new(["/a", "/b"]);
        assert_eq!(
            config.get_roots(),
            &vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert_eq!(config.get_max_path_len(), DEFAULT_MAX_PATH_LEN);
        assert_eq!(config.get_readdir_policy(), ReaddirPolicy::Concatenate);
        assert_eq!(config.get_open_strategy(), OpenStrategy::Resolved);

        let config = HybridConfig::builder()
            .roots(vec![PathBuf::from("/a")])
            .readdir_policy(ReaddirPolicy::Merge)
            .open_strategy(OpenStrategy::Passthrough)
            .max_path_len(128)
            .build();
        assert_eq!(config.get_readdir_policy(), ReaddirPolicy::Merge);
        assert_eq!(config.get_open_strategy(), OpenStrategy::Passthrough);
        assert_eq!(config.get_max_path_len(), 128);
    }

    #[test]
    fn test_mount_config_accepts_valid_arguments() {
        let temp_dir = TempDir::new().unwrap();
        let mount_point = temp_dir.path().join("mnt");
        let root_a = temp_dir.path().join("a");
        let root_b = temp_dir.path().join("b");
        for dir in [&mount_point, &root_a, &root_b] {
            std::fs::create_dir(dir).unwrap();
        }

        let config = MountConfig::from_args(&mount_point, [&root_a, &root_b]).unwrap();
        assert_eq!(
            config.get_mount_point(),
            &mount_point.canonicalize().unwrap()
        );
        assert_eq!(
            config.get_roots(),
            &vec![root_a.canonicalize().unwrap(), root_b.canonicalize().unwrap()]
        );
        assert_eq!(config.to_hybrid_config().get_roots(), config.get_roots());
    }

    #[test]
    fn test_mount_config_rejects_bad_mount_point() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        std::fs::create_dir(&root).unwrap();

        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            MountConfig::from_args(&missing, [&root]),
            Err(HybridError::MountPointNotFound(_))
        ));

        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            MountConfig::from_args(&file, [&root]),
            Err(HybridError::MountPointNotADirectory(_))
        ));

        let busy = temp_dir.path().join("busy");
        std::fs::create_dir(&busy).unwrap();
        std::fs::write(busy.join("occupant"), b"x").unwrap();
        assert!(matches!(
            MountConfig::from_args(&busy, [&root]),
            Err(HybridError::MountPointNotEmpty(_))
        ));

        let nested = root.join("mnt");
        std::fs::create_dir(&nested).unwrap();
        assert!(matches!(
            MountConfig::from_args(&nested, [&root]),
            Err(HybridError::Configuration(_))
        ));
    }

    #[test]
    fn test_mount_config_rejects_bad_roots() {
        let temp_dir = TempDir::new().unwrap();
        let mount_point = temp_dir.path().join("mnt");
        std::fs::create_dir(&mount_point).unwrap();

        assert!(matches!(
            MountConfig::from_args(&mount_point, Vec::<PathBuf>::new()),
            Err(HybridError::RequiresAtLeastOneRoot)
        ));

        assert!(matches!(
            MountConfig::from_args(&mount_point, [temp_dir.path().join("missing")]),
            Err(HybridError::RootNotFound(_))
        ));

        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            MountConfig::from_args(&mount_point, [&file]),
            Err(HybridError::RootNotADirectory(_))
        ));
    }
}
