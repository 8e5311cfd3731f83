use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use getset::Getters;

use crate::{HybridError, HybridResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The position of a backing root in the registry. Index 0 has the highest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootIndex(usize);

/// A backing directory tree overlaid into the union namespace.
///
/// The path is absolute and canonical: symlinks are resolved and relative components removed at
/// construction time.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct BackingRoot {
    /// The priority of this root.
    index: RootIndex,

    /// The canonical physical path of this root.
    path: PathBuf,
}

/// The ordered, immutable list of backing roots.
///
/// A registry is never empty and its indices never change after construction, so it can be
/// shared between threads and read without synchronization.
#[derive(Debug, Clone)]
pub struct RootRegistry {
    roots: Vec<BackingRoot>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RootIndex {
    /// Returns the index as a `usize`.
    pub fn get(self) -> usize {
        self.0
    }
}

impl BackingRoot {
    /// Canonicalizes `path` and checks that it names a directory.
    fn canonicalize(index: RootIndex, path: &Path) -> HybridResult<Self> {
        let canonical = path
            .canonicalize()
            .map_err(|_| HybridError::RootNotFound(path.to_path_buf()))?;

        let metadata = std::fs::metadata(&canonical)
            .map_err(|_| HybridError::RootNotFound(path.to_path_buf()))?;
        if !metadata.is_dir() {
            return Err(HybridError::RootNotADirectory(path.to_path_buf()));
        }

        Ok(Self {
            index,
            path: canonical,
        })
    }
}

impl RootRegistry {
    /// Builds a registry from candidate root directories, highest priority first.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - No candidate is given
    /// - A candidate does not exist or cannot be canonicalized
    /// - A candidate is not a directory
    pub fn new(candidates: impl IntoIterator<Item = impl AsRef<Path>>) -> HybridResult<Self> {
        let roots = candidates
            .into_iter()
            .enumerate()
            .map(|(index, path)| BackingRoot::canonicalize(RootIndex(index), path.as_ref()))
            .collect::<HybridResult<Vec<_>>>()?;

        if roots.is_empty() {
            return Err(HybridError::RequiresAtLeastOneRoot);
        }

        Ok(Self { roots })
    }

    /// Returns the root at `index`.
    ///
    /// ## Errors
    ///
    /// Returns a configuration error if `index` was not produced by this registry.
    pub fn resolve(&self, index: RootIndex) -> HybridResult<&BackingRoot> {
        self.get(index).ok_or_else(|| {
            HybridError::Configuration(format!("no backing root with index {index}"))
        })
    }

    /// Returns the root at `index`, if there is one.
    pub fn get(&self, index: RootIndex) -> Option<&BackingRoot> {
        self.roots.get(index.0)
    }

    /// Returns the number of backing roots.
    pub fn count(&self) -> usize {
        self.roots.len()
    }

    /// Iterates over the roots from highest to lowest priority.
    pub fn iter(&self) -> impl Iterator<Item = &BackingRoot> {
        self.roots.iter()
    }

    /// Iterates over the root indices from highest to lowest priority.
    pub fn indices(&self) -> impl Iterator<Item = RootIndex> {
        (0..self.roots.len()).map(RootIndex)
    }

    /// Returns the highest-priority root that contains the physical `path`.
    pub fn owner_of(&self, path: &Path) -> Option<&BackingRoot> {
        self.roots.iter().find(|root| path.starts_with(&root.path))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for RootIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<usize> for RootIndex {
    fn from(index: usize) -> Self {
        RootIndex(index)
    }
}

impl<'a> IntoIterator for &'a RootRegistry {
    type Item = &'a BackingRoot;
    type IntoIter = std::slice::Iter<'a, BackingRoot>;

    fn into_iter(self) -> Self::IntoIter {
        self.roots.iter()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
