use std::path::{Path, PathBuf};

use getset::{CopyGetters, Getters};

use crate::{HybridError, HybridResult, PathResolver, RootIndex, RootRegistry};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The value an operation produced together with the root that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct Dispatched<T> {
    /// The root the operation succeeded against.
    #[getset(get_copy = "pub with_prefix")]
    root: RootIndex,

    /// The physical path the operation succeeded against.
    #[getset(get = "pub with_prefix")]
    physical_path: PathBuf,

    /// The value returned by the operation.
    #[getset(get = "pub with_prefix")]
    value: T,
}

/// Applies operations to the backing roots in priority order until one succeeds.
///
/// Every root is tried exactly once. The first success is returned immediately; if every root
/// fails, the error of the last root tried is returned unchanged. A failure to resolve the path
/// for one root counts as that root's failed attempt.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct FallbackDispatcher {
    /// The resolver used to build a physical path per root.
    resolver: PathResolver,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<T> Dispatched<T> {
    /// Consumes the result and returns the value.
    pub fn into_value(self) -> T {
        self.value
    }
}

impl FallbackDispatcher {
    /// Creates a dispatcher that resolves paths with `resolver`.
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// Returns the backing roots this dispatcher scans.
    pub fn registry(&self) -> &RootRegistry {
        self.resolver.get_registry()
    }

    /// Runs `primitive` on the physical path of `path` in each root until it succeeds.
    ///
    /// ## Arguments
    ///
    /// * `op` - The operation name, used for logging
    /// * `path` - The virtual path to resolve
    /// * `primitive` - The operation to apply to a physical path
    pub fn try_each_root<T>(
        &self,
        op: &'static str,
        path: &Path,
        mut primitive: impl FnMut(&Path) -> HybridResult<T>,
    ) -> HybridResult<Dispatched<T>> {
        self.try_each_root_at(op, path, |_, physical| primitive(physical))
    }

    /// Like [`try_each_root`][Self::try_each_root], but also hands `primitive` the index of the
    /// root being tried.
    pub fn try_each_root_at<T>(
        &self,
        op: &'static str,
        path: &Path,
        mut primitive: impl FnMut(RootIndex, &Path) -> HybridResult<T>,
    ) -> HybridResult<Dispatched<T>> {
        self.dispatch(op, path, |index| {
            let physical = self.resolver.physical_path(path, index)?;
            let value = primitive(index, &physical)?;
            Ok((physical, value))
        })
    }

    /// Runs a two-path `primitive` on the physical paths of `from` and `to` in each root until it
    /// succeeds.
    ///
    /// Both paths are always resolved against the same root on a given attempt, so the operation
    /// can never combine objects from two different roots.
    pub fn try_each_root_pair<T>(
        &self,
        op: &'static str,
        from: &Path,
        to: &Path,
        mut primitive: impl FnMut(&Path, &Path) -> HybridResult<T>,
    ) -> HybridResult<Dispatched<T>> {
        self.dispatch(op, from, |index| {
            let physical_from = self.resolver.physical_path(from, index)?;
            let physical_to = self.resolver.physical_path(to, index)?;
            let value = primitive(&physical_from, &physical_to)?;
            Ok((physical_from, value))
        })
    }

    /// Runs `visit` on the physical path of `path` in every root, in priority order.
    ///
    /// Unlike [`try_each_root`][Self::try_each_root] the scan does not stop at the first success.
    /// It succeeds if at least one root was visited successfully and otherwise returns the error
    /// of the last root.
    pub fn visit_every_root(
        &self,
        op: &'static str,
        path: &Path,
        mut visit: impl FnMut(RootIndex, &Path) -> HybridResult<()>,
    ) -> HybridResult<()> {
        let mut visited = false;
        let mut last_error = None;

        for index in self.registry().indices() {
            let attempt = self
                .resolver
                .physical_path(path, index)
                .and_then(|physical| visit(index, &physical));

            match attempt {
                Ok(()) => visited = true,
                Err(error) => {
                    tracing::trace!(
                        op,
                        root = %index,
                        path = %path.display(),
                        %error,
                        "backing root skipped"
                    );
                    last_error = Some(error);
                }
            }
        }

        if visited {
            return Ok(());
        }

        Err(self.exhausted(op, path, last_error))
    }

    fn dispatch<T>(
        &self,
        op: &'static str,
        path: &Path,
        mut attempt: impl FnMut(RootIndex) -> HybridResult<(PathBuf, T)>,
    ) -> HybridResult<Dispatched<T>> {
        let mut last_error = None;

        for index in self.registry().indices() {
            match attempt(index) {
                Ok((physical_path, value)) => {
                    return Ok(Dispatched {
                        root: index,
                        physical_path,
                        value,
                    })
                }
                Err(error) => {
                    tracing::trace!(
                        op,
                        root = %index,
                        path = %path.display(),
                        %error,
                        "backing root rejected operation"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(self.exhausted(op, path, last_error))
    }

    fn exhausted(
        &self,
        op: &'static str,
        path: &Path,
        last_error: Option<HybridError>,
    ) -> HybridError {
        // The registry is never empty, so at least one attempt was made.
        let error = last_error.unwrap_or(HybridError::RequiresAtLeastOneRoot);
        tracing::debug!(op, path = %path.display(), %error, "all backing roots failed");
        error
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
