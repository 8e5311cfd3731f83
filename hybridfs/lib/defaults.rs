//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default maximum length in bytes of a resolved physical path, including the trailing NUL the
/// kernel expects.
pub const DEFAULT_MAX_PATH_LEN: usize = libc::PATH_MAX as usize;

/// The virtual path of the union root.
pub const UNION_ROOT: &str = "/";
