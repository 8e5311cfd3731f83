//! `hybridfs` presents several ordered backing directory trees as a single read/write union
//! filesystem.
//!
//! Every path-based operation is dispatched against the backing roots in priority order and the
//! first root that succeeds wins. Open files and directories are pinned to the root that produced
//! them for the rest of their lifetime.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod config;
mod defaults;
mod dispatch;
mod error;
mod filesystem;
mod implementations;
mod registry;
mod resolver;
mod session;
mod types;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;

pub use config::*;
pub use defaults::*;
pub use dispatch::*;
pub use error::*;
pub use filesystem::*;
pub use implementations::*;
pub use registry::*;
pub use resolver::*;
pub use session::*;
pub use types::*;
