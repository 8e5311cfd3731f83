use std::path::PathBuf;

use clap::Parser;

use crate::{HybridConfig, OpenStrategy, ReaddirPolicy, UNION_ROOT};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `hybridfs` overlays several directory trees into one union filesystem
#[derive(Debug, Parser)]
#[command(name = "hybridfs", author, styles=styles::styles())]
pub struct HybridfsArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<HybridfsSubcommand>,

    /// Enable verbose logging
    #[arg(short = 'V', long, global = true)]
    pub verbose: bool,

    /// List each name once in directory listings, taking the highest-priority entry
    #[arg(long, global = true)]
    pub merge_dirs: bool,

    /// Try to open paths exactly as given before scanning the roots
    #[arg(long, global = true)]
    pub passthrough_open: bool,

    /// Show version
    #[arg(short = 'v', long)]
    pub version: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum HybridfsSubcommand {
    /// Validate mount arguments and show the backing roots
    #[command(name = "check")]
    Check {
        /// Existing, empty directory to mount the union on
        #[arg(value_name = "MOUNTPOINT")]
        mount_point: PathBuf,

        /// Backing roots, highest priority first
        #[arg(value_name = "ROOTS", required = true)]
        roots: Vec<PathBuf>,
    },

    /// List a directory of the union
    #[command(name = "ls")]
    Ls {
        /// Path inside the union
        #[arg(value_name = "PATH", default_value = UNION_ROOT)]
        path: PathBuf,

        /// Backing roots, highest priority first
        #[arg(short, long = "root", value_name = "ROOT", required = true)]
        roots: Vec<PathBuf>,
    },

    /// Show the attributes of a path in the union
    #[command(name = "stat")]
    Stat {
        /// Path inside the union
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Backing roots, highest priority first
        #[arg(short, long = "root", value_name = "ROOT", required = true)]
        roots: Vec<PathBuf>,
    },

    /// Print the contents of a file in the union
    #[command(name = "cat")]
    Cat {
        /// Path inside the union
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Backing roots, highest priority first
        #[arg(short, long = "root", value_name = "ROOT", required = true)]
        roots: Vec<PathBuf>,
    },

    /// Show which backing root serves a path
    #[command(name = "which")]
    Which {
        /// Path inside the union
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Backing roots, highest priority first
        #[arg(short, long = "root", value_name = "ROOT", required = true)]
        roots: Vec<PathBuf>,
    },
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl HybridfsArgs {
    /// Builds the filesystem configuration for `roots` from the global flags.
    pub fn hybrid_config(&self, roots: &[PathBuf]) -> HybridConfig {
        let readdir_policy = if self.merge_dirs {
            ReaddirPolicy::Merge
        } else {
            ReaddirPolicy::Concatenate
        };

        let open_strategy = if self.passthrough_open {
            OpenStrategy::Passthrough
        } else {
            OpenStrategy::Resolved
        };

        HybridConfig::builder()
            .roots(roots.to_vec())
            .readdir_policy(readdir_policy)
            .open_strategy(open_strategy)
            .build()
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
