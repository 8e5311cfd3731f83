use std::{
    io::Write,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
};

use clap::{CommandFactory, Parser};
use hybridfs::{
    cli::{AnsiStyles, HybridfsArgs, HybridfsSubcommand},
    FileKind, HybridFileSystem, MountConfig, UnionFileSystem,
};
use nix::fcntl::OFlag;
use tracing::Level;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The number of bytes `cat` reads per request.
const CAT_CHUNK_SIZE: usize = 64 * 1024;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let args = HybridfsArgs::parse();

    // Initialize logging
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if args.version {
        println!("hybridfs {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match &args.subcommand {
        Some(HybridfsSubcommand::Check { mount_point, roots }) => {
            let config = match MountConfig::from_args(mount_point, roots) {
                Ok(config) => config,
                Err(error) if error.is_configuration() => {
                    eprintln!("{} {error}", "invalid mount arguments:".error());
                    std::process::exit(2);
                }
                Err(error) => return Err(error.into()),
            };
            println!(
                "{} {}",
                "mount point".header(),
                config.get_mount_point().display()
            );
            for (index, root) in config.get_roots().iter().enumerate() {
                println!("{} {}", format!("#{index}").literal(), root.display());
            }
        }
        Some(HybridfsSubcommand::Ls { path, roots }) => {
            let fs = open_union(&args, roots)?;
            for entry in fs.readdir(path)? {
                println!(
                    "{:<10} {} {}",
                    kind_label(entry.get_kind()),
                    format!("{}", entry.get_root()).literal(),
                    entry.get_name().to_string_lossy()
                );
            }
        }
        Some(HybridfsSubcommand::Stat { path, roots }) => {
            let fs = open_union(&args, roots)?;
            let found = fs.which(path)?;
            let metadata = found.get_value();
            println!("{} {}", "path".header(), path.display());
            println!(
                "{} {}",
                "kind".header(),
                kind_label(Some(FileKind::from(metadata.file_type())))
            );
            println!("{} {}", "size".header(), metadata.len());
            println!(
                "{} {:o}",
                "mode".header(),
                metadata.permissions().mode() & 0o7777
            );
            println!("{} {}:{}", "owner".header(), metadata.uid(), metadata.gid());
            println!("{} {}", "inode".header(), metadata.ino());
            println!("{} {}", "root".header(), found.get_root());
        }
        Some(HybridfsSubcommand::Cat { path, roots }) => {
            let fs = open_union(&args, roots)?;
            cat(&fs, path)?;
        }
        Some(HybridfsSubcommand::Which { path, roots }) => {
            let fs = open_union(&args, roots)?;
            let found = fs.which(path)?;
            println!(
                "{} {}",
                format!("{}", found.get_root()).literal(),
                found.get_physical_path().display()
            );
        }
        None => {
            HybridfsArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: *
//--------------------------------------------------------------------------------------------------

fn open_union(args: &HybridfsArgs, roots: &[PathBuf]) -> anyhow::Result<HybridFileSystem> {
    Ok(HybridFileSystem::new(args.hybrid_config(roots))?)
}

/// Streams the file at `path` to stdout through a session.
fn cat(fs: &HybridFileSystem, path: &Path) -> anyhow::Result<()> {
    let session = fs.open(path, OFlag::O_RDONLY)?;
    let mut stdout = std::io::stdout().lock();

    let mut offset = 0;
    let copied = loop {
        let chunk = match fs.read(session, offset, CAT_CHUNK_SIZE) {
            Ok(chunk) => chunk,
            Err(error) => break Err(anyhow::Error::from(error)),
        };

        if chunk.is_empty() {
            break Ok(());
        }

        if let Err(error) = stdout.write_all(&chunk) {
            break Err(anyhow::Error::from(error));
        }

        offset += chunk.len() as u64;
    };

    fs.release(session);
    copied?;
    stdout.flush()?;
    Ok(())
}

fn kind_label(kind: Option<FileKind>) -> String {
    let label = match kind {
        Some(FileKind::File) => "file",
        Some(FileKind::Directory) => "directory",
        Some(FileKind::Symlink) => "symlink",
        Some(FileKind::Fifo) => "fifo",
        Some(FileKind::CharDevice) => "char",
        Some(FileKind::BlockDevice) => "block",
        Some(FileKind::Socket) => "socket",
        None => "unknown",
    };

    label.placeholder()
}
