use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nanofs", version, about = "Tiny inode filesystem in a disk image, served over FUSE")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh image holding an empty filesystem
    Format {
        image: PathBuf,
        /// Filesystem name stored in the superblock
        #[arg(long, short, default_value = "nanofs")]
        name: String,
    },
    /// Serve an image at a mount point until unmounted
    Mount {
        image: PathBuf,
        mount_point: PathBuf,
        /// Unmount automatically when the process exits
        #[arg(long)]
        auto_unmount: bool,
    },
    /// List a directory
    Ls {
        image: PathBuf,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create a directory
    Mkdir { image: PathBuf, path: String },
    /// Remove an empty directory
    Rmdir { image: PathBuf, path: String },
    /// Remove a file
    Rm { image: PathBuf, path: String },
    /// Copy a host file into the image
    Put {
        image: PathBuf,
        host_file: PathBuf,
        path: String,
    },
    /// Print a file from the image
    Cat { image: PathBuf, path: String },
    /// Show the superblock and used inodes
    Stat { image: PathBuf },
    /// Verify the free list and counters
    Check { image: PathBuf },
}
