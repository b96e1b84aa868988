//! nanofs is a tiny inode/block file system stored in a flat disk image and
//! served to the kernel through FUSE.
//! Geometry is fixed at compile time; see [`config`].
//!
//! nanofs's linear layout:
//! - Boot block (unused)
//! - Superblock (name, counters, free list head)
//! - Inode list, one inode per block
//! - Data blocks; free ones are chained through their first two bytes
//!
//! nanofs's layers (from bottom to top):
//! 1. Block Device: raw block I/O on an image file or in memory.      | `block_dev`, `disk_image`
//! 2. Free List: LIFO allocation of data blocks.                      | `free_list`, `superblock`
//! 3. Inode: metadata records and their direct/indirect pointers.      | `inode`
//! 4. Directory/Path: dense entry arrays and path walking.             | `directory`, `path`
//! 5. File: open sessions with a cursor and one cached block.          | `file`
//! 6. FileSystem: the mounted session every operation goes through.    | `fs`, `volume`
//! 7. FUSE: kernel callbacks mapped onto the layers above.             | `fuse`

pub mod config;
mod error;
mod structs;
mod block_dev;
mod disk_image;
mod superblock;
mod free_list;
mod inode;
mod directory;
mod path;
mod file;
mod fs;
mod volume;
pub mod fuse;

pub use block_dev::*;
pub use config::*;
pub use disk_image::DiskImage;
pub use superblock::*;
pub use structs::*;
pub use free_list::*;
pub use inode::*;
pub use directory::*;
pub use path::*;
pub use file::*;
pub use fs::*;
pub use volume::Volume;
pub use fuse::FuseAdapter;
pub use error::FsError as Error;
pub use error::{FsError, Result};
