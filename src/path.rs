//! Path resolution and manipulation utilities.

use crate::block_dev::BlockDevice;
use crate::config::*;
use crate::directory::lookup;
use crate::error::{FsError, Result};
use crate::inode::read_inode;
use crate::structs::*;

/// Splits an absolute or relative path into its components. Empty components
/// and `.` are skipped, so `/`, `.` and `//` all name the root.
pub fn components(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(FsError::InvalidArgument);
    }
    if path.len() > PATH_LEN_MAX {
        return Err(FsError::NameTooLong);
    }
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    if parts.len() > PATH_DEPTH_MAX {
        return Err(FsError::PathTooDeep);
    }
    Ok(parts)
}

/// Splits a path into its parent path and final name.
/// e.g. "/a/b/c" -> ("/a/b", "c"), "/c" -> ("/", "c")
pub fn split(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(at) => (&trimmed[..at], &trimmed[at + 1..]),
        None => (".", trimmed),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    Root(Inode),
    Found { parent: Inode, name: &'a str, inode: Inode },
    /// Only the final component is missing. `parent` is the directory a new
    /// entry would go into.
    Missing { parent: Inode, name: &'a str },
}

impl Resolution<'_> {
    /// The resolved inode, or `NotFound` when the final component is missing.
    pub fn inode(&self) -> Result<Inode> {
        match self {
            Resolution::Root(inode) | Resolution::Found { inode, .. } => Ok(*inode),
            Resolution::Missing { .. } => Err(FsError::NotFound),
        }
    }
}

/// Walks `path` from the root. Every intermediate component must name a
/// directory; the final one is looked up with either type.
pub fn resolve<'a>(device: &impl BlockDevice, path: &'a str) -> Result<Resolution<'a>> {
    let parts = components(path)?;
    let mut current = read_inode(device, Inumber::ROOT)?;
    let Some((&last, dirs)) = parts.split_last() else {
        return Ok(Resolution::Root(current));
    };

    for name in dirs {
        match lookup(device, &current, name, FileType::Directory)? {
            Some(inumber) => current = read_inode(device, inumber)?,
            None => {
                return match lookup(device, &current, name, FileType::File)? {
                    Some(_) => Err(FsError::NotDirectory),
                    None => Err(FsError::InvalidPath),
                };
            }
        }
    }

    match lookup(device, &current, last, FileType::File)? {
        Some(inumber) => Ok(Resolution::Found {
            parent: current,
            name: last,
            inode: read_inode(device, inumber)?,
        }),
        None => Ok(Resolution::Missing { parent: current, name: last }),
    }
}
