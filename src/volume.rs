//! Mount state for one disk image.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::disk_image::DiskImage;
use crate::error::{FsError, Result};
use crate::fs::{format, FileSystem};

pub struct Volume {
    image: PathBuf,
    fs: Option<FileSystem<DiskImage>>,
}

impl Volume {
    pub fn new(image: impl AsRef<Path>) -> Self {
        Self {
            image: image.as_ref().to_path_buf(),
            fs: None,
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Creates a fresh image file and lays out an empty filesystem on it.
    pub fn format(&self, name: &str) -> Result<()> {
        if self.fs.is_some() {
            return Err(FsError::Busy);
        }
        let image = DiskImage::create(&self.image)?;
        format(&image, name)
    }

    pub fn mount(&mut self) -> Result<()> {
        if self.fs.is_some() {
            return Err(FsError::AlreadyMounted);
        }
        let image = DiskImage::open(&self.image)?;
        self.fs = Some(FileSystem::mount(Arc::new(image))?);
        Ok(())
    }

    pub fn unmount(&mut self) -> Result<()> {
        self.fs.take().ok_or(FsError::NotMounted)?.unmount()
    }

    pub fn is_mounted(&self) -> bool {
        self.fs.is_some()
    }

    pub fn fs(&mut self) -> Result<&mut FileSystem<DiskImage>> {
        self.fs.as_mut().ok_or(FsError::NotMounted)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = Volume::new(dir.path().join("vol.img"));
        assert_eq!(volume.mount(), Err(FsError::IoError));
        volume.format("vol").unwrap();
        assert_eq!(volume.unmount(), Err(FsError::NotMounted));
        assert!(volume.fs().is_err());

        volume.mount().unwrap();
        assert_eq!(volume.mount(), Err(FsError::AlreadyMounted));
        assert_eq!(volume.format("again"), Err(FsError::Busy));
        assert_eq!(volume.fs().unwrap().superblock().name, "vol");
        volume.unmount().unwrap();
        assert!(!volume.is_mounted());
    }
}
