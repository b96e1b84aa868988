//! Block device backed by a flat image file on the host.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::block_dev::BlockDevice;
use crate::config::*;
use crate::error::{FsError, Result};

pub struct DiskImage {
    file: Mutex<File>,
    path: PathBuf,
}

fn io_error(path: &Path, what: &str, e: std::io::Error) -> FsError {
    log::error!("{} {}: {}", what, path.display(), e);
    FsError::IoError
}

impl DiskImage {
    /// Creates (or truncates) an image of exactly `FS_SIZE` bytes.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| io_error(&path, "create", e))?;
        file.set_len(FS_SIZE as u64).map_err(|e| io_error(&path, "resize", e))?;
        log::debug!("created image {}", path.display());
        Ok(Self { file: Mutex::new(file), path })
    }

    /// Opens an existing image. Images shorter than `FS_SIZE` are rejected.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_error(&path, "open", e))?;
        let len = file.metadata().map_err(|e| io_error(&path, "stat", e))?.len();
        if len < FS_SIZE as u64 {
            log::warn!("image {} is {} bytes, expected {}", path.display(), len, FS_SIZE);
            return Err(FsError::InvalidImage);
        }
        Ok(Self { file: Mutex::new(file), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockDevice for DiskImage {
    fn num_blocks(&self) -> usize {
        BLOCK_COUNT
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()> {
        if block_id >= BLOCK_COUNT {
            return Err(FsError::InvalidBlockId);
        }
        if buf.len() != BLOCK_SIZE {
            return Err(FsError::InvalidArgument);
        }
        let mut file = self.file.lock().map_err(|_| FsError::IoError)?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .and_then(|_| file.read_exact(buf))
            .map_err(|e| io_error(&self.path, "read", e))?;
        log::trace!("read block {}", block_id);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()> {
        if block_id >= BLOCK_COUNT {
            return Err(FsError::InvalidBlockId);
        }
        if buf.len() != BLOCK_SIZE {
            return Err(FsError::InvalidArgument);
        }
        let mut file = self.file.lock().map_err(|_| FsError::IoError)?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .and_then(|_| file.write_all(buf))
            .map_err(|e| io_error(&self.path, "write", e))?;
        log::trace!("wrote block {}", block_id);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut file = self.file.lock().map_err(|_| FsError::IoError)?;
        file.flush()
            .and_then(|_| file.sync_data())
            .map_err(|e| io_error(&self.path, "sync", e))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.img");
        let image = DiskImage::create(&path).unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = 0x42;
        image.write_block(BLOCK_COUNT - 1, &block).unwrap();
        image.flush().unwrap();
        drop(image);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), FS_SIZE as u64);
        let image = DiskImage::open(&path).unwrap();
        let mut read = [0u8; BLOCK_SIZE];
        image.read_block(BLOCK_COUNT - 1, &mut read).unwrap();
        assert_eq!(read, block);
        assert_eq!(image.read_block(BLOCK_COUNT, &mut read), Err(FsError::InvalidBlockId));
    }

    #[test]
    fn test_short_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.img");
        std::fs::write(&path, [0u8; 100]).unwrap();
        assert_eq!(DiskImage::open(&path).map(|_| ()), Err(FsError::InvalidImage));
        assert_eq!(
            DiskImage::open(dir.path().join("missing.img")).map(|_| ()),
            Err(FsError::IoError)
        );
    }
}
