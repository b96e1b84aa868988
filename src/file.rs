//! Open-file sessions.
//! Each session keeps a snapshot of the inode, the cursor and the data block
//! the cursor currently sits in. Writes go straight through to the device.

use crate::block_dev::{read_data_block, write_data_block, BlockDevice};
use crate::config::*;
use crate::error::{FsError, Result};
use crate::inode::{attach_block, block_of, write_inode};
use crate::structs::*;
use crate::superblock::SuperBlock;

/// Index into the open-file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

impl FileHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw as usize)
    }

    pub fn raw(self) -> u64 {
        self.0 as u64
    }
}

#[derive(Debug, Clone)]
struct CachedBlock {
    index: usize,
    addr: BlockId,
    data: Block,
}

#[derive(Debug, Clone)]
pub struct OpenFile {
    inode: Inode,
    mode: Mode,
    cursor: u32,
    cached: Option<CachedBlock>,
}

impl OpenFile {
    /// Starts a session at offset 0, with block 0 loaded when the file has one.
    pub fn open(device: &impl BlockDevice, inode: Inode, mode: Mode) -> Result<Self> {
        let mut file = Self { inode, mode, cursor: 0, cached: None };
        file.load(device, 0)?;
        Ok(file)
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Makes logical block `index` the cached block, if it is allocated.
    fn load(&mut self, device: &impl BlockDevice, index: usize) -> Result<bool> {
        if self.cached.as_ref().is_some_and(|c| c.index == index) {
            return Ok(true);
        }
        if index >= MAX_FILE_BLOCKS {
            return Ok(false);
        }
        match block_of(device, &self.inode, index)? {
            Some(addr) => {
                let data = read_data_block(device, addr)?;
                self.cached = Some(CachedBlock { index, addr, data });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reads up to `buf.len()` bytes at the cursor. Returns 0 at end of file.
    pub fn read(&mut self, device: &impl BlockDevice, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.inode.size.saturating_sub(self.cursor) as usize;
        let total = buf.len().min(remaining);
        let mut done = 0;
        while done < total {
            let index = self.cursor as usize / BLOCK_SIZE;
            let offset = self.cursor as usize % BLOCK_SIZE;
            if !self.load(device, index)? {
                log::warn!("inode {} has no block {} below its size", self.inode.inumber, index);
                return Err(FsError::Corrupted);
            }
            let cached = self.cached.as_ref().ok_or(FsError::Corrupted)?;
            let take = (BLOCK_SIZE - offset).min(total - done);
            buf[done..done + take].copy_from_slice(&cached.data[offset..offset + take]);
            done += take;
            self.cursor += take as u32;
        }
        Ok(done)
    }

    /// Writes `buf` at the cursor, allocating blocks as the file grows.
    /// When space runs out partway, the bytes written so far are reported;
    /// the error is only returned if nothing could be written.
    pub fn write(
        &mut self,
        device: &impl BlockDevice,
        superblock: &mut SuperBlock,
        buf: &[u8],
    ) -> Result<usize> {
        if self.mode != Mode::ReadWrite {
            return Err(FsError::NotWritable);
        }
        let mut done = 0;
        while done < buf.len() {
            match self.write_block(device, superblock, &buf[done..]) {
                Ok(n) => done += n,
                Err(e) if done == 0 => return Err(e),
                Err(e) => {
                    log::debug!(
                        "short write on inode {}: {} of {} bytes ({})",
                        self.inode.inumber,
                        done,
                        buf.len(),
                        e
                    );
                    break;
                }
            }
        }
        Ok(done)
    }

    /// Writes as much of `buf` as fits in the block under the cursor.
    fn write_block(
        &mut self,
        device: &impl BlockDevice,
        superblock: &mut SuperBlock,
        buf: &[u8],
    ) -> Result<usize> {
        if self.cursor as usize >= FILE_SIZE_MAX {
            return Err(FsError::FileTooLarge);
        }
        let index = self.cursor as usize / BLOCK_SIZE;
        let offset = self.cursor as usize % BLOCK_SIZE;
        if !self.load(device, index)? {
            let addr = attach_block(device, superblock, &mut self.inode, index)?;
            self.cached = Some(CachedBlock { index, addr, data: [0u8; BLOCK_SIZE] });
        }
        let cached = self.cached.as_mut().ok_or(FsError::Corrupted)?;
        let take = (BLOCK_SIZE - offset).min(buf.len());
        cached.data[offset..offset + take].copy_from_slice(&buf[..take]);
        write_data_block(device, cached.addr, &cached.data)?;

        self.cursor += take as u32;
        if self.cursor > self.inode.size {
            self.inode.size = self.cursor;
            write_inode(device, &self.inode)?;
        }
        Ok(take)
    }

    /// Moves the cursor. Offsets past the end of the file are rejected.
    pub fn seek(&mut self, offset: u32) -> Result<()> {
        if offset > self.inode.size {
            return Err(FsError::InvalidArgument);
        }
        self.cursor = offset;
        Ok(())
    }
}

/// Fixed-size table of open sessions. Slot 0 belongs to the root directory
/// and is never handed out.
#[derive(Debug)]
pub struct OpenFileTable {
    slots: Vec<Option<OpenFile>>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self { slots: vec![None; MAX_OPEN_FILES] }
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().skip(1).any(Option::is_none)
    }

    pub fn insert(&mut self, file: OpenFile) -> Result<FileHandle> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .skip(1)
            .find(|(_, slot)| slot.is_none())
            .ok_or(FsError::TooManyOpenFiles)?;
        *slot = Some(file);
        Ok(FileHandle(index))
    }

    pub fn get_mut(&mut self, handle: FileHandle) -> Result<&mut OpenFile> {
        if handle.0 == 0 {
            return Err(FsError::BadHandle);
        }
        self.slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(FsError::BadHandle)
    }

    pub fn remove(&mut self, handle: FileHandle) -> Result<OpenFile> {
        if handle.0 == 0 {
            return Err(FsError::BadHandle);
        }
        self.slots
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or(FsError::BadHandle)
    }

    /// Hands the writer's copy of `inode` to every other session on the same
    /// file. Their cached blocks are dropped, since the writer may have
    /// changed them on disk.
    pub fn sync(&mut self, writer: FileHandle, inode: &Inode) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(file) if index != writer.0 && file.inode.inumber == inode.inumber => {
                    file.inode = *inode;
                    file.cached = None;
                }
                _ => {}
            }
        }
    }

    pub fn is_open(&self, inumber: Inumber) -> bool {
        self.slots.iter().flatten().any(|f| f.inode.inumber == inumber)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}
