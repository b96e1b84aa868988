use std::sync::Mutex;

use crate::config::*;
use crate::error::{FsError, Result};
use crate::structs::{Block, BlockId};

pub trait BlockDevice: Send + Sync {
    /// Returns the number of blocks in the block device.
    fn num_blocks(&self) -> usize;

    /// Reads a block of data from the block device.
    /// buf.len() must be equal to block_size().
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()>;

    /// Writes a block of data to the block device.
    /// buf.len() must be equal to block_size().
    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()>;

    /// Flushes any buffered writes to the backing store.
    fn flush(&self) -> Result<()>;

    /// Returns the size of each block in bytes.
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }
}

/// Volatile device backed by a byte vector. Used by tests and for scratch volumes.
pub struct RamDisk {
    inner: Mutex<Vec<u8>>,
    num_blocks: usize,
}

impl RamDisk {
    pub fn new() -> Self {
        Self::with_blocks(BLOCK_COUNT)
    }

    pub fn with_blocks(num_blocks: usize) -> Self {
        Self {
            inner: Mutex::new(vec![0u8; num_blocks * BLOCK_SIZE]),
            num_blocks,
        }
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for RamDisk {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()> {
        if block_id >= self.num_blocks {
            return Err(FsError::InvalidBlockId);
        }
        if buf.len() != BLOCK_SIZE {
            return Err(FsError::InvalidArgument);
        }
        let start = block_id * BLOCK_SIZE;
        let data = self.inner.lock().map_err(|_| FsError::IoError)?;
        buf.copy_from_slice(&data[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()> {
        if block_id >= self.num_blocks {
            return Err(FsError::InvalidBlockId);
        }
        if buf.len() != BLOCK_SIZE {
            return Err(FsError::InvalidArgument);
        }
        let start = block_id * BLOCK_SIZE;
        let mut data = self.inner.lock().map_err(|_| FsError::IoError)?;
        data[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

pub fn read_raw(device: &impl BlockDevice, block_id: usize) -> Result<Block> {
    let mut buf = [0u8; BLOCK_SIZE];
    device.read_block(block_id, &mut buf)?;
    Ok(buf)
}

/// Reads a block from the data region. Addresses outside of it are rejected.
pub fn read_data_block(device: &impl BlockDevice, addr: BlockId) -> Result<Block> {
    if !addr.is_data() {
        return Err(FsError::InvalidBlockId);
    }
    read_raw(device, addr.index())
}

pub fn write_data_block(device: &impl BlockDevice, addr: BlockId, block: &Block) -> Result<()> {
    if !addr.is_data() {
        return Err(FsError::InvalidBlockId);
    }
    device.write_block(addr.index(), block)
}

/// Loads the pointer table of an indirect block.
pub fn read_indirect(
    device: &impl BlockDevice,
    addr: BlockId,
) -> Result<[Option<BlockId>; ADDRS_PER_BLOCK]> {
    let block = read_data_block(device, addr)?;
    let mut ptrs = [None; ADDRS_PER_BLOCK];
    for (i, ptr) in ptrs.iter_mut().enumerate() {
        let at = i * ADDR_SIZE;
        *ptr = BlockId::from_slot(u16::from_le_bytes([block[at], block[at + 1]]));
    }
    Ok(ptrs)
}

pub fn write_indirect(
    device: &impl BlockDevice,
    addr: BlockId,
    ptrs: &[Option<BlockId>; ADDRS_PER_BLOCK],
) -> Result<()> {
    let mut block = [0u8; BLOCK_SIZE];
    for (i, ptr) in ptrs.iter().enumerate() {
        let at = i * ADDR_SIZE;
        block[at..at + ADDR_SIZE].copy_from_slice(&BlockId::to_slot(*ptr).to_le_bytes());
    }
    write_data_block(device, addr, &block)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ram_disk_bounds() {
        let rd = RamDisk::with_blocks(4);
        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(rd.read_block(4, &mut buf), Err(FsError::InvalidBlockId));
        assert_eq!(rd.write_block(0, &buf[..10]), Err(FsError::InvalidArgument));
        buf[3] = 9;
        rd.write_block(3, &buf).unwrap();
        assert_eq!(read_raw(&rd, 3).unwrap()[3], 9);
    }

    #[test]
    fn test_data_region_guard() {
        let rd = RamDisk::new();
        let block = [1u8; BLOCK_SIZE];
        let meta = BlockId::new(SUPER_START as u16);
        assert_eq!(write_data_block(&rd, meta, &block), Err(FsError::InvalidBlockId));
        assert_eq!(read_data_block(&rd, BlockId::TERMINATOR), Err(FsError::InvalidBlockId));
        write_data_block(&rd, BlockId::FIRST_DATA, &block).unwrap();
        assert_eq!(read_data_block(&rd, BlockId::FIRST_DATA).unwrap(), block);
    }

    #[test]
    fn test_indirect_table() {
        let rd = RamDisk::new();
        let mut ptrs = [None; ADDRS_PER_BLOCK];
        ptrs[0] = Some(BlockId::new(100));
        ptrs[31] = Some(BlockId::new(1599));
        write_indirect(&rd, BlockId::FIRST_DATA, &ptrs).unwrap();
        assert_eq!(read_indirect(&rd, BlockId::FIRST_DATA).unwrap(), ptrs);
    }
}
