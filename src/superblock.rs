//! The superblock: filesystem-wide counters and the free-list head.

use core::fmt;

use crate::block_dev::{read_raw, BlockDevice};
use crate::config::*;
use crate::error::{FsError, Result};
use crate::structs::{BlockId, Inumber};

// Byte offsets inside the superblock region
const MAGIC_AT: usize = 0;
const FS_SIZE_AT: usize = 4;
const ROOT_AT: usize = 8;
const USED_AT: usize = 10;
const FREE_AT: usize = 12;
const INODE_FREE_AT: usize = 14;
const INODE_LIST_AT: usize = 16;
const FIRST_FREE_AT: usize = 18;
const NAME_AT: usize = 20;
const REGION_SIZE: usize = SUPER_BLOCKS * BLOCK_SIZE;

const _: () = assert!(NAME_AT + FS_NAME_MAX + 1 <= REGION_SIZE);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub name: String,
    pub fs_size: u32,
    pub root: Inumber,
    pub block_used_count: u16,
    pub block_free_count: u16,
    pub inode_free_count: u16,
    pub inode_list: u16,
    pub first_free_block: BlockId,
}

impl SuperBlock {
    /// Superblock of a freshly formatted image. The root inode is accounted
    /// for by the caller once it is written.
    pub fn new(name: &str) -> Result<Self> {
        if name.len() > FS_NAME_MAX || name.contains('\0') {
            return Err(FsError::InvalidArgument);
        }
        Ok(Self {
            name: name.to_string(),
            fs_size: FS_SIZE as u32,
            root: Inumber::ROOT,
            block_used_count: 0,
            block_free_count: DATA_BLOCK_COUNT as u16,
            inode_free_count: INODE_COUNT as u16,
            inode_list: INODE_LIST_START as u16,
            first_free_block: BlockId::FIRST_DATA,
        })
    }

    fn encode(&self) -> [u8; REGION_SIZE] {
        let mut buf = [0u8; REGION_SIZE];
        buf[MAGIC_AT..MAGIC_AT + 4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[FS_SIZE_AT..FS_SIZE_AT + 4].copy_from_slice(&self.fs_size.to_le_bytes());
        buf[ROOT_AT..ROOT_AT + 2].copy_from_slice(&(self.root.get() as u16).to_le_bytes());
        buf[USED_AT..USED_AT + 2].copy_from_slice(&self.block_used_count.to_le_bytes());
        buf[FREE_AT..FREE_AT + 2].copy_from_slice(&self.block_free_count.to_le_bytes());
        buf[INODE_FREE_AT..INODE_FREE_AT + 2].copy_from_slice(&self.inode_free_count.to_le_bytes());
        buf[INODE_LIST_AT..INODE_LIST_AT + 2].copy_from_slice(&self.inode_list.to_le_bytes());
        buf[FIRST_FREE_AT..FIRST_FREE_AT + 2]
            .copy_from_slice(&self.first_free_block.get().to_le_bytes());
        buf[NAME_AT..NAME_AT + self.name.len()].copy_from_slice(self.name.as_bytes());
        buf
    }

    fn decode(buf: &[u8; REGION_SIZE]) -> Result<Self> {
        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        if u32_at(MAGIC_AT) != MAGIC {
            return Err(FsError::InvalidSuperBlock);
        }
        let fs_size = u32_at(FS_SIZE_AT);
        let inode_list = u16_at(INODE_LIST_AT);
        if fs_size != FS_SIZE as u32 || inode_list != INODE_LIST_START as u16 {
            return Err(FsError::InvalidSuperBlock);
        }
        let root = u8::try_from(u16_at(ROOT_AT))
            .ok()
            .and_then(Inumber::new)
            .filter(|&root| root == Inumber::ROOT)
            .ok_or(FsError::InvalidSuperBlock)?;
        let used = u16_at(USED_AT);
        let free = u16_at(FREE_AT);
        if used as usize + free as usize != DATA_BLOCK_COUNT {
            return Err(FsError::InvalidSuperBlock);
        }
        let inode_free = u16_at(INODE_FREE_AT);
        if inode_free as usize >= INODE_COUNT {
            // The root is always in use
            return Err(FsError::InvalidSuperBlock);
        }
        let head = BlockId::new(u16_at(FIRST_FREE_AT));
        if head != BlockId::TERMINATOR && !head.is_data() {
            return Err(FsError::InvalidSuperBlock);
        }

        let name_field = &buf[NAME_AT..NAME_AT + FS_NAME_MAX + 1];
        let name_len = name_field.iter().position(|&c| c == 0).unwrap_or(FS_NAME_MAX);
        let name = String::from_utf8_lossy(&name_field[..name_len]).into_owned();

        Ok(Self {
            name,
            fs_size,
            root,
            block_used_count: used,
            block_free_count: free,
            inode_free_count: inode_free,
            inode_list,
            first_free_block: head,
        })
    }
}

impl fmt::Display for SuperBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SuperBlock {{")?;
        writeln!(f, "  name: {:?}", self.name)?;
        writeln!(f, "  fs_size: {} bytes, block_size: {}", self.fs_size, BLOCK_SIZE)?;
        writeln!(f, "  root: {}, inode_list: {}", self.root, self.inode_list)?;
        writeln!(
            f,
            "  blocks: {} used / {} free of {}",
            self.block_used_count, self.block_free_count, DATA_BLOCK_COUNT
        )?;
        writeln!(f, "  inodes: {} free of {}", self.inode_free_count, INODE_COUNT)?;
        writeln!(f, "  first_free_block: {}", self.first_free_block)?;
        write!(f, "}}")
    }
}

pub fn read_superblock<D: BlockDevice>(device: &D) -> Result<SuperBlock> {
    let mut buf = [0u8; REGION_SIZE];
    for i in 0..SUPER_BLOCKS {
        let block = read_raw(device, SUPER_START + i)?;
        buf[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE].copy_from_slice(&block);
    }
    SuperBlock::decode(&buf)
}

pub fn write_superblock<D: BlockDevice>(device: &D, superblock: &SuperBlock) -> Result<()> {
    let buf = superblock.encode();
    for (i, chunk) in buf.chunks_exact(BLOCK_SIZE).enumerate() {
        device.write_block(SUPER_START + i, chunk)?;
    }
    log::trace!(
        "superblock written: used={} free={} head={}",
        superblock.block_used_count,
        superblock.block_free_count,
        superblock.first_free_block
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block_dev::RamDisk;

    #[test]
    fn test_superblock_persist() {
        let rd = RamDisk::new();
        let mut sb = SuperBlock::new("scratch").unwrap();
        sb.inode_free_count -= 1;
        write_superblock(&rd, &sb).unwrap();
        assert_eq!(read_superblock(&rd).unwrap(), sb);
        assert_eq!(read_raw(&rd, SUPER_START).unwrap()[0..4], MAGIC.to_le_bytes());
    }

    #[test]
    fn test_superblock_rejects_garbage() {
        let rd = RamDisk::new();
        assert_eq!(read_superblock(&rd), Err(FsError::InvalidSuperBlock));

        let mut sb = SuperBlock::new("bad").unwrap();
        sb.inode_free_count -= 1;
        sb.block_used_count = 3; // counts no longer add up
        write_superblock(&rd, &sb).unwrap();
        assert_eq!(read_superblock(&rd), Err(FsError::InvalidSuperBlock));
    }

    #[test]
    fn test_long_name() {
        let name = "n".repeat(FS_NAME_MAX);
        let mut sb = SuperBlock::new(&name).unwrap();
        sb.inode_free_count -= 1;
        let rd = RamDisk::new();
        write_superblock(&rd, &sb).unwrap();
        assert_eq!(read_superblock(&rd).unwrap().name, name);
        assert!(SuperBlock::new(&"n".repeat(FS_NAME_MAX + 1)).is_err());
    }
}
