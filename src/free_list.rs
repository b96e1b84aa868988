//! Management of the free data block list.
//! Every free block stores the address of the next free block in its first
//! two bytes. The superblock holds the head, and `BLOCK_COUNT` terminates
//! the chain. Blocks are handed out and taken back at the head (LIFO).

use std::collections::HashSet;

use crate::block_dev::{read_data_block, write_data_block, BlockDevice};
use crate::config::*;
use crate::error::{FsError, Result};
use crate::structs::BlockId;
use crate::superblock::{write_superblock, SuperBlock};

fn next_of(block: &[u8]) -> BlockId {
    BlockId::new(u16::from_le_bytes([block[0], block[1]]))
}

fn link_block(next: BlockId) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[0..ADDR_SIZE].copy_from_slice(&next.get().to_le_bytes());
    block
}

/// Pops the head of the free list. The returned block is zeroed.
pub fn allocate_block(device: &impl BlockDevice, superblock: &mut SuperBlock) -> Result<BlockId> {
    let head = superblock.first_free_block;
    if head == BlockId::TERMINATOR {
        log::debug!("free list exhausted");
        return Err(FsError::OutOfSpace);
    }
    if !head.is_data() {
        log::warn!("free list head {} is outside the data region", head);
        return Err(FsError::Corrupted);
    }

    let Some(free) = superblock.block_free_count.checked_sub(1) else {
        log::warn!("free list head {} with no blocks counted free", head);
        return Err(FsError::Corrupted);
    };
    let next = next_of(&read_data_block(device, head)?);
    if next != BlockId::TERMINATOR && !next.is_data() {
        log::warn!("free block {} links to {}", head, next);
        return Err(FsError::Corrupted);
    }
    write_data_block(device, head, &[0u8; BLOCK_SIZE])?;

    superblock.first_free_block = next;
    superblock.block_free_count = free;
    superblock.block_used_count += 1;
    write_superblock(device, superblock)?;

    log::debug!("allocated block {}, next free {}", head, next);
    Ok(head)
}

/// Returns `addr` to the head of the free list.
pub fn free_block(
    device: &impl BlockDevice,
    superblock: &mut SuperBlock,
    addr: BlockId,
) -> Result<()> {
    if !addr.is_data() {
        log::warn!("refusing to free block {} outside the data region", addr);
        return Err(FsError::InvalidBlockId);
    }
    if addr == superblock.first_free_block || superblock.block_used_count == 0 {
        log::warn!("block {} freed twice", addr);
        return Err(FsError::DoubleFree);
    }

    write_data_block(device, addr, &link_block(superblock.first_free_block))?;

    superblock.first_free_block = addr;
    superblock.block_free_count += 1;
    superblock.block_used_count -= 1;
    write_superblock(device, superblock)?;

    log::debug!("freed block {}", addr);
    Ok(())
}

/// Links every data block to its successor, in ascending order.
pub fn init_free_list(device: &impl BlockDevice) -> Result<()> {
    for addr in DATA_START..BLOCK_COUNT {
        let next = BlockId::new((addr + 1) as u16);
        write_data_block(device, BlockId::new(addr as u16), &link_block(next))?;
    }
    Ok(())
}

/// Walks the chain from the head and counts its blocks.
pub fn free_list_len(device: &impl BlockDevice, superblock: &SuperBlock) -> Result<usize> {
    let mut visited = HashSet::new();
    let mut cur = superblock.first_free_block;
    while cur != BlockId::TERMINATOR {
        if !cur.is_data() || !visited.insert(cur) {
            log::warn!("free list broken at {}", cur);
            return Err(FsError::Corrupted);
        }
        cur = next_of(&read_data_block(device, cur)?);
    }
    Ok(visited.len())
}
