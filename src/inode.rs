//! Management of reading and writing to inodes, and of the block pointers they hold.

use crate::block_dev::{read_indirect, read_raw, write_indirect, BlockDevice};
use crate::config::*;
use crate::error::{FsError, Result};
use crate::free_list::{allocate_block, free_block};
use crate::structs::*;
use crate::superblock::{write_superblock, SuperBlock};

pub fn read_inode(device: &impl BlockDevice, inumber: Inumber) -> Result<Inode> {
    let block = read_raw(device, inumber.block())?;
    Inode::decode(inumber, &block)
}

pub fn write_inode(device: &impl BlockDevice, inode: &Inode) -> Result<()> {
    device.write_block(inode.inumber.block(), &inode.encode())
}

/// Takes the first unused inode, scanning upward from inumber 1.
pub fn allocate_inode(
    device: &impl BlockDevice,
    superblock: &mut SuperBlock,
    ftype: FileType,
    mode: Mode,
) -> Result<Inode> {
    for inumber in Inumber::all() {
        if read_inode(device, inumber)?.used {
            continue;
        }
        let Some(free) = superblock.inode_free_count.checked_sub(1) else {
            log::warn!("inode {} is unused but no inodes are counted free", inumber);
            return Err(FsError::Corrupted);
        };
        let inode = Inode::new(inumber, ftype, mode);
        write_inode(device, &inode)?;
        superblock.inode_free_count = free;
        write_superblock(device, superblock)?;
        log::debug!("allocated inode {} ({:?})", inumber, ftype);
        return Ok(inode);
    }
    log::debug!("inode table exhausted");
    Err(FsError::OutOfInodes)
}

/// Releases every block reachable from `inode` and marks it unused.
/// Pointer lists are gapless, so each walk stops at the first empty slot.
pub fn free_inode(
    device: &impl BlockDevice,
    superblock: &mut SuperBlock,
    inode: &mut Inode,
) -> Result<()> {
    if inode.inumber == Inumber::ROOT {
        return Err(FsError::Busy);
    }
    if !inode.used {
        log::warn!("inode {} freed twice", inode.inumber);
        return Err(FsError::DoubleFree);
    }

    for addr in inode.direct.iter().map_while(|ptr| *ptr) {
        free_block(device, superblock, addr)?;
    }
    for indirect in inode.indirect.iter().map_while(|ptr| *ptr) {
        let ptrs = read_indirect(device, indirect)?;
        for addr in ptrs.iter().map_while(|ptr| *ptr) {
            free_block(device, superblock, addr)?;
        }
        free_block(device, superblock, indirect)?;
    }

    *inode = Inode {
        created: inode.created,
        ftype: inode.ftype,
        mode: inode.mode,
        ..Inode::unused(inode.inumber)
    };
    write_inode(device, inode)?;
    superblock.inode_free_count += 1;
    write_superblock(device, superblock)?;
    log::debug!("freed inode {}", inode.inumber);
    Ok(())
}

/// Position of a logical block within an inode's pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Direct(usize),
    /// Indirect block `.0`, pointer `.1` inside it.
    Indirect(usize, usize),
}

impl Slot {
    pub fn of(index: usize) -> Result<Self> {
        if index < BLKS_DIRECT {
            return Ok(Slot::Direct(index));
        }
        let rel = index - BLKS_DIRECT;
        if rel >= BLKS_INDIRECT * ADDRS_PER_BLOCK {
            return Err(FsError::FileTooLarge);
        }
        Ok(Slot::Indirect(rel / ADDRS_PER_BLOCK, rel % ADDRS_PER_BLOCK))
    }
}

/// Maps the logical block `index` of `inode` to its address, if allocated.
pub fn block_of(device: &impl BlockDevice, inode: &Inode, index: usize) -> Result<Option<BlockId>> {
    match Slot::of(index)? {
        Slot::Direct(i) => Ok(inode.direct[i]),
        Slot::Indirect(k, j) => match inode.indirect[k] {
            Some(indirect) => Ok(read_indirect(device, indirect)?[j]),
            None => Ok(None),
        },
    }
}

/// Allocates the logical block `index`, creating its indirect block first when
/// needed. The inode is persisted. Fails with `FileTooLarge` past the pointer
/// capacity and `OutOfSpace` when the free list runs dry.
pub fn attach_block(
    device: &impl BlockDevice,
    superblock: &mut SuperBlock,
    inode: &mut Inode,
    index: usize,
) -> Result<BlockId> {
    if let Some(addr) = block_of(device, inode, index)? {
        return Ok(addr);
    }
    let addr = match Slot::of(index)? {
        Slot::Direct(i) => {
            let addr = allocate_block(device, superblock)?;
            inode.direct[i] = Some(addr);
            addr
        }
        Slot::Indirect(k, j) => {
            let (indirect, fresh) = match inode.indirect[k] {
                Some(indirect) => (indirect, false),
                None => (allocate_block(device, superblock)?, true),
            };
            let addr = match allocate_block(device, superblock) {
                Ok(addr) => addr,
                Err(e) => {
                    if fresh {
                        free_block(device, superblock, indirect)?;
                    }
                    return Err(e);
                }
            };
            let mut ptrs = if fresh {
                [None; ADDRS_PER_BLOCK]
            } else {
                read_indirect(device, indirect)?
            };
            ptrs[j] = Some(addr);
            write_indirect(device, indirect, &ptrs)?;
            inode.indirect[k] = Some(indirect);
            addr
        }
    };
    write_inode(device, inode)?;
    log::trace!("inode {} block {} -> {}", inode.inumber, index, addr);
    Ok(addr)
}

/// Releases the logical block `index`. When it was the first pointer of an
/// indirect block, the indirect block goes too. The inode is persisted.
pub fn detach_block(
    device: &impl BlockDevice,
    superblock: &mut SuperBlock,
    inode: &mut Inode,
    index: usize,
) -> Result<()> {
    match Slot::of(index)? {
        Slot::Direct(i) => {
            let addr = inode.direct[i].take().ok_or(FsError::Corrupted)?;
            free_block(device, superblock, addr)?;
        }
        Slot::Indirect(k, j) => {
            let indirect = inode.indirect[k].ok_or(FsError::Corrupted)?;
            let mut ptrs = read_indirect(device, indirect)?;
            let addr = ptrs[j].take().ok_or(FsError::Corrupted)?;
            free_block(device, superblock, addr)?;
            if j == 0 {
                free_block(device, superblock, indirect)?;
                inode.indirect[k] = None;
            } else {
                write_indirect(device, indirect, &ptrs)?;
            }
        }
    }
    write_inode(device, inode)?;
    log::trace!("inode {} dropped block {}", inode.inumber, index);
    Ok(())
}
