use std::fmt::Write as _;
use std::sync::Arc;

use crate::block_dev::{read_indirect, BlockDevice};
use crate::config::*;
use crate::directory::{create_entry, delete_entry, read_dir};
use crate::error::{FsError, Result};
use crate::file::{FileHandle, OpenFile, OpenFileTable};
use crate::free_list::{free_list_len, init_free_list};
use crate::inode::{free_inode, read_inode, write_inode};
use crate::path::{resolve, Resolution};
use crate::structs::*;
use crate::superblock::{read_superblock, write_superblock, SuperBlock};

/// Lays out an empty filesystem on `device`: zeroed boot block, superblock,
/// root directory, unused inodes and an ascending free list.
pub fn format<D: BlockDevice>(device: &D, name: &str) -> Result<()> {
    if device.num_blocks() < BLOCK_COUNT {
        return Err(FsError::InvalidImage);
    }
    let mut superblock = SuperBlock::new(name)?;

    let zero = [0u8; BLOCK_SIZE];
    for block_id in 0..BLOCK_COUNT {
        device.write_block(block_id, &zero)?;
    }
    for inumber in Inumber::all() {
        write_inode(device, &Inode::unused(inumber))?;
    }
    write_inode(device, &Inode::new(Inumber::ROOT, FileType::Directory, Mode::ReadWrite))?;
    superblock.inode_free_count = INODE_COUNT as u16 - 1;

    init_free_list(device)?;
    write_superblock(device, &superblock)?;
    device.flush()?;

    log::info!("formatted {:?}: {} data blocks, {} inodes", name, DATA_BLOCK_COUNT, INODE_COUNT);
    Ok(())
}

/// Space and inode usage, as reported by `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub inodes: u64,
    pub inodes_free: u64,
    pub name_max: u32,
}

/// A mounted filesystem session. Owns the device, the in-memory superblock and
/// the open-file table; every operation runs to completion on `&mut self`.
pub struct FileSystem<D: BlockDevice> {
    device: Arc<D>,
    superblock: SuperBlock,
    open_files: OpenFileTable,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Formats `device` and mounts the result.
    pub fn format(device: Arc<D>, name: &str) -> Result<Self> {
        format(&*device, name)?;
        Self::mount(device)
    }

    pub fn mount(device: Arc<D>) -> Result<Self> {
        if device.num_blocks() < BLOCK_COUNT {
            return Err(FsError::InvalidImage);
        }
        let superblock = read_superblock(&*device)?;
        let root = read_inode(&*device, Inumber::ROOT)?;
        if !root.used || !root.is_dir() {
            log::warn!("root inode is not a directory");
            return Err(FsError::Corrupted);
        }
        log::info!(
            "mounted {:?}: {} of {} blocks free, {} inodes free",
            superblock.name,
            superblock.block_free_count,
            DATA_BLOCK_COUNT,
            superblock.inode_free_count
        );
        Ok(Self {
            device,
            superblock,
            open_files: OpenFileTable::new(),
        })
    }

    /// Persists the superblock and flushes the device. Open handles are dropped.
    pub fn unmount(self) -> Result<()> {
        if !self.open_files.is_empty() {
            log::warn!("unmounting with {} open files", self.open_files.len());
        }
        write_superblock(&*self.device, &self.superblock)?;
        self.device.flush()?;
        log::info!("unmounted {:?}", self.superblock.name);
        Ok(())
    }

    // Following methods directly operate on the fs instance, user should wrap a lock around it if needed.

    /// Opens the file at `path`, creating it with `mode` when only the final
    /// component is missing.
    pub fn open(&mut self, path: &str, mode: Mode) -> Result<FileHandle> {
        let device = &*self.device;
        let inode = match resolve(device, path)? {
            Resolution::Root(_) => return Err(FsError::IsDirectory),
            Resolution::Found { inode, .. } => {
                if inode.is_dir() {
                    return Err(FsError::IsDirectory);
                }
                if mode == Mode::ReadWrite && inode.mode == Mode::ReadOnly {
                    return Err(FsError::PermissionDenied);
                }
                if !self.open_files.has_free_slot() {
                    return Err(FsError::TooManyOpenFiles);
                }
                inode
            }
            Resolution::Missing { mut parent, name } => {
                if !self.open_files.has_free_slot() {
                    return Err(FsError::TooManyOpenFiles);
                }
                create_entry(device, &mut self.superblock, &mut parent, name, FileType::File, mode)?
            }
        };
        let handle = self.open_files.insert(OpenFile::open(device, inode, mode)?)?;
        log::debug!("open {} ({:?}) -> {:?}", path, mode, handle);
        Ok(handle)
    }

    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        self.open_files.remove(handle)?;
        Ok(())
    }

    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let file = self.open_files.get_mut(handle)?;
        file.read(&*self.device, buf)
    }

    /// Writes at the session's cursor. Other sessions on the same file see
    /// the new size and block pointers right away.
    pub fn write(&mut self, handle: FileHandle, buf: &[u8]) -> Result<usize> {
        let file = self.open_files.get_mut(handle)?;
        let written = file.write(&*self.device, &mut self.superblock, buf);
        let inode = *file.inode();
        self.open_files.sync(handle, &inode);
        written
    }

    pub fn seek(&mut self, handle: FileHandle, offset: u32) -> Result<()> {
        self.open_files.get_mut(handle)?.seek(offset)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<Inumber> {
        match resolve(&*self.device, path)? {
            Resolution::Root(_) | Resolution::Found { .. } => Err(FsError::AlreadyExists),
            Resolution::Missing { mut parent, name } => {
                let inode = create_entry(
                    &*self.device,
                    &mut self.superblock,
                    &mut parent,
                    name,
                    FileType::Directory,
                    Mode::ReadWrite,
                )?;
                Ok(inode.inumber)
            }
        }
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        match resolve(&*self.device, path)? {
            Resolution::Root(_) => Err(FsError::Busy),
            Resolution::Missing { .. } => Err(FsError::NotFound),
            Resolution::Found { mut parent, name, mut inode } => {
                if !inode.is_dir() {
                    return Err(FsError::NotDirectory);
                }
                if inode.size > 0 {
                    return Err(FsError::NotEmpty);
                }
                delete_entry(&*self.device, &mut self.superblock, &mut parent, name)?;
                free_inode(&*self.device, &mut self.superblock, &mut inode)
            }
        }
    }

    /// Removes a regular file that no session has open.
    pub fn rm(&mut self, path: &str) -> Result<()> {
        match resolve(&*self.device, path)? {
            Resolution::Root(_) => Err(FsError::IsDirectory),
            Resolution::Missing { .. } => Err(FsError::NotFound),
            Resolution::Found { mut parent, name, mut inode } => {
                if inode.is_dir() {
                    return Err(FsError::IsDirectory);
                }
                if self.open_files.is_open(inode.inumber) {
                    log::warn!("refusing to remove open file {}", path);
                    return Err(FsError::Busy);
                }
                delete_entry(&*self.device, &mut self.superblock, &mut parent, name)?;
                free_inode(&*self.device, &mut self.superblock, &mut inode)
            }
        }
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let dir = resolve(&*self.device, path)?.inode()?;
        read_dir(&*self.device, &dir)
    }

    pub fn get_attributes(&self, path: &str) -> Result<Inode> {
        resolve(&*self.device, path)?.inode()
    }

    /// Reads an in-use inode by number.
    pub fn get_inode(&self, inumber: Inumber) -> Result<Inode> {
        let inode = read_inode(&*self.device, inumber)?;
        if !inode.used {
            return Err(FsError::NotFound);
        }
        Ok(inode)
    }

    pub fn statfs(&self) -> StatFs {
        StatFs {
            block_size: BLOCK_SIZE as u32,
            blocks: DATA_BLOCK_COUNT as u64,
            blocks_free: self.superblock.block_free_count as u64,
            inodes: INODE_COUNT as u64,
            inodes_free: self.superblock.inode_free_count as u64,
            name_max: FILE_NAME_MAX as u32,
        }
    }

    /// Cross-checks the superblock counters against the free list and the
    /// blocks reachable from used inodes.
    pub fn check(&self) -> Result<()> {
        let device = &*self.device;
        let sb = &self.superblock;
        let mut ok = true;

        if sb.block_used_count as usize + sb.block_free_count as usize != DATA_BLOCK_COUNT {
            log::warn!(
                "check: used {} + free {} != {}",
                sb.block_used_count,
                sb.block_free_count,
                DATA_BLOCK_COUNT
            );
            ok = false;
        }
        let chain = free_list_len(device, sb)?;
        if chain != sb.block_free_count as usize {
            log::warn!(
                "check: free list holds {} blocks, superblock says {}",
                chain,
                sb.block_free_count
            );
            ok = false;
        }

        let mut used_inodes = 0;
        let mut referenced = 0;
        for inumber in Inumber::all() {
            let inode = read_inode(device, inumber)?;
            if !inode.used {
                continue;
            }
            used_inodes += 1;
            referenced += inode.direct.iter().map_while(|p| *p).count();
            for indirect in inode.indirect.iter().map_while(|p| *p) {
                referenced += 1 + read_indirect(device, indirect)?.iter().map_while(|p| *p).count();
            }
            if inode.block_count() > inode_blocks(device, &inode)? {
                log::warn!("check: inode {} size {} exceeds its blocks", inumber, inode.size);
                ok = false;
            }
        }
        let expected_inodes = INODE_COUNT - sb.inode_free_count as usize;
        if used_inodes != expected_inodes {
            log::warn!("check: {} inodes in use, superblock says {}", used_inodes, expected_inodes);
            ok = false;
        }
        if referenced != sb.block_used_count as usize {
            log::warn!("check: inodes reference {} blocks, superblock says {}", referenced, sb.block_used_count);
            ok = false;
        }

        if ok { Ok(()) } else { Err(FsError::Corrupted) }
    }

    /// Renders the superblock and every used inode.
    pub fn dump(&self) -> String {
        let mut out = format!("{}\n", self.superblock);
        for inumber in Inumber::all() {
            let Ok(inode) = read_inode(&*self.device, inumber) else {
                let _ = writeln!(out, "inode {inumber}: unreadable");
                continue;
            };
            if !inode.used {
                continue;
            }
            let kind = if inode.is_dir() { "dir " } else { "file" };
            let _ = write!(
                out,
                "inode {:>2} {} {:?} size {:>4} blocks [",
                inumber.get(),
                kind,
                inode.mode,
                inode.size
            );
            for addr in inode.direct.iter().chain(inode.indirect.iter()).map_while(|p| *p) {
                let _ = write!(out, " {}", addr.get());
            }
            let _ = writeln!(out, " ]");
        }
        out
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub fn device(&self) -> Arc<D> {
        Arc::clone(&self.device)
    }

    pub fn flush(&self) -> Result<()> {
        write_superblock(&*self.device, &self.superblock)?;
        self.device.flush()
    }
}

/// Number of data blocks an inode points at, excluding indirect blocks.
fn inode_blocks(device: &impl BlockDevice, inode: &Inode) -> Result<usize> {
    let mut count = inode.direct.iter().map_while(|p| *p).count();
    for indirect in inode.indirect.iter().map_while(|p| *p) {
        count += read_indirect(device, indirect)?.iter().map_while(|p| *p).count();
    }
    Ok(count)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block_dev::RamDisk;

    fn fresh() -> FileSystem<RamDisk> {
        FileSystem::format(Arc::new(RamDisk::new()), "unit").unwrap()
    }

    #[test]
    fn test_format_layout() {
        let fs = fresh();
        let sb = fs.superblock();
        assert_eq!(sb.block_used_count, 0);
        assert_eq!(sb.block_free_count as usize, DATA_BLOCK_COUNT);
        assert_eq!(sb.inode_free_count as usize, INODE_COUNT - 1);
        assert_eq!(sb.first_free_block, BlockId::FIRST_DATA);
        let root = fs.get_attributes("/").unwrap();
        assert!(root.is_dir());
        assert_eq!(root.size, 0);
        fs.check().unwrap();
    }

    #[test]
    fn test_mount_rejects_small_device() {
        let rd = Arc::new(RamDisk::with_blocks(BLOCK_COUNT - 1));
        assert_eq!(FileSystem::mount(rd).map(|_| ()), Err(FsError::InvalidImage));
        let blank = Arc::new(RamDisk::new());
        assert_eq!(FileSystem::mount(blank).map(|_| ()), Err(FsError::InvalidSuperBlock));
    }

    #[test]
    fn test_open_errors() {
        let mut fs = fresh();
        fs.mkdir("/d").unwrap();
        assert_eq!(fs.open("/", Mode::ReadOnly), Err(FsError::IsDirectory));
        assert_eq!(fs.open("/d", Mode::ReadWrite), Err(FsError::IsDirectory));
        assert_eq!(fs.open("/x/y", Mode::ReadWrite), Err(FsError::InvalidPath));

        let ro = fs.open("/ro", Mode::ReadOnly).unwrap();
        assert_eq!(fs.write(ro, b"data"), Err(FsError::NotWritable));
        fs.close(ro).unwrap();
        assert_eq!(fs.open("/ro", Mode::ReadWrite), Err(FsError::PermissionDenied));
        assert_eq!(fs.close(ro), Err(FsError::BadHandle));
    }

    #[test]
    fn test_dump_lists_used_inodes() {
        let mut fs = fresh();
        fs.mkdir("/sub").unwrap();
        let dump = fs.dump();
        assert!(dump.contains("inode  1 dir"));
        assert!(dump.contains("inode  2 dir"));
    }
}
