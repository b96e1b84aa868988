//! Directory entry management.
//! A directory's data blocks form one dense array of entries, packed left to
//! right across its logical blocks. The directory inode's `size` is the
//! number of entries, so there are no per-slot markers and no holes.

use crate::block_dev::{read_data_block, write_data_block, BlockDevice};
use crate::config::*;
use crate::error::{FsError, Result};
use crate::inode::{allocate_inode, attach_block, block_of, detach_block, free_inode, read_inode, write_inode};
use crate::structs::*;
use crate::superblock::SuperBlock;

/// Logical block and slot of entry `pos`.
fn position(pos: usize) -> (usize, usize) {
    (pos / ENTRIES_PER_BLOCK, pos % ENTRIES_PER_BLOCK)
}

fn entry_block(device: &impl BlockDevice, dir: &Inode, index: usize) -> Result<BlockId> {
    block_of(device, dir, index)?.ok_or_else(|| {
        log::warn!("directory {} is missing block {}", dir.inumber, index);
        FsError::Corrupted
    })
}

/// Visits the first `size` entries of `dir` in order, one block read per block.
/// The scan stops early once `visit` returns `false`.
fn scan(
    device: &impl BlockDevice,
    dir: &Inode,
    mut visit: impl FnMut(usize, DirEntry) -> Result<bool>,
) -> Result<()> {
    let count = dir.size as usize;
    let mut pos = 0;
    while pos < count {
        let (index, _) = position(pos);
        let block = read_data_block(device, entry_block(device, dir, index)?)?;
        let end = count.min((index + 1) * ENTRIES_PER_BLOCK);
        for p in pos..end {
            if !visit(p, DirEntry::decode(&block, p % ENTRIES_PER_BLOCK)?)? {
                return Ok(());
            }
        }
        pos = end;
    }
    Ok(())
}

fn find(device: &impl BlockDevice, dir: &Inode, name: &str) -> Result<Option<(usize, DirEntry)>> {
    let mut found = None;
    scan(device, dir, |pos, entry| {
        if entry.name_eq(name) {
            found = Some((pos, entry));
            return Ok(false);
        }
        Ok(true)
    })?;
    Ok(found)
}

/// Looks `name` up in `parent`.
/// A `Directory` lookup only matches directories, while a `File` lookup
/// matches an entry of either type.
pub fn lookup(
    device: &impl BlockDevice,
    parent: &Inode,
    name: &str,
    expected: FileType,
) -> Result<Option<Inumber>> {
    if !parent.is_dir() {
        return Err(FsError::NotDirectory);
    }
    let mut found = None;
    scan(device, parent, |_, entry| {
        if !entry.name_eq(name) {
            return Ok(true);
        }
        if expected == FileType::File || read_inode(device, entry.inumber())?.is_dir() {
            found = Some(entry.inumber());
            return Ok(false);
        }
        Ok(true)
    })?;
    Ok(found)
}

/// Creates a new inode of type `ftype` and appends its entry to `parent`.
/// Both inodes are persisted; `parent` is updated in place.
pub fn create_entry(
    device: &impl BlockDevice,
    superblock: &mut SuperBlock,
    parent: &mut Inode,
    name: &str,
    ftype: FileType,
    mode: Mode,
) -> Result<Inode> {
    if !parent.is_dir() {
        return Err(FsError::NotDirectory);
    }
    validate_name(name)?;
    if find(device, parent, name)?.is_some() {
        return Err(FsError::AlreadyExists);
    }
    if parent.size as usize >= MAX_DIR_ENTRIES {
        return Err(FsError::DirectoryFull);
    }

    let mut inode = allocate_inode(device, superblock, ftype, mode)?;
    if let Err(e) = append_entry(device, superblock, parent, name, inode.inumber) {
        free_inode(device, superblock, &mut inode)?;
        return Err(e);
    }

    log::debug!("created {:?} {} -> inode {} in {}", ftype, name, inode.inumber, parent.inumber);
    Ok(inode)
}

/// Writes an entry into the first free slot of `parent` and bumps its size.
fn append_entry(
    device: &impl BlockDevice,
    superblock: &mut SuperBlock,
    parent: &mut Inode,
    name: &str,
    inumber: Inumber,
) -> Result<()> {
    let (index, slot) = position(parent.size as usize);
    let addr = if slot == 0 {
        attach_block(device, superblock, parent, index)?
    } else {
        entry_block(device, parent, index)?
    };

    let mut block = read_data_block(device, addr)?;
    DirEntry::new(name, inumber)?.encode_into(&mut block, slot);
    write_data_block(device, addr, &block)?;
    parent.size += 1;
    write_inode(device, parent)
}

/// Removes the last entry of `dir` and returns it, along with the block it
/// lived in. The block is released when the entry was its only one.
pub fn move_last(
    device: &impl BlockDevice,
    superblock: &mut SuperBlock,
    dir: &mut Inode,
) -> Result<(DirEntry, BlockId)> {
    if dir.size == 0 {
        return Err(FsError::NotFound);
    }
    let (index, slot) = position(dir.size as usize - 1);
    let addr = entry_block(device, dir, index)?;
    let mut block = read_data_block(device, addr)?;
    let entry = DirEntry::decode(&block, slot)?;

    dir.size -= 1;
    if slot == 0 {
        detach_block(device, superblock, dir, index)?;
    } else {
        DirEntry::clear(&mut block, slot);
        write_data_block(device, addr, &block)?;
        write_inode(device, dir)?;
    }
    Ok((entry, addr))
}

/// Removes `name` from `parent`, filling its slot with the last entry so the
/// array stays dense. Returns the inumber the entry referred to; the inode
/// itself is left to the caller.
pub fn delete_entry(
    device: &impl BlockDevice,
    superblock: &mut SuperBlock,
    parent: &mut Inode,
    name: &str,
) -> Result<Inumber> {
    if !parent.is_dir() {
        return Err(FsError::NotDirectory);
    }
    let (pos, entry) = find(device, parent, name)?.ok_or(FsError::NotFound)?;
    let last = parent.size as usize - 1;

    let (moved, _) = move_last(device, superblock, parent)?;
    if pos != last {
        let (index, slot) = position(pos);
        let addr = entry_block(device, parent, index)?;
        let mut block = read_data_block(device, addr)?;
        moved.encode_into(&mut block, slot);
        write_data_block(device, addr, &block)?;
        log::debug!("moved {} into slot {} of {}", moved.name(), pos, parent.inumber);
    }

    log::debug!("deleted {} from {}", name, parent.inumber);
    Ok(entry.inumber())
}

/// Returns all entries of `dir` in storage order.
pub fn read_dir(device: &impl BlockDevice, dir: &Inode) -> Result<Vec<DirEntry>> {
    if !dir.is_dir() {
        return Err(FsError::NotDirectory);
    }
    let mut entries = Vec::with_capacity(dir.size as usize);
    scan(device, dir, |_, entry| {
        entries.push(entry);
        Ok(true)
    })?;
    Ok(entries)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block_dev::RamDisk;
    use crate::fs::format;
    use crate::superblock::read_superblock;

    fn fresh() -> (RamDisk, SuperBlock, Inode) {
        let rd = RamDisk::new();
        format(&rd, "dir").unwrap();
        let sb = read_superblock(&rd).unwrap();
        let root = read_inode(&rd, Inumber::ROOT).unwrap();
        (rd, sb, root)
    }

    /// Rejects every write to one block.
    struct FailingDisk {
        inner: RamDisk,
        bad: usize,
    }

    impl BlockDevice for FailingDisk {
        fn num_blocks(&self) -> usize {
            self.inner.num_blocks()
        }

        fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()> {
            self.inner.read_block(block_id, buf)
        }

        fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()> {
            if block_id == self.bad {
                return Err(FsError::IoError);
            }
            self.inner.write_block(block_id, buf)
        }

        fn flush(&self) -> Result<()> {
            self.inner.flush()
        }
    }

    fn names(rd: &RamDisk, dir: &Inode) -> Vec<String> {
        read_dir(rd, dir).unwrap().iter().map(|e| e.name().to_string()).collect()
    }

    #[test]
    fn test_dense_after_delete() {
        let (rd, mut sb, mut root) = fresh();
        for name in ["a", "b", "c", "d"] {
            create_entry(&rd, &mut sb, &mut root, name, FileType::File, Mode::ReadWrite).unwrap();
        }
        delete_entry(&rd, &mut sb, &mut root, "b").unwrap();
        assert_eq!(names(&rd, &root), ["a", "d", "c"]);
        delete_entry(&rd, &mut sb, &mut root, "c").unwrap();
        assert_eq!(names(&rd, &root), ["a", "d"]);
        assert_eq!(root.size, 2);
        assert_eq!(read_inode(&rd, Inumber::ROOT).unwrap(), root);
    }

    #[test]
    fn test_blocks_follow_entry_count() {
        let (rd, mut sb, mut root) = fresh();
        let used = sb.block_used_count;
        for i in 0..ENTRIES_PER_BLOCK + 1 {
            let name = format!("f{i}");
            create_entry(&rd, &mut sb, &mut root, &name, FileType::File, Mode::ReadWrite).unwrap();
        }
        assert_eq!(sb.block_used_count, used + 2);
        assert_eq!(root.block_count(), 2);

        delete_entry(&rd, &mut sb, &mut root, "f0").unwrap();
        assert_eq!(sb.block_used_count, used + 1);
        assert_eq!(names(&rd, &root)[0], format!("f{ENTRIES_PER_BLOCK}"));
    }

    #[test]
    fn test_lookup_type_asymmetry() {
        let (rd, mut sb, mut root) = fresh();
        let file = create_entry(&rd, &mut sb, &mut root, "plain", FileType::File, Mode::ReadWrite).unwrap();
        let dir = create_entry(&rd, &mut sb, &mut root, "sub", FileType::Directory, Mode::ReadWrite).unwrap();

        assert_eq!(lookup(&rd, &root, "plain", FileType::File).unwrap(), Some(file.inumber));
        assert_eq!(lookup(&rd, &root, "plain", FileType::Directory).unwrap(), None);
        assert_eq!(lookup(&rd, &root, "sub", FileType::File).unwrap(), Some(dir.inumber));
        assert_eq!(lookup(&rd, &root, "sub", FileType::Directory).unwrap(), Some(dir.inumber));
        assert_eq!(lookup(&rd, &root, "nope", FileType::File).unwrap(), None);
        assert_eq!(lookup(&rd, &file, "x", FileType::File), Err(FsError::NotDirectory));
    }

    #[test]
    fn test_create_rejects() {
        let (rd, mut sb, mut root) = fresh();
        create_entry(&rd, &mut sb, &mut root, "x", FileType::File, Mode::ReadWrite).unwrap();
        let free = sb.inode_free_count;
        assert_eq!(
            create_entry(&rd, &mut sb, &mut root, "x", FileType::File, Mode::ReadWrite).map(|_| ()),
            Err(FsError::AlreadyExists)
        );
        assert_eq!(
            create_entry(&rd, &mut sb, &mut root, "much_too_long", FileType::File, Mode::ReadWrite)
                .map(|_| ()),
            Err(FsError::NameTooLong)
        );
        assert_eq!(sb.inode_free_count, free);
        assert_eq!(delete_entry(&rd, &mut sb, &mut root, "y"), Err(FsError::NotFound));
    }

    #[test]
    fn test_failed_link_releases_inode() {
        let (rd, mut sb, mut root) = fresh();
        create_entry(&rd, &mut sb, &mut root, "a", FileType::File, Mode::ReadWrite).unwrap();
        let free = sb.inode_free_count;
        let bad = root.direct[0].unwrap().index();
        let disk = FailingDisk { inner: rd, bad };

        assert_eq!(
            create_entry(&disk, &mut sb, &mut root, "b", FileType::File, Mode::ReadWrite).map(|_| ()),
            Err(FsError::IoError)
        );
        assert_eq!(sb.inode_free_count, free);
        assert_eq!(root.size, 1);
        assert!(!read_inode(&disk, Inumber::new(3).unwrap()).unwrap().used);
    }

    #[test]
    fn test_move_last() {
        let (rd, mut sb, mut root) = fresh();
        assert_eq!(move_last(&rd, &mut sb, &mut root).map(|_| ()), Err(FsError::NotFound));
        create_entry(&rd, &mut sb, &mut root, "one", FileType::File, Mode::ReadWrite).unwrap();
        create_entry(&rd, &mut sb, &mut root, "two", FileType::File, Mode::ReadWrite).unwrap();
        let (entry, addr) = move_last(&rd, &mut sb, &mut root).unwrap();
        assert_eq!(entry.name(), "two");
        assert_eq!(root.direct[0], Some(addr));
        assert_eq!(names(&rd, &root), ["one"]);
    }
}
