//! On-disk records and the typed identifiers used to address them.
//! All integers are stored little-endian.

use core::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::*;
use crate::error::{FsError, Result};

pub type Block = [u8; BLOCK_SIZE];

/// Logical block number on the image, `[0, BLOCK_COUNT)`.
/// `BLOCK_COUNT` itself terminates the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u16);

impl BlockId {
    pub const TERMINATOR: Self = Self(BLOCK_COUNT as u16);
    pub const FIRST_DATA: Self = Self(DATA_START as u16);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_data(self) -> bool {
        (DATA_START..BLOCK_COUNT).contains(&self.index())
    }

    /// Decodes a block pointer slot. Zero and anything outside the data
    /// region read as an unused slot.
    pub fn from_slot(raw: u16) -> Option<Self> {
        let id = Self(raw);
        id.is_data().then_some(id)
    }

    pub fn to_slot(slot: Option<Self>) -> u16 {
        slot.map_or(0, |id| id.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 1-based inode number, `[1, INODE_COUNT]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Inumber(u8);

impl Inumber {
    pub const ROOT: Self = Self(1);

    pub fn new(raw: u8) -> Option<Self> {
        (1..=INODE_COUNT).contains(&(raw as usize)).then_some(Self(raw))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Block holding this inode.
    pub fn block(self) -> usize {
        INODE_LIST_START + self.0 as usize - 1
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (1..=INODE_COUNT as u8).map(Self)
    }
}

impl fmt::Display for Inumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File = 0,
    Directory = 1,
}

impl TryFrom<u8> for FileType {
    type Error = FsError;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(FileType::File),
            1 => Ok(FileType::Directory),
            _ => Err(FsError::Corrupted),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly = 0,
    ReadWrite = 1,
}

impl TryFrom<u8> for Mode {
    type Error = FsError;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Mode::ReadOnly),
            1 => Ok(Mode::ReadWrite),
            _ => Err(FsError::Corrupted),
        }
    }
}

impl Mode {
    /// Parses the `"r"` / `"w"` open mode strings.
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "r" => Ok(Mode::ReadOnly),
            "w" => Ok(Mode::ReadWrite),
            _ => Err(FsError::InvalidArgument),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub inumber: Inumber,
    pub used: bool,
    pub ftype: FileType,
    pub mode: Mode,
    pub created: u64, // Unix seconds
    pub size: u32,    // Bytes for files, entry count for directories
    pub direct: [Option<BlockId>; BLKS_DIRECT],
    pub indirect: [Option<BlockId>; BLKS_INDIRECT],
}

// inumber(2) used(1) type(1) mode(1) pad(1) created(8) size(4)
const INODE_PTRS_OFFSET: usize = 18;
const INODE_RECORD_SIZE: usize = INODE_PTRS_OFFSET + (BLKS_DIRECT + BLKS_INDIRECT) * ADDR_SIZE;
const _: () = assert!(INODE_RECORD_SIZE <= BLOCK_SIZE);

impl Inode {
    pub fn unused(inumber: Inumber) -> Self {
        Self {
            inumber,
            used: false,
            ftype: FileType::File,
            mode: Mode::ReadOnly,
            created: 0,
            size: 0,
            direct: [None; BLKS_DIRECT],
            indirect: [None; BLKS_INDIRECT],
        }
    }

    pub fn new(inumber: Inumber, ftype: FileType, mode: Mode) -> Self {
        Self {
            used: true,
            ftype,
            mode,
            created: now(),
            ..Self::unused(inumber)
        }
    }

    pub fn is_dir(&self) -> bool {
        self.ftype == FileType::Directory
    }

    /// Number of data blocks in use, derived from `size`.
    pub fn block_count(&self) -> usize {
        match self.ftype {
            FileType::File => (self.size as usize).div_ceil(BLOCK_SIZE),
            FileType::Directory => (self.size as usize).div_ceil(ENTRIES_PER_BLOCK),
        }
    }

    pub fn encode(&self) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        block[0..2].copy_from_slice(&(self.inumber.get() as u16).to_le_bytes());
        block[2] = self.used as u8;
        block[3] = self.ftype as u8;
        block[4] = self.mode as u8;
        block[6..14].copy_from_slice(&self.created.to_le_bytes());
        block[14..18].copy_from_slice(&self.size.to_le_bytes());
        let ptrs = self.direct.iter().chain(self.indirect.iter());
        for (i, ptr) in ptrs.enumerate() {
            let at = INODE_PTRS_OFFSET + i * ADDR_SIZE;
            block[at..at + ADDR_SIZE].copy_from_slice(&BlockId::to_slot(*ptr).to_le_bytes());
        }
        block
    }

    /// Decodes the record stored for `inumber`. The position of the record is
    /// authoritative, so the stored inumber is not trusted.
    pub fn decode(inumber: Inumber, block: &Block) -> Result<Self> {
        let ptr_at = |i: usize| {
            let at = INODE_PTRS_OFFSET + i * ADDR_SIZE;
            BlockId::from_slot(u16::from_le_bytes([block[at], block[at + 1]]))
        };
        let mut inode = Self::unused(inumber);
        inode.used = block[2] != 0;
        inode.ftype = FileType::try_from(block[3])?;
        inode.mode = Mode::try_from(block[4])?;
        inode.created = u64::from_le_bytes(block[6..14].try_into().map_err(|_| FsError::Corrupted)?);
        inode.size = u32::from_le_bytes(block[14..18].try_into().map_err(|_| FsError::Corrupted)?);
        for i in 0..BLKS_DIRECT {
            inode.direct[i] = ptr_at(i);
        }
        for i in 0..BLKS_INDIRECT {
            inode.indirect[i] = ptr_at(BLKS_DIRECT + i);
        }
        Ok(inode)
    }
}

pub(crate) fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

const NAME_FIELD: usize = FILE_NAME_MAX + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; NAME_FIELD],
    inumber: Inumber,
}

impl DirEntry {
    pub fn new(name: &str, inumber: Inumber) -> Result<Self> {
        validate_name(name)?;
        let mut field = [0u8; NAME_FIELD];
        field[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self { name: field, inumber })
    }

    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_FIELD);
        core::str::from_utf8(&self.name[..end]).unwrap_or_default()
    }

    pub fn name_eq(&self, name: &str) -> bool {
        self.name() == name
    }

    pub fn inumber(&self) -> Inumber {
        self.inumber
    }

    /// Reads the entry at `slot` of a directory block. Only slots below the
    /// directory's entry count hold entries.
    pub fn decode(block: &Block, slot: usize) -> Result<Self> {
        let at = slot * DIR_ENTRY_SIZE;
        let mut name = [0u8; NAME_FIELD];
        name.copy_from_slice(&block[at..at + NAME_FIELD]);
        let end = name.iter().position(|&c| c == 0).unwrap_or(NAME_FIELD);
        core::str::from_utf8(&name[..end]).map_err(|_| FsError::Corrupted)?;
        let inumber = Inumber::new(block[at + NAME_FIELD]).ok_or(FsError::Corrupted)?;
        Ok(Self { name, inumber })
    }

    pub fn encode_into(&self, block: &mut Block, slot: usize) {
        let at = slot * DIR_ENTRY_SIZE;
        block[at..at + NAME_FIELD].copy_from_slice(&self.name);
        block[at + NAME_FIELD] = self.inumber.get();
    }

    pub fn clear(block: &mut Block, slot: usize) {
        let at = slot * DIR_ENTRY_SIZE;
        block[at..at + DIR_ENTRY_SIZE].fill(0);
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(FsError::InvalidFileName);
    }
    if name.len() > FILE_NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("f.txt").is_ok());
        assert!(validate_name("0123456789").is_ok());
        assert_eq!(validate_name("0123456789a"), Err(FsError::NameTooLong));
        assert_eq!(validate_name(""), Err(FsError::InvalidFileName));
        assert_eq!(validate_name(".."), Err(FsError::InvalidFileName));
        assert_eq!(validate_name("a/b"), Err(FsError::InvalidFileName));
    }

    #[test]
    fn test_block_slots() {
        assert_eq!(BlockId::from_slot(0), None);
        assert_eq!(BlockId::from_slot(BLOCK_COUNT as u16), None);
        assert_eq!(BlockId::from_slot(DATA_START as u16 - 1), None);
        assert_eq!(BlockId::from_slot(DATA_START as u16), Some(BlockId::FIRST_DATA));
        assert_eq!(BlockId::to_slot(None), 0);
    }

    #[test]
    fn test_inumber_range() {
        assert_eq!(Inumber::new(0), None);
        assert_eq!(Inumber::new(INODE_COUNT as u8 + 1), None);
        assert_eq!(Inumber::ROOT.block(), INODE_LIST_START);
        assert_eq!(Inumber::all().count(), INODE_COUNT);
    }

    #[test]
    fn test_inode_layout() {
        let mut inode = Inode::new(Inumber::new(7).unwrap(), FileType::Directory, Mode::ReadWrite);
        inode.size = 3;
        inode.direct[0] = Some(BlockId::FIRST_DATA);
        inode.indirect[1] = Some(BlockId::new(DATA_START as u16 + 9));
        let block = inode.encode();
        assert_eq!(u16::from_le_bytes([block[0], block[1]]), 7);
        assert_eq!(block[3], 1);
        assert_eq!(Inode::decode(inode.inumber, &block).unwrap(), inode);
        assert_eq!(inode.block_count(), 1);
    }

    #[test]
    fn test_dir_entry_slots() {
        let mut block = [0u8; BLOCK_SIZE];
        let entry = DirEntry::new("notes", Inumber::new(4).unwrap()).unwrap();
        entry.encode_into(&mut block, 2);
        assert_eq!(block[2 * DIR_ENTRY_SIZE + FILE_NAME_MAX + 1], 4);
        assert_eq!(DirEntry::decode(&block, 2).unwrap().name(), "notes");
        assert_eq!(DirEntry::decode(&block, 1), Err(FsError::Corrupted));

        // A name that is not UTF-8 could never be matched again
        block[2 * DIR_ENTRY_SIZE] = 0xFF;
        assert_eq!(DirEntry::decode(&block, 2), Err(FsError::Corrupted));
        DirEntry::clear(&mut block, 2);
        assert!(block.iter().all(|&b| b == 0));
    }
}
