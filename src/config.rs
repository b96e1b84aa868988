pub const MAGIC: u32 = 0x4E414E4F; // "NANO" in ASCII

// Filesystem-wide parameters
pub const FS_NAME_MAX: usize = 255;
pub const FS_SIZE: usize = 100 * 1024; // Image size in bytes
pub const FILE_NAME_MAX: usize = 10;
pub const PATH_DEPTH_MAX: usize = 10;
pub const PATH_LEN_MAX: usize = 255;

// Block parameters
pub const BLOCK_SIZE: usize = 64;
pub const BLOCK_COUNT: usize = FS_SIZE / BLOCK_SIZE;
pub const BOOT_BLOCKS: usize = 1;
pub const SUPER_BLOCKS: usize = (FS_NAME_MAX + 1) / BLOCK_SIZE + 1;
pub const ADDR_SIZE: usize = 2; // Block addresses are u16 on disk
pub const ADDRS_PER_BLOCK: usize = BLOCK_SIZE / ADDR_SIZE;

// Inode parameters, one inode per block
pub const INODE_COUNT: usize = BLOCK_COUNT * 5 / 100;
pub const BLKS_DIRECT: usize = 8;
pub const BLKS_INDIRECT: usize = 2;
pub const MAX_FILE_BLOCKS: usize = BLKS_DIRECT + BLKS_INDIRECT * ADDRS_PER_BLOCK;
pub const FILE_SIZE_MAX: usize = BLOCK_SIZE * MAX_FILE_BLOCKS;
pub const MAX_OPEN_FILES: usize = INODE_COUNT;

// Directory entries: NUL padded name followed by a one byte inumber
pub const DIR_ENTRY_SIZE: usize = FILE_NAME_MAX + 1 + 1;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;
pub const MAX_DIR_ENTRIES: usize = ENTRIES_PER_BLOCK * MAX_FILE_BLOCKS;

// Disk locations, in blocks
pub const SUPER_START: usize = BOOT_BLOCKS;
pub const INODE_LIST_START: usize = BOOT_BLOCKS + SUPER_BLOCKS;
pub const DATA_START: usize = INODE_LIST_START + INODE_COUNT;
pub const DATA_BLOCK_COUNT: usize = BLOCK_COUNT - DATA_START;

const _: () = assert!(BLOCK_COUNT <= u16::MAX as usize);
const _: () = assert!(INODE_COUNT <= u8::MAX as usize);
const _: () = assert!(ENTRIES_PER_BLOCK > 0);
