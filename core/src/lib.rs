pub mod error;
pub mod layout;

pub use error::{SimfsError, SimfsResult};
pub use layout::{
    DirEntry, FormatOptions, Inode, SuperBlock, BLOCK_SIZE, DIRECT_BLOCKS, DIR_ENTRIES_PER_BLOCK,
    DIR_ENTRY_SIZE, INODE_KIND_DIR, INODE_KIND_FILE, INODE_RECORD_SIZE, MAX_FILENAME,
    SIMFS_MAGIC,
};
