pub mod bitmap;
pub mod block_device;
pub mod directory;
pub mod filesystem;
pub mod inode_table;

pub use block_device::{Block, BlockDevice};
pub use filesystem::{FsStats, SimFs};

pub use simfs_core::{DirEntry, FormatOptions, SimfsError, SimfsResult};
