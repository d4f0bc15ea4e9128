// Inode table
// A fixed array of 128-byte records starting at inode_start. Record i
// lives at byte inode_start * BLOCK_SIZE + i * INODE_RECORD_SIZE; the
// table is accessed by loading the covering block and codec-ing the
// record in place, so all disk traffic stays block-granular.

use simfs_core::layout::INODES_PER_BLOCK;
use simfs_core::{Inode, SimfsError, SimfsResult, BLOCK_SIZE, INODE_RECORD_SIZE};

use crate::block_device::{Block, BlockDevice};

#[derive(Debug, Clone, Copy)]
pub struct InodeTable {
    start_block: u32,
    count: u32,
}

impl InodeTable {
    pub fn new(start_block: u32, count: u32) -> Self {
        Self { start_block, count }
    }

    fn locate(&self, inode_num: u32) -> SimfsResult<(u32, usize)> {
        if inode_num >= self.count {
            return Err(SimfsError::InvalidArgument(format!(
                "inode {} out of range (total {})",
                inode_num, self.count
            )));
        }
        let block = self.start_block + inode_num / INODES_PER_BLOCK as u32;
        let offset = (inode_num as usize % INODES_PER_BLOCK) * INODE_RECORD_SIZE;
        Ok((block, offset))
    }

    pub fn read(&self, dev: &mut BlockDevice, inode_num: u32) -> SimfsResult<Inode> {
        let (block_num, offset) = self.locate(inode_num)?;
        let mut block: Block = [0; BLOCK_SIZE];
        dev.read_block(block_num, &mut block)?;
        Inode::decode(&block[offset..offset + INODE_RECORD_SIZE])
    }

    pub fn write(&self, dev: &mut BlockDevice, inode: &Inode) -> SimfsResult<()> {
        let (block_num, offset) = self.locate(inode.inode_num)?;
        let mut block: Block = [0; BLOCK_SIZE];
        dev.read_block(block_num, &mut block)?;
        block[offset..offset + INODE_RECORD_SIZE].copy_from_slice(&inode.encode());
        dev.write_block(block_num, &block)
    }

    /// Whether a record is allocated. A number past the end of the
    /// table is simply not in use.
    pub fn is_used(&self, dev: &mut BlockDevice, inode_num: u32) -> SimfsResult<bool> {
        if inode_num >= self.count {
            return Ok(false);
        }
        Ok(self.read(dev, inode_num)?.used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simfs_core::INODE_KIND_FILE;
    use tempfile::NamedTempFile;

    #[test]
    fn record_round_trip_through_device() {
        let image = NamedTempFile::new().unwrap();
        let mut dev = BlockDevice::create(image.path(), 40).unwrap();
        let table = InodeTable::new(3, 1024);

        let mut inode = Inode::empty(33);
        inode.kind = INODE_KIND_FILE;
        inode.used = true;
        inode.size = 4097;
        inode.blocks[0] = 35;
        inode.blocks[1] = 36;
        inode.create_time = 1_700_000_000;
        inode.modify_time = 1_700_000_000;

        table.write(&mut dev, &inode).unwrap();
        let back = table.read(&mut dev, 33).unwrap();
        assert_eq!(back, inode);
        assert!(table.is_used(&mut dev, 33).unwrap());

        // a neighbor in the same block stays untouched
        let neighbor = table.read(&mut dev, 32).unwrap();
        assert!(!neighbor.used);
    }

    #[test]
    fn rejects_out_of_range_inode() {
        let image = NamedTempFile::new().unwrap();
        let mut dev = BlockDevice::create(image.path(), 40).unwrap();
        let table = InodeTable::new(3, 16);
        assert!(table.read(&mut dev, 16).is_err());

        // the flag accessor reports out-of-range as not in use
        assert!(!table.is_used(&mut dev, 16).unwrap());
        assert!(!table.is_used(&mut dev, u32::MAX).unwrap());
    }
}
