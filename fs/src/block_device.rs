// Fixed-size block I/O over the backing image file
// Every call is one positioned read or write of exactly BLOCK_SIZE
// bytes; there is no buffering layer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;
use simfs_core::{SimfsError, SimfsResult, BLOCK_SIZE};

/// One block's worth of bytes.
pub type Block = [u8; BLOCK_SIZE];

pub struct BlockDevice {
    file: File,
    total_blocks: u32,
}

impl BlockDevice {
    /// Open an existing image read/write. Capacity is derived from the
    /// file length, which format sets to `total_blocks * BLOCK_SIZE`.
    pub fn open(path: &Path) -> SimfsResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let total_blocks = (len / BLOCK_SIZE as u64) as u32;
        debug!(
            "opened image {} ({} blocks)",
            path.display(),
            total_blocks
        );
        Ok(Self { file, total_blocks })
    }

    /// Create (or truncate) an image sized for `total_blocks` blocks.
    pub fn create(path: &Path, total_blocks: u32) -> SimfsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_blocks as u64 * BLOCK_SIZE as u64)?;
        debug!(
            "created image {} ({} blocks)",
            path.display(),
            total_blocks
        );
        Ok(Self { file, total_blocks })
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn read_block(&mut self, block_num: u32, buf: &mut Block) -> SimfsResult<()> {
        if block_num >= self.total_blocks {
            return Err(SimfsError::InvalidArgument(format!(
                "block {} out of range (total {})",
                block_num, self.total_blocks
            )));
        }
        self.file
            .seek(SeekFrom::Start(block_num as u64 * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_block(&mut self, block_num: u32, buf: &Block) -> SimfsResult<()> {
        if block_num >= self.total_blocks {
            return Err(SimfsError::InvalidArgument(format!(
                "block {} out of range (total {})",
                block_num, self.total_blocks
            )));
        }
        self.file
            .seek(SeekFrom::Start(block_num as u64 * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Write an arbitrary record at a byte offset. Only the superblock
    /// writeback uses this; everything else moves whole blocks.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> SimfsResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SimfsResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> SimfsResult<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn block_round_trip() {
        let image = NamedTempFile::new().unwrap();
        let mut dev = BlockDevice::create(image.path(), 8).unwrap();

        let mut block = [0u8; BLOCK_SIZE];
        block[0] = 0xAB;
        block[BLOCK_SIZE - 1] = 0xCD;
        dev.write_block(3, &block).unwrap();

        let mut back = [0u8; BLOCK_SIZE];
        dev.read_block(3, &mut back).unwrap();
        assert_eq!(back[0], 0xAB);
        assert_eq!(back[BLOCK_SIZE - 1], 0xCD);
    }

    #[test]
    fn rejects_out_of_range_block() {
        let image = NamedTempFile::new().unwrap();
        let mut dev = BlockDevice::create(image.path(), 4).unwrap();

        let mut block = [0u8; BLOCK_SIZE];
        assert!(dev.read_block(4, &mut block).is_err());
        assert!(dev.write_block(100, &block).is_err());
    }

    #[test]
    fn reopen_derives_capacity() {
        let image = NamedTempFile::new().unwrap();
        {
            BlockDevice::create(image.path(), 16).unwrap();
        }
        let dev = BlockDevice::open(image.path()).unwrap();
        assert_eq!(dev.total_blocks(), 16);
    }
}
