// Root directory
// The root's single data block holds a dense array of 40-byte entries.
// Slot 0 is the reserved "." self-entry; lookups and inserts scan from
// slot 1. Removal tombstones in place, so slots are reused but never
// compacted.

use log::debug;
use simfs_core::layout::{DIR_ENTRIES_PER_BLOCK, DIR_NAME_FIELD};
use simfs_core::{DirEntry, SimfsError, SimfsResult, BLOCK_SIZE, DIR_ENTRY_SIZE};

use crate::block_device::{Block, BlockDevice};

/// Handle onto the root directory's data block.
#[derive(Debug, Clone, Copy)]
pub struct Directory {
    block: u32,
}

impl Directory {
    pub fn new(block: u32) -> Self {
        Self { block }
    }

    /// Write a fresh directory block containing only the "." self-entry
    /// for inode 0. Format calls this once.
    pub fn init_root(dev: &mut BlockDevice, block: u32) -> SimfsResult<()> {
        let mut buf: Block = [0; BLOCK_SIZE];
        let dot = DirEntry {
            name: ".".to_string(),
            inode_num: 0,
            valid: true,
        };
        buf[..DIR_ENTRY_SIZE].copy_from_slice(&dot.encode()?);
        dev.write_block(block, &buf)
    }

    fn slot(buf: &Block, index: usize) -> SimfsResult<DirEntry> {
        let offset = index * DIR_ENTRY_SIZE;
        DirEntry::decode(&buf[offset..offset + DIR_ENTRY_SIZE])
    }

    /// Inode number of the first valid entry matching `name`.
    pub fn lookup(&self, dev: &mut BlockDevice, name: &str) -> SimfsResult<Option<u32>> {
        let mut buf: Block = [0; BLOCK_SIZE];
        dev.read_block(self.block, &mut buf)?;

        for i in 1..DIR_ENTRIES_PER_BLOCK {
            let entry = Self::slot(&buf, i)?;
            if entry.valid && entry.name == name {
                return Ok(Some(entry.inode_num));
            }
        }
        Ok(None)
    }

    /// Add `name -> inode_num` in the first free slot after the
    /// reserved one.
    pub fn insert(&self, dev: &mut BlockDevice, name: &str, inode_num: u32) -> SimfsResult<()> {
        let mut buf: Block = [0; BLOCK_SIZE];
        dev.read_block(self.block, &mut buf)?;

        let mut free_slot = None;
        for i in 1..DIR_ENTRIES_PER_BLOCK {
            let entry = Self::slot(&buf, i)?;
            if entry.valid {
                if entry.name == name {
                    return Err(SimfsError::AlreadyExists(name.to_string()));
                }
            } else if free_slot.is_none() {
                free_slot = Some(i);
            }
        }

        let slot = free_slot.ok_or(SimfsError::DirectoryFull)?;
        let entry = DirEntry {
            name: name.to_string(),
            inode_num,
            valid: true,
        };
        let offset = slot * DIR_ENTRY_SIZE;
        buf[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&entry.encode()?);
        dev.write_block(self.block, &buf)?;
        debug!("directory: {} -> inode {} (slot {})", name, inode_num, slot);
        Ok(())
    }

    /// Tombstone the entry for `name`, returning its inode number.
    /// The slot becomes reusable; nothing is compacted.
    pub fn remove(&self, dev: &mut BlockDevice, name: &str) -> SimfsResult<u32> {
        let mut buf: Block = [0; BLOCK_SIZE];
        dev.read_block(self.block, &mut buf)?;

        for i in 1..DIR_ENTRIES_PER_BLOCK {
            let offset = i * DIR_ENTRY_SIZE;
            let entry = Self::slot(&buf, i)?;
            if entry.valid && entry.name == name {
                buf[offset + DIR_NAME_FIELD + 4] = 0; // valid byte
                dev.write_block(self.block, &buf)?;
                return Ok(entry.inode_num);
            }
        }
        Err(SimfsError::NotFound(name.to_string()))
    }

    /// All valid entries, excluding the reserved "." slot.
    pub fn list(&self, dev: &mut BlockDevice) -> SimfsResult<Vec<DirEntry>> {
        let mut buf: Block = [0; BLOCK_SIZE];
        dev.read_block(self.block, &mut buf)?;

        let mut entries = Vec::new();
        for i in 1..DIR_ENTRIES_PER_BLOCK {
            let entry = Self::slot(&buf, i)?;
            if entry.valid {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn root_dir() -> (Directory, BlockDevice, NamedTempFile) {
        let image = NamedTempFile::new().unwrap();
        let mut dev = BlockDevice::create(image.path(), 2).unwrap();
        Directory::init_root(&mut dev, 1).unwrap();
        (Directory::new(1), dev, image)
    }

    #[test]
    fn insert_lookup_list() {
        let (dir, mut dev, _image) = root_dir();

        dir.insert(&mut dev, "a.txt", 3).unwrap();
        dir.insert(&mut dev, "b.txt", 4).unwrap();

        assert_eq!(dir.lookup(&mut dev, "a.txt").unwrap(), Some(3));
        assert_eq!(dir.lookup(&mut dev, "missing").unwrap(), None);

        let names: Vec<_> = dir
            .list(&mut dev)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn duplicate_names_rejected() {
        let (dir, mut dev, _image) = root_dir();
        dir.insert(&mut dev, "same", 3).unwrap();
        assert!(matches!(
            dir.insert(&mut dev, "same", 4),
            Err(SimfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn removed_slot_is_reused() {
        let (dir, mut dev, _image) = root_dir();
        dir.insert(&mut dev, "one", 3).unwrap();
        dir.insert(&mut dev, "two", 4).unwrap();

        assert_eq!(dir.remove(&mut dev, "one").unwrap(), 3);
        assert_eq!(dir.lookup(&mut dev, "one").unwrap(), None);

        // the tombstoned slot (slot 1) is handed out again
        dir.insert(&mut dev, "three", 5).unwrap();
        let names: Vec<_> = dir
            .list(&mut dev)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["three", "two"]);
    }

    #[test]
    fn fills_up_to_capacity() {
        let (dir, mut dev, _image) = root_dir();
        // slot 0 is reserved, so capacity is one less than the slot count
        for i in 0..DIR_ENTRIES_PER_BLOCK - 1 {
            dir.insert(&mut dev, &format!("f{}", i), i as u32 + 1).unwrap();
        }
        assert!(matches!(
            dir.insert(&mut dev, "overflow", 999),
            Err(SimfsError::DirectoryFull)
        ));
    }

    #[test]
    fn remove_missing_is_not_found() {
        let (dir, mut dev, _image) = root_dir();
        assert!(matches!(
            dir.remove(&mut dev, "ghost"),
            Err(SimfsError::NotFound(_))
        ));
    }
}
