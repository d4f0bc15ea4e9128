// Filesystem facade
// Owns the mount lifecycle and composes the block device, bitmaps,
// inode table and root directory into the file-level operations.
// Callers serialize through one mutex around the whole facade; nothing
// here takes finer-grained locks.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use simfs_core::layout::SUPER_BLOCK_RECORD_SIZE;
use simfs_core::{
    DirEntry, FormatOptions, Inode, SimfsError, SimfsResult, SuperBlock, BLOCK_SIZE,
    DIRECT_BLOCKS, INODE_KIND_DIR, INODE_KIND_FILE, MAX_FILENAME,
};

use crate::bitmap::Bitmap;
use crate::block_device::{Block, BlockDevice};
use crate::directory::Directory;
use crate::inode_table::InodeTable;

const ROOT_INODE: u32 = 0;

/// Superblock counters exposed to the `info` command.
#[derive(Debug, Clone)]
pub struct FsStats {
    pub magic: String,
    pub block_size: u32,
    pub total_blocks: u32,
    pub data_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
}

/// In-memory state of a mounted image.
struct MountedFs {
    dev: BlockDevice,
    sb: SuperBlock,
    block_bitmap: Bitmap,
    inode_bitmap: Bitmap,
    inodes: InodeTable,
}

impl MountedFs {
    fn assemble(dev: BlockDevice, sb: SuperBlock) -> Self {
        let block_bitmap = Bitmap::new(sb.block_bitmap, sb.data_blocks);
        let inode_bitmap = Bitmap::new(sb.inode_bitmap, sb.total_inodes);
        let inodes = InodeTable::new(sb.inode_start, sb.total_inodes);
        Self {
            dev,
            sb,
            block_bitmap,
            inode_bitmap,
            inodes,
        }
    }

    fn write_super_block(&mut self) -> SimfsResult<()> {
        self.dev.write_at(0, &self.sb.encode())
    }

    /// Flip a data block's bit, keyed by absolute block number. The
    /// free counter moves only when the bit actually changes, and the
    /// superblock is written back either way.
    fn set_block_bitmap(&mut self, block_num: u32, used: bool) -> SimfsResult<()> {
        let data_end = self.sb.data_start + self.sb.data_blocks;
        if block_num < self.sb.data_start || block_num >= data_end {
            return Err(SimfsError::InvalidArgument(format!(
                "block {} outside the data region [{}, {})",
                block_num, self.sb.data_start, data_end
            )));
        }
        let index = block_num - self.sb.data_start;
        if self.block_bitmap.set(&mut self.dev, index, used)? {
            if used {
                self.sb.free_blocks -= 1;
            } else {
                self.sb.free_blocks += 1;
            }
        }
        self.write_super_block()
    }

    fn set_inode_bitmap(&mut self, inode_num: u32, used: bool) -> SimfsResult<()> {
        if self.inode_bitmap.set(&mut self.dev, inode_num, used)? {
            if used {
                self.sb.free_inodes -= 1;
            } else {
                self.sb.free_inodes += 1;
            }
        }
        self.write_super_block()
    }

    /// Smallest free data block, as an absolute block number.
    fn find_free_block(&mut self) -> SimfsResult<Option<u32>> {
        let index = self.block_bitmap.find_free(&mut self.dev)?;
        Ok(index.map(|i| self.sb.data_start + i))
    }

    /// Root inode plus a handle onto its directory block, with the
    /// structural checks every operation performs first.
    fn root_dir(&mut self) -> SimfsResult<(Inode, Directory)> {
        let root = self.inodes.read(&mut self.dev, ROOT_INODE)?;
        if !root.used || root.kind != INODE_KIND_DIR {
            return Err(SimfsError::Corrupt(
                "root inode is not an allocated directory".into(),
            ));
        }
        if root.blocks[0] == 0 {
            return Err(SimfsError::Corrupt("root directory has no data block".into()));
        }
        let dir = Directory::new(root.blocks[0]);
        Ok((root, dir))
    }

    /// Bump the root's modify time. Callers decide whether a failure
    /// here is fatal.
    fn touch_root(&mut self, now: i64) -> SimfsResult<()> {
        let mut root = self.inodes.read(&mut self.dev, ROOT_INODE)?;
        root.modify_time = now;
        self.inodes.write(&mut self.dev, &root)
    }
}

/// The filesystem over one backing image.
///
/// `Unmounted` and `Mounted` are the two states; every file operation
/// demands `Mounted` and fails with `NotMounted` otherwise.
pub struct SimFs {
    path: PathBuf,
    mounted: Option<MountedFs>,
}

impl SimFs {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mounted: None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    fn mounted_mut(&mut self) -> SimfsResult<&mut MountedFs> {
        self.mounted.as_mut().ok_or(SimfsError::NotMounted)
    }

    /// Initialize the image to a consistent empty state: superblock,
    /// zeroed bitmaps, zeroed inode table, and a root directory owning
    /// one data block. Leaves the filesystem unmounted.
    pub fn format(&mut self) -> SimfsResult<()> {
        self.format_with(FormatOptions::default())
    }

    pub fn format_with(&mut self, opts: FormatOptions) -> SimfsResult<()> {
        if self.mounted.is_some() {
            return Err(SimfsError::InvalidArgument(
                "cannot format a mounted filesystem".into(),
            ));
        }

        let sb = SuperBlock::new(opts.total_blocks, opts.total_inodes);
        info!(
            "formatting {}: {} blocks, {} inodes, data region at block {}",
            self.path.display(),
            sb.total_blocks,
            sb.total_inodes,
            sb.data_start
        );

        let mut dev = BlockDevice::create(&self.path, sb.total_blocks)?;
        dev.write_at(0, &sb.encode())?;

        // Zero both bitmap regions.
        let zeroes: Block = [0; BLOCK_SIZE];
        for block in sb.block_bitmap..sb.inode_start {
            dev.write_block(block, &zeroes)?;
        }

        // Zeroed inode table; each record still carries its own number.
        let per_block = simfs_core::layout::INODES_PER_BLOCK as u32;
        for table_block in 0..sb.inode_blocks {
            let mut buf: Block = [0; BLOCK_SIZE];
            for slot in 0..per_block {
                let inode_num = table_block * per_block + slot;
                if inode_num >= sb.total_inodes {
                    break;
                }
                let record = Inode::empty(inode_num).encode();
                let offset = slot as usize * record.len();
                buf[offset..offset + record.len()].copy_from_slice(&record);
            }
            dev.write_block(sb.inode_start + table_block, &buf)?;
        }

        // Reserve the root through the regular allocation paths so the
        // counters stay transition-accurate.
        let mut m = MountedFs::assemble(dev, sb);
        m.set_inode_bitmap(ROOT_INODE, true)?;

        let root_block = m.find_free_block()?.ok_or(SimfsError::NoSpaceBlocks)?;
        let now = now_secs();
        let mut root = Inode::empty(ROOT_INODE);
        root.kind = INODE_KIND_DIR;
        root.used = true;
        root.size = BLOCK_SIZE as u32;
        root.blocks[0] = root_block;
        root.create_time = now;
        root.modify_time = now;
        m.inodes.write(&mut m.dev, &root)?;

        m.set_block_bitmap(root_block, true)?;
        Directory::init_root(&mut m.dev, root_block)?;
        m.dev.flush()?;

        debug!("format complete, root directory in block {}", root_block);
        Ok(())
    }

    /// Load the superblock and validate the magic. Mounting an already
    /// mounted filesystem is a no-op.
    pub fn mount(&mut self) -> SimfsResult<()> {
        if self.mounted.is_some() {
            return Ok(());
        }

        let mut dev = BlockDevice::open(&self.path)?;
        let mut record = [0u8; SUPER_BLOCK_RECORD_SIZE];
        dev.read_at(0, &mut record)?;
        let sb = SuperBlock::decode(&record)?;

        info!(
            "mounted {}: {} blocks ({} free), {} inodes ({} free)",
            self.path.display(),
            sb.total_blocks,
            sb.free_blocks,
            sb.total_inodes,
            sb.free_inodes
        );
        self.mounted = Some(MountedFs::assemble(dev, sb));
        Ok(())
    }

    /// Write the in-memory superblock back and close the image.
    /// Unmounting an unmounted filesystem is a no-op.
    pub fn unmount(&mut self) -> SimfsResult<()> {
        if let Some(mut m) = self.mounted.take() {
            m.write_super_block()?;
            m.dev.flush()?;
            info!("unmounted {}", self.path.display());
        }
        Ok(())
    }

    /// Create an empty file, returning its inode number.
    pub fn create_file(&mut self, name: &str) -> SimfsResult<u32> {
        if name.is_empty() || name.len() >= MAX_FILENAME {
            return Err(SimfsError::InvalidArgument(format!(
                "file name must be 1 to {} bytes: {:?}",
                MAX_FILENAME - 1,
                name
            )));
        }
        let m = self.mounted_mut()?;
        let (_, dir) = m.root_dir()?;

        if dir.lookup(&mut m.dev, name)?.is_some() {
            return Err(SimfsError::AlreadyExists(name.to_string()));
        }

        let inode_num = m
            .inode_bitmap
            .find_free(&mut m.dev)?
            .ok_or(SimfsError::NoSpaceInodes)?;

        let now = now_secs();
        let mut inode = Inode::empty(inode_num);
        inode.kind = INODE_KIND_FILE;
        inode.used = true;
        inode.create_time = now;
        inode.modify_time = now;
        // Write the record before marking the bitmap so a failed write
        // cannot leak the inode.
        m.inodes.write(&mut m.dev, &inode)?;
        m.set_inode_bitmap(inode_num, true)?;

        if let Err(e) = dir.insert(&mut m.dev, name, inode_num) {
            if let Err(rollback) = m.set_inode_bitmap(inode_num, false) {
                warn!(
                    "could not roll back inode {} after failed insert: {}",
                    inode_num, rollback
                );
            }
            return Err(e);
        }

        if let Err(e) = m.touch_root(now) {
            warn!("root modify time update failed after create: {}", e);
        }

        debug!("created {} as inode {}", name, inode_num);
        Ok(inode_num)
    }

    /// Resolve a name to its inode number.
    pub fn open_file(&mut self, name: &str) -> SimfsResult<u32> {
        let m = self.mounted_mut()?;
        let (_, dir) = m.root_dir()?;
        dir.lookup(&mut m.dev, name)?
            .ok_or_else(|| SimfsError::NotFound(name.to_string()))
    }

    /// Read up to `size` bytes starting at `offset`. The result is
    /// shorter than `size` when the file ends first or when the read
    /// runs off the file's allocated blocks.
    pub fn read_file(&mut self, inode_num: u32, offset: u64, size: usize) -> SimfsResult<Vec<u8>> {
        let m = self.mounted_mut()?;
        let inode = m.inodes.read(&mut m.dev, inode_num)?;
        if !inode.used || inode.kind != INODE_KIND_FILE {
            return Err(SimfsError::NotFound(format!("inode {}", inode_num)));
        }

        let remaining = (inode.size as u64).saturating_sub(offset);
        let to_read = size.min(remaining as usize);
        let mut out = Vec::with_capacity(to_read);
        let mut current = offset;
        let mut scratch: Block = [0; BLOCK_SIZE];

        while out.len() < to_read {
            let block_idx = (current / BLOCK_SIZE as u64) as usize;
            if block_idx >= DIRECT_BLOCKS {
                break;
            }
            let block_num = inode.blocks[block_idx];
            if block_num == 0 {
                break;
            }
            m.dev.read_block(block_num, &mut scratch)?;

            let in_block = (current % BLOCK_SIZE as u64) as usize;
            let n = (BLOCK_SIZE - in_block).min(to_read - out.len());
            out.extend_from_slice(&scratch[in_block..in_block + n]);
            current += n as u64;
        }

        Ok(out)
    }

    /// Write `data` at `offset`, allocating data blocks on first touch.
    /// Stops short at the direct-block limit, so the return value is
    /// the number of bytes actually written; a write aimed entirely
    /// past the limit is a successful no-op of 0 bytes.
    pub fn write_file(&mut self, inode_num: u32, offset: u64, data: &[u8]) -> SimfsResult<usize> {
        if data.is_empty() {
            return Err(SimfsError::InvalidArgument("empty write".into()));
        }
        let m = self.mounted_mut()?;
        let mut inode = m.inodes.read(&mut m.dev, inode_num)?;
        if !inode.used || inode.kind != INODE_KIND_FILE {
            return Err(SimfsError::NotFound(format!("inode {}", inode_num)));
        }

        let mut written = 0usize;
        let mut scratch: Block = [0; BLOCK_SIZE];
        let now = now_secs();

        while written < data.len() {
            let current = offset + written as u64;
            let block_idx = (current / BLOCK_SIZE as u64) as usize;
            if block_idx >= DIRECT_BLOCKS {
                // Direct-block limit: commit what fit.
                break;
            }

            let block_num = match inode.blocks[block_idx] {
                0 => {
                    let fresh = match m.find_free_block()? {
                        Some(b) => b,
                        None => {
                            // Keep blocks allocated so far reachable
                            // before surfacing the failure.
                            if written > 0 {
                                commit_write(m, &mut inode, offset, written, now)?;
                            }
                            return Err(SimfsError::NoSpaceBlocks);
                        }
                    };
                    m.set_block_bitmap(fresh, true)?;
                    inode.blocks[block_idx] = fresh;
                    scratch = [0; BLOCK_SIZE];
                    fresh
                }
                existing => {
                    m.dev.read_block(existing, &mut scratch)?;
                    existing
                }
            };

            let in_block = (current % BLOCK_SIZE as u64) as usize;
            let n = (BLOCK_SIZE - in_block).min(data.len() - written);
            scratch[in_block..in_block + n].copy_from_slice(&data[written..written + n]);
            m.dev.write_block(block_num, &scratch)?;
            written += n;
        }

        commit_write(m, &mut inode, offset, written, now)?;
        Ok(written)
    }

    /// Remove a file: free its data blocks and inode, tombstone the
    /// directory entry.
    pub fn delete_file(&mut self, name: &str) -> SimfsResult<()> {
        let m = self.mounted_mut()?;
        let (_, dir) = m.root_dir()?;
        let inode_num = dir
            .lookup(&mut m.dev, name)?
            .ok_or_else(|| SimfsError::NotFound(name.to_string()))?;

        let mut inode = m.inodes.read(&mut m.dev, inode_num)?;
        if !inode.used {
            return Err(SimfsError::NotFound(name.to_string()));
        }
        if inode.kind != INODE_KIND_FILE {
            return Err(SimfsError::Corrupt(format!(
                "directory entry {} points at a non-file inode",
                name
            )));
        }

        for slot in 0..DIRECT_BLOCKS {
            let block_num = inode.blocks[slot];
            if block_num != 0 {
                m.set_block_bitmap(block_num, false)?;
                inode.blocks[slot] = 0;
            }
        }

        inode.used = false;
        m.inodes.write(&mut m.dev, &inode)?;
        m.set_inode_bitmap(inode_num, false)?;

        dir.remove(&mut m.dev, name)?;
        m.touch_root(now_secs())?;

        debug!("deleted {} (inode {})", name, inode_num);
        Ok(())
    }

    /// Valid root entries, excluding the reserved "." slot.
    pub fn list_files(&mut self) -> SimfsResult<Vec<DirEntry>> {
        let m = self.mounted_mut()?;
        let (_, dir) = m.root_dir()?;
        dir.list(&mut m.dev)
    }

    /// File length in bytes.
    pub fn get_file_size(&mut self, inode_num: u32) -> SimfsResult<u32> {
        let m = self.mounted_mut()?;
        let inode = m.inodes.read(&mut m.dev, inode_num)?;
        if !inode.used {
            return Err(SimfsError::NotFound(format!("inode {}", inode_num)));
        }
        Ok(inode.size)
    }

    pub fn is_inode_used(&mut self, inode_num: u32) -> SimfsResult<bool> {
        let m = self.mounted_mut()?;
        m.inodes.is_used(&mut m.dev, inode_num)
    }

    /// Cross-check the on-disk structures the way a minimal fsck
    /// would: bitmap bits against inode records and block references,
    /// free counters against zero-bit counts, root stability, and
    /// directory name uniqueness.
    pub fn check_consistency(&mut self) -> SimfsResult<()> {
        let m = self.mounted_mut()?;
        let (root, dir) = m.root_dir()?;

        // slot 0 must be the "." self-entry
        let mut block: Block = [0; BLOCK_SIZE];
        m.dev.read_block(root.blocks[0], &mut block)?;
        let dot = DirEntry::decode(&block[..simfs_core::DIR_ENTRY_SIZE])?;
        if !dot.valid || dot.name != "." || dot.inode_num != ROOT_INODE {
            return Err(SimfsError::Corrupt(
                "root directory slot 0 is not the \".\" entry".into(),
            ));
        }

        // every used inode has its bit set and vice versa; collect the
        // data blocks reachable from used inodes
        let mut used_inodes = 0u32;
        let mut referenced = vec![false; m.sb.data_blocks as usize];
        for inode_num in 0..m.sb.total_inodes {
            let inode = m.inodes.read(&mut m.dev, inode_num)?;
            let bit = m.inode_bitmap.is_set(&mut m.dev, inode_num)?;
            if bit != inode.used {
                return Err(SimfsError::Corrupt(format!(
                    "inode {}: bitmap bit {} but used flag {}",
                    inode_num, bit as u8, inode.used as u8
                )));
            }
            if !inode.used {
                continue;
            }
            used_inodes += 1;
            for &block_num in &inode.blocks {
                if block_num == 0 {
                    continue;
                }
                let data_end = m.sb.data_start + m.sb.data_blocks;
                if block_num < m.sb.data_start || block_num >= data_end {
                    return Err(SimfsError::Corrupt(format!(
                        "inode {} references block {} outside the data region",
                        inode_num, block_num
                    )));
                }
                referenced[(block_num - m.sb.data_start) as usize] = true;
            }
        }

        // block bitmap matches the reference map
        let mut used_blocks = 0u32;
        for (index, &expected) in referenced.iter().enumerate() {
            let bit = m.block_bitmap.is_set(&mut m.dev, index as u32)?;
            if bit != expected {
                return Err(SimfsError::Corrupt(format!(
                    "data block {}: bitmap bit {} but referenced {}",
                    m.sb.data_start + index as u32,
                    bit as u8,
                    expected as u8
                )));
            }
            if expected {
                used_blocks += 1;
            }
        }

        // counters agree with the bitmaps
        if m.sb.free_inodes != m.sb.total_inodes - used_inodes {
            return Err(SimfsError::Corrupt(format!(
                "free_inodes is {} but {} inodes are in use of {}",
                m.sb.free_inodes, used_inodes, m.sb.total_inodes
            )));
        }
        if m.sb.free_blocks != m.sb.data_blocks - used_blocks {
            return Err(SimfsError::Corrupt(format!(
                "free_blocks is {} but {} data blocks are in use of {}",
                m.sb.free_blocks, used_blocks, m.sb.data_blocks
            )));
        }

        // at most one valid entry per name
        let entries = dir.list(&mut m.dev)?;
        let mut names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(SimfsError::Corrupt("duplicate directory entry name".into()));
        }

        Ok(())
    }

    pub fn statfs(&mut self) -> SimfsResult<FsStats> {
        let m = self.mounted_mut()?;
        Ok(FsStats {
            magic: String::from_utf8_lossy(
                &m.sb.magic[..simfs_core::SIMFS_MAGIC.len()],
            )
            .into_owned(),
            block_size: m.sb.block_size,
            total_blocks: m.sb.total_blocks,
            data_blocks: m.sb.data_blocks,
            free_blocks: m.sb.free_blocks,
            total_inodes: m.sb.total_inodes,
            free_inodes: m.sb.free_inodes,
        })
    }
}

/// Fold a finished (or cut-short) write into the inode record.
fn commit_write(
    m: &mut MountedFs,
    inode: &mut Inode,
    offset: u64,
    written: usize,
    now: i64,
) -> SimfsResult<()> {
    let end = offset + written as u64;
    if end > inode.size as u64 {
        inode.size = end as u32;
    }
    inode.modify_time = now;
    m.inodes.write(&mut m.dev, inode)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
