use log::debug;

use crate::alloc::{Bitmap, State, BITMAP_BYTES};
use crate::error::FsError;

/// Fixed geometry of the storage arena.
pub const BLOCK_SIZE: usize = 1024;
pub const BLOCK_COUNT: usize = 100;
pub const INODE_COUNT: usize = 100;

/// Every file owns exactly this many blocks, reserved up front at creation.
pub const FILE_BLOCKS: usize = 16;
pub const MAX_FILE_SIZE: usize = FILE_BLOCKS * BLOCK_SIZE;

/// Known locations. Block 0 and inode ids 0 and 1 are never handed out;
/// allocation scans begin past them.
pub const DATA_BLOCK_START: usize = 1;
pub const INODE_ID_START: usize = 2;

/// The block arena plus the occupancy maps for blocks and inodes. All file
/// content lives here; the namespace tree only holds block ids pointing into
/// the arena.
pub struct BlockStore {
    block_map: Bitmap,
    inode_map: Bitmap,
    arena: Vec<u8>,
}

impl BlockStore {
    /// A freshly formatted store: both maps clear, arena zeroed.
    pub fn new() -> Self {
        Self {
            block_map: Bitmap::new(),
            inode_map: Bitmap::new(),
            arena: vec![0; BLOCK_COUNT * BLOCK_SIZE],
        }
    }

    /// Reserves the first free inode id.
    pub fn allocate_inode(&mut self) -> Result<u32, FsError> {
        let ino = self
            .inode_map
            .first_free(INODE_ID_START)
            .ok_or(FsError::OutOfInodes)?;
        self.inode_map.set_reserved(ino);
        debug!("reserved inode {}", ino);
        Ok(ino as u32)
    }

    pub fn release_inode(&mut self, ino: u32) {
        assert_eq!(self.inode_map.get(ino as usize), State::Used);
        self.inode_map.set_free(ino as usize);
        debug!("released inode {}", ino);
    }

    /// Reserves the first free data block.
    pub fn allocate_block(&mut self) -> Result<u32, FsError> {
        let blocknr = self
            .block_map
            .first_free(DATA_BLOCK_START)
            .ok_or(FsError::OutOfBlocks)?;
        self.block_map.set_reserved(blocknr);
        Ok(blocknr as u32)
    }

    pub fn release_block(&mut self, blocknr: u32) {
        assert_eq!(self.block_map.get(blocknr as usize), State::Used);
        self.block_map.set_free(blocknr as usize);
    }

    /// All-or-nothing grab of `n` data blocks. On exhaustion every block
    /// taken so far is released again before the error surfaces.
    pub fn allocate_blocks(&mut self, n: usize) -> Result<Vec<u32>, FsError> {
        let mut grabbed = Vec::with_capacity(n);
        for _ in 0..n {
            match self.allocate_block() {
                Ok(blocknr) => grabbed.push(blocknr),
                Err(e) => {
                    for &blocknr in &grabbed {
                        self.release_block(blocknr);
                    }
                    return Err(e);
                }
            }
        }
        debug!("reserved blocks {:?}", grabbed);
        Ok(grabbed)
    }

    pub fn block(&self, blocknr: u32) -> &[u8] {
        let start = blocknr as usize * BLOCK_SIZE;
        assert!((blocknr as usize) < BLOCK_COUNT);
        &self.arena[start..start + BLOCK_SIZE]
    }

    pub fn block_mut(&mut self, blocknr: u32) -> &mut [u8] {
        let start = blocknr as usize * BLOCK_SIZE;
        assert!((blocknr as usize) < BLOCK_COUNT);
        &mut self.arena[start..start + BLOCK_SIZE]
    }

    pub fn free_data_blocks(&self) -> usize {
        self.block_map.free_in_range(DATA_BLOCK_START)
    }

    pub fn free_inodes(&self) -> usize {
        self.inode_map.free_in_range(INODE_ID_START)
    }

    pub fn block_state(&self, blocknr: usize) -> State {
        self.block_map.get(blocknr)
    }

    pub fn inode_state(&self, ino: usize) -> State {
        self.inode_map.get(ino)
    }

    /// Flattens the store for persistence: block map, inode map, then the
    /// whole arena. The image header is the caller's concern.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 * BITMAP_BYTES + self.arena.len());
        out.extend_from_slice(self.block_map.serialize());
        out.extend_from_slice(self.inode_map.serialize());
        out.extend_from_slice(&self.arena);
        out
    }

    /// Rebuilds a store from a serialized payload.
    pub fn parse(payload: &[u8]) -> Result<Self, FsError> {
        if payload.len() != 2 * BITMAP_BYTES + BLOCK_COUNT * BLOCK_SIZE {
            return Err(FsError::BadImage("wrong block image size"));
        }
        let block_map = Bitmap::parse(&payload[..BITMAP_BYTES])
            .ok_or(FsError::BadImage("unreadable block map"))?;
        let inode_map = Bitmap::parse(&payload[BITMAP_BYTES..2 * BITMAP_BYTES])
            .ok_or(FsError::BadImage("unreadable inode map"))?;
        Ok(Self {
            block_map,
            inode_map,
            arena: payload[2 * BITMAP_BYTES..].to_vec(),
        })
    }
}
