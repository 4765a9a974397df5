use std::collections::VecDeque;
use std::mem;

use zerocopy::{AsBytes, FromBytes};

use crate::error::FsError;
use crate::node::{Node, NodeId, NodeKind, Tree, FANOUT, NAME_MAX, ROOT_ID};
use crate::sb::{
    BLOCK_COUNT, BLOCK_SIZE, DATA_BLOCK_START, FILE_BLOCKS, INODE_COUNT, INODE_ID_START,
    MAX_FILE_SIZE,
};

/// The tree image holds a complete 5-ary tree two levels deep: the root,
/// its five child slots, and their twenty five child slots. Slot i's
/// children always occupy slots 5i+1 through 5i+5, so the array position
/// alone encodes the shape.
pub const NODE_SLOTS: usize = 1 + FANOUT + FANOUT * FANOUT;

pub const RECORD_SIZE: usize = mem::size_of::<NodeRecord>();

pub const TREE_MAGIC: u32 = 0x534e_5054; // SNPT
pub const BLOCK_MAGIC: u32 = 0x534e_5042; // SNPB
pub const FORMAT_VERSION: u32 = 1;

const KIND_FILE: u32 = 1;
const KIND_DIR: u32 = 2;

/// Fixed-width name and path fields. A depth-two path built from maximum
/// length names fills the path field exactly.
const NAME_BYTES: usize = NAME_MAX + 1;
const PATH_BYTES: usize = 128;

/// FNV-1a over the payload guards both artifacts against torn or flipped
/// bytes.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn be_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn be_u64(buf: &[u8]) -> u64 {
    u64::from_be_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}

/// 24-byte prefix on every image artifact, big endian field by field:
/// magic, format version, payload length, payload checksum.
#[derive(Debug, PartialEq)]
pub struct ImageHeader {
    pub magic: u32,
    pub version: u32,
    pub payload_len: u64,
    pub checksum: u64,
}

impl ImageHeader {
    pub const LEN: usize = 24;

    pub fn serialize(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..8].copy_from_slice(&self.version.to_be_bytes());
        buf[8..16].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[16..24].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FsError> {
        if buf.len() < Self::LEN {
            return Err(FsError::BadImage("truncated header"));
        }
        Ok(Self {
            magic: be_u32(&buf[0..4]),
            version: be_u32(&buf[4..8]),
            payload_len: be_u64(&buf[8..16]),
            checksum: be_u64(&buf[16..24]),
        })
    }

    /// Wraps a payload into a finished artifact.
    pub fn seal(magic: u32, payload: &[u8]) -> Vec<u8> {
        let header = ImageHeader {
            magic,
            version: FORMAT_VERSION,
            payload_len: payload.len() as u64,
            checksum: fnv1a64(payload),
        };
        let mut out = Vec::with_capacity(Self::LEN + payload.len());
        out.extend_from_slice(&header.serialize());
        out.extend_from_slice(payload);
        out
    }

    /// Verifies magic, version, length, and checksum, then hands back the
    /// payload slice.
    pub fn open_payload(buf: &[u8], magic: u32) -> Result<&[u8], FsError> {
        let header = Self::parse(buf)?;
        if header.magic != magic {
            return Err(FsError::BadImage("wrong magic"));
        }
        if header.version != FORMAT_VERSION {
            return Err(FsError::BadImage("unsupported format version"));
        }
        let payload = &buf[Self::LEN..];
        if payload.len() as u64 != header.payload_len {
            return Err(FsError::BadImage("payload length mismatch"));
        }
        if fnv1a64(payload) != header.checksum {
            return Err(FsError::BadImage("checksum mismatch"));
        }
        Ok(payload)
    }
}

/// On-disk form of one namespace node. Field order keeps the struct free of
/// padding: the u64s lead, then the u32s, then the byte arrays.
#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy)]
pub struct NodeRecord {
    size: u64,
    crtime: u64,
    atime: u64,
    mtime: u64,
    ctime: u64,
    valid: u32,
    kind: u32,
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    inode: u32,
    blocks_used: u32,
    block_ids: [u32; FILE_BLOCKS],
    name_len: u32,
    path_len: u32,
    name: [u8; NAME_BYTES],
    path: [u8; PATH_BYTES],
}

impl NodeRecord {
    fn from_node(node: &Node) -> Self {
        assert!(node.name.len() <= NAME_BYTES);
        assert!(node.path.len() <= PATH_BYTES);
        let mut name = [0u8; NAME_BYTES];
        name[..node.name.len()].copy_from_slice(node.name.as_bytes());
        let mut path = [0u8; PATH_BYTES];
        path[..node.path.len()].copy_from_slice(node.path.as_bytes());
        Self {
            size: node.size,
            crtime: node.crtime,
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
            valid: 1,
            kind: match node.kind {
                NodeKind::File => KIND_FILE,
                NodeKind::Directory => KIND_DIR,
            },
            mode: node.mode,
            uid: node.uid,
            gid: node.gid,
            nlink: node.nlink,
            inode: node.inode,
            blocks_used: node.blocks_used,
            block_ids: node.block_ids,
            name_len: node.name.len() as u32,
            path_len: node.path.len() as u32,
            name,
            path,
        }
    }

    /// Rebuilds a node from a record, validating every field that the
    /// engine relies on. The node comes back unattached; the caller wires
    /// parent and children from the slot geometry.
    fn to_node(&self) -> Result<Node, FsError> {
        let kind = match self.kind {
            KIND_FILE => NodeKind::File,
            KIND_DIR => NodeKind::Directory,
            _ => return Err(FsError::BadImage("unknown node kind")),
        };
        let name_len = self.name_len as usize;
        let path_len = self.path_len as usize;
        if name_len > NAME_BYTES || path_len > PATH_BYTES {
            return Err(FsError::BadImage("name or path length out of range"));
        }
        let name = std::str::from_utf8(&self.name[..name_len])
            .map_err(|_| FsError::BadImage("name is not utf-8"))?
            .to_string();
        let path = std::str::from_utf8(&self.path[..path_len])
            .map_err(|_| FsError::BadImage("path is not utf-8"))?
            .to_string();

        match kind {
            NodeKind::File => {
                let ino = self.inode as usize;
                if ino < INODE_ID_START || ino >= INODE_COUNT {
                    return Err(FsError::BadImage("inode id out of range"));
                }
                if self.size > MAX_FILE_SIZE as u64 {
                    return Err(FsError::BadImage("file size out of range"));
                }
                let expected = (self.size as usize + BLOCK_SIZE - 1) / BLOCK_SIZE;
                if self.blocks_used as usize != expected {
                    return Err(FsError::BadImage("size and block count disagree"));
                }
                for &blocknr in self.block_ids.iter() {
                    let blocknr = blocknr as usize;
                    if blocknr < DATA_BLOCK_START || blocknr >= BLOCK_COUNT {
                        return Err(FsError::BadImage("block id out of range"));
                    }
                }
            }
            NodeKind::Directory => {
                if self.size != 0 || self.blocks_used != 0 {
                    return Err(FsError::BadImage("directory with file content"));
                }
            }
        }

        Ok(Node {
            name,
            path,
            kind,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            nlink: self.nlink,
            inode: self.inode,
            size: self.size,
            blocks_used: self.blocks_used,
            block_ids: self.block_ids,
            crtime: self.crtime,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            children: Vec::new(),
            parent: None,
        })
    }
}

/// Flattens the tree breadth first into exactly [`NODE_SLOTS`] records.
/// Every visited slot enqueues five child entries, real children first and
/// invalid placeholders after, so the geometry stays position encoded. A
/// tree that no longer fits the fixed shape is an error, never a silent
/// truncation; the mutation-time capacity checks make that a backstop.
pub fn encode_tree(tree: &Tree) -> Result<Vec<u8>, FsError> {
    // First slot whose children would land past the end of the array.
    const LEAF_SLOTS: usize = (NODE_SLOTS - 1) / FANOUT;

    let mut queue: VecDeque<Option<NodeId>> = VecDeque::new();
    queue.push_back(Some(ROOT_ID));
    let mut out = Vec::with_capacity(NODE_SLOTS * RECORD_SIZE);

    for slot in 0..NODE_SLOTS {
        match queue.pop_front().unwrap_or(None) {
            Some(id) => {
                let node = tree.get(id);
                if node.children.len() > FANOUT {
                    return Err(FsError::TreeFull);
                }
                if slot >= LEAF_SLOTS && !node.children.is_empty() {
                    return Err(FsError::TreeFull);
                }
                out.extend_from_slice(NodeRecord::from_node(node).as_bytes());
                for c in 0..FANOUT {
                    queue.push_back(node.children.get(c).copied());
                }
            }
            None => {
                out.extend_from_slice(NodeRecord::new_zeroed().as_bytes());
                for _ in 0..FANOUT {
                    queue.push_back(None);
                }
            }
        }
    }
    Ok(out)
}

/// Restores a tree from its flattened records. Every valid slot is relinked
/// to its computed parent slot (i-1)/5, so the full persisted shape comes
/// back, not just the first level. Child order follows ascending slot
/// order, which reproduces insertion order.
pub fn decode_tree(payload: &[u8]) -> Result<Tree, FsError> {
    if payload.len() != NODE_SLOTS * RECORD_SIZE {
        return Err(FsError::BadImage("wrong tree image size"));
    }
    let mut records = Vec::with_capacity(NODE_SLOTS);
    for slot in 0..NODE_SLOTS {
        let raw = &payload[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE];
        let record = NodeRecord::read_from(raw).ok_or(FsError::BadImage("short node record"))?;
        records.push(record);
    }

    if records[0].valid == 0 {
        return Err(FsError::BadImage("missing root record"));
    }
    let root = records[0].to_node()?;
    if root.kind != NodeKind::Directory {
        return Err(FsError::BadImage("root is not a directory"));
    }

    let mut tree = Tree::new(root);
    let mut slot_ids: Vec<Option<NodeId>> = vec![None; NODE_SLOTS];
    slot_ids[0] = Some(ROOT_ID);

    // Ascending slot order guarantees parents are rebuilt before children.
    for slot in 1..NODE_SLOTS {
        if records[slot].valid == 0 {
            continue;
        }
        let parent = slot_ids[(slot - 1) / FANOUT]
            .ok_or(FsError::BadImage("record parented to a vacant slot"))?;
        if tree.get(parent).kind != NodeKind::Directory {
            return Err(FsError::BadImage("record parented to a file"));
        }
        let node = records[slot].to_node()?;
        let id = tree.insert(node);
        tree.attach(parent, id);
        slot_ids[slot] = Some(id);
    }
    Ok(tree)
}
