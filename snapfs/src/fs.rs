use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::alloc::State;
use crate::error::FsError;
use crate::node::{join_path, split_path, Node, NodeKind, Tree, NAME_MAX, ROOT_ID};
use crate::sb::{
    BlockStore, BLOCK_COUNT, BLOCK_SIZE, DATA_BLOCK_START, FILE_BLOCKS, INODE_COUNT,
    INODE_ID_START, MAX_FILE_SIZE,
};
use crate::snapshot::{decode_tree, encode_tree, ImageHeader, BLOCK_MAGIC, TREE_MAGIC};
use crate::store::SnapshotStore;

/// Identifies the user an engine acts as. New nodes take their ownership
/// from these ids.
#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    /// The real user and group of the calling process.
    pub fn current_user() -> Self {
        unsafe {
            Self {
                uid: libc::getuid(),
                gid: libc::getgid(),
            }
        }
    }
}

/// Everything getattr reports about one node. Timestamps are seconds since
/// the Unix epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub kind: NodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub blocks: u32,
    pub crtime: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

/// Capacity counters, reported the way statfs wants them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatFs {
    pub block_size: u32,
    pub blocks_total: u32,
    pub blocks_free: u32,
    pub inodes_total: u32,
    pub inodes_free: u32,
}

/// A snapshot-persisted filesystem over a fixed arena of one hundred 1k
/// blocks. The whole state lives in memory; every successful mutation
/// rewrites both snapshot artifacts before returning, so the store always
/// reflects the last completed operation. Concurrent callers must
/// serialize behind the exclusive borrow the mutating operations take.
pub struct SnapFs<S: SnapshotStore> {
    store: S,
    tree: Tree,
    blocks: BlockStore,
    creds: Credentials,
}

impl<S: SnapshotStore> SnapFs<S> {
    /// Formats a fresh filesystem onto the store: clear maps, zeroed arena,
    /// and a root directory owned by `creds`.
    pub fn format(store: S, creds: Credentials) -> Result<Self, FsError> {
        let root = Node::root(creds.uid, creds.gid, clock());
        let mut fs = Self {
            store,
            tree: Tree::new(root),
            blocks: BlockStore::new(),
            creds,
        };
        info!("formatting fresh filesystem");
        fs.save()?;
        Ok(fs)
    }

    /// Loads a previously formatted filesystem from the store's images,
    /// verifying the headers, every record, and the agreement between the
    /// tree and the occupancy maps.
    pub fn load(mut store: S, creds: Credentials) -> Result<Self, FsError> {
        let tree_img = store.read_tree()?.ok_or(FsError::NotFormatted)?;
        let block_img = store.read_blocks()?.ok_or(FsError::NotFormatted)?;
        let tree = decode_tree(ImageHeader::open_payload(&tree_img, TREE_MAGIC)?)?;
        let blocks = BlockStore::parse(ImageHeader::open_payload(&block_img, BLOCK_MAGIC)?)?;
        verify_maps(&tree, &blocks)?;
        info!("loaded filesystem with {} live nodes", tree.len());
        Ok(Self {
            store,
            tree,
            blocks,
            creds,
        })
    }

    /// Loads the store's filesystem if one exists, otherwise formats one.
    pub fn load_or_format(mut store: S, creds: Credentials) -> Result<Self, FsError> {
        match store.read_tree()? {
            Some(_) => Self::load(store, creds),
            None => Self::format(store, creds),
        }
    }

    /// Returns ownership of the underlying store to the caller.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Writes both artifacts back to the store.
    ///
    /// # Layout
    /// ==================================================
    /// tree.bin:   | header | 31 node records |
    /// blocks.bin: | header | block map | inode map | arena |
    /// ==================================================
    fn save(&mut self) -> Result<(), FsError> {
        let tree_img = ImageHeader::seal(TREE_MAGIC, &encode_tree(&self.tree)?);
        self.store.write_tree(&tree_img)?;
        let block_img = ImageHeader::seal(BLOCK_MAGIC, &self.blocks.serialize());
        self.store.write_blocks(&block_img)?;
        Ok(())
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<(), FsError> {
        debug!("mkdir {} mode {:o}", path, mode);
        self.make_node(path, NodeKind::Directory, mode)
    }

    pub fn create(&mut self, path: &str, mode: u32) -> Result<(), FsError> {
        debug!("create {} mode {:o}", path, mode);
        self.make_node(path, NodeKind::File, mode)
    }

    fn make_node(&mut self, path: &str, kind: NodeKind, mode: u32) -> Result<(), FsError> {
        let (parent_path, name) = split_path(path)?;
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        let parent = self.tree.resolve(parent_path)?;
        if self.tree.get(parent).kind != NodeKind::Directory {
            return Err(FsError::NotDirectory);
        }
        if self.tree.child_by_name(parent, name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        self.tree.check_attach(parent, 0)?;

        let full_path = join_path(&self.tree.get(parent).path, name);
        let mut node = Node::new(
            kind,
            name,
            &full_path,
            mode,
            self.creds.uid,
            self.creds.gid,
            clock(),
        );
        if kind == NodeKind::File {
            // Files reserve all sixteen blocks up front; a failed grab
            // leaves no allocation behind.
            let ino = self.blocks.allocate_inode()?;
            let reserved = match self.blocks.allocate_blocks(FILE_BLOCKS) {
                Ok(ids) => ids,
                Err(e) => {
                    self.blocks.release_inode(ino);
                    return Err(e);
                }
            };
            node.inode = ino;
            node.block_ids.copy_from_slice(&reserved);
        }
        let id = self.tree.insert(node);
        self.tree.attach(parent, id);
        self.save()
    }

    pub fn getattr(&self, path: &str) -> Result<Metadata, FsError> {
        debug!("getattr {}", path);
        let node = self.tree.get(self.tree.resolve(path)?);
        Ok(Metadata {
            kind: node.kind,
            mode: node.mode,
            uid: node.uid,
            gid: node.gid,
            nlink: node.nlink + node.children.len() as u32,
            size: node.size,
            blocks: node.blocks_used,
            crtime: node.crtime,
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
        })
    }

    /// Lists a directory: `.` and `..` first, then the children in the
    /// order they were attached.
    pub fn readdir(&mut self, path: &str) -> Result<Vec<String>, FsError> {
        debug!("readdir {}", path);
        let id = self.tree.resolve(path)?;
        let mut entries = vec![".".to_string(), "..".to_string()];
        for &child in &self.tree.get(id).children {
            entries.push(self.tree.get(child).name.clone());
        }
        // Access time moves in memory only and rides along with the next
        // mutation snapshot.
        self.tree.get_mut(id).atime = clock();
        Ok(entries)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), FsError> {
        debug!("rmdir {}", path);
        self.remove_node(path)
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        debug!("unlink {}", path);
        self.remove_node(path)
    }

    /// Removal is kind-blind: rmdir and unlink accept either node kind, as
    /// long as the target has no children.
    fn remove_node(&mut self, path: &str) -> Result<(), FsError> {
        let (parent_path, name) = split_path(path)?;
        let parent = self.tree.resolve(parent_path)?;
        let id = self
            .tree
            .child_by_name(parent, name)
            .ok_or(FsError::NotFound)?;
        if !self.tree.get(id).children.is_empty() {
            return Err(FsError::NotEmpty);
        }
        self.tree.detach(id);
        let node = self.tree.remove(id);
        if node.kind == NodeKind::File {
            self.blocks.release_inode(node.inode);
            for &blocknr in &node.block_ids {
                self.blocks.release_block(blocknr);
            }
        }
        self.save()
    }

    /// Moves or renames a node. The node is reparented when the
    /// destination names a different directory, and every descendant path
    /// is rebuilt afterwards.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        debug!("rename {} -> {}", from, to);
        let src = self.tree.resolve(from)?;
        if src == ROOT_ID {
            return Err(FsError::InvalidPath(from.to_string()));
        }
        let (to_parent_path, to_name) = split_path(to)?;
        if to_name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        let dst_parent = self.tree.resolve(to_parent_path)?;
        if self.tree.get(dst_parent).kind != NodeKind::Directory {
            return Err(FsError::NotDirectory);
        }
        if let Some(existing) = self.tree.child_by_name(dst_parent, to_name) {
            if existing != src {
                return Err(FsError::AlreadyExists);
            }
        }
        // A directory cannot move below itself.
        if self.tree.in_subtree(dst_parent, src) {
            return Err(FsError::InvalidPath(to.to_string()));
        }
        if self.tree.get(src).parent != Some(dst_parent) {
            self.tree.check_attach(dst_parent, self.tree.height(src))?;
            self.tree.detach(src);
            self.tree.attach(dst_parent, src);
        }
        self.tree.get_mut(src).name = to_name.to_string();
        self.tree.rebuild_paths(src);
        self.save()
    }

    /// Open hands out success for any well formed path without checking
    /// that the entry exists; lookups happen per operation instead of per
    /// handle.
    pub fn open(&self, path: &str) -> Result<(), FsError> {
        debug!("open {}", path);
        if !path.starts_with('/') {
            return Err(FsError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    /// Reads up to `size` bytes starting at `offset`, clamped at the end
    /// of the file. Reading at or past the end returns an empty buffer.
    pub fn read(&mut self, path: &str, offset: u64, size: u64) -> Result<Vec<u8>, FsError> {
        debug!("read {} offset {} size {}", path, offset, size);
        let id = self.tree.resolve(path)?;
        if self.tree.get(id).kind == NodeKind::Directory {
            return Err(FsError::IsDirectory);
        }
        let (file_len, block_ids) = {
            let node = self.tree.get(id);
            (node.size, node.block_ids)
        };
        self.tree.get_mut(id).atime = clock();

        let start = offset.min(file_len) as usize;
        let end = offset.saturating_add(size).min(file_len) as usize;
        let mut out = Vec::with_capacity(end - start);
        let mut pos = start;
        while pos < end {
            let blocknr = block_ids[pos / BLOCK_SIZE];
            let block_off = pos % BLOCK_SIZE;
            let take = (BLOCK_SIZE - block_off).min(end - pos);
            out.extend_from_slice(&self.blocks.block(blocknr)[block_off..block_off + take]);
            pos += take;
        }
        Ok(out)
    }

    /// Writes the whole payload at `offset`, overwriting where it overlaps
    /// existing content and appending past the old end. A payload that
    /// fills the last partial block spills into the next reserved block.
    /// Offsets past the current end are rejected; the file never grows a
    /// seventeenth block.
    pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<usize, FsError> {
        debug!("write {} offset {} len {}", path, offset, buf.len());
        let id = self.tree.resolve(path)?;
        {
            let node = self.tree.get(id);
            if node.kind == NodeKind::Directory {
                return Err(FsError::IsDirectory);
            }
            if offset > node.size {
                return Err(FsError::InvalidOffset);
            }
        }
        let end = (offset as usize).saturating_add(buf.len());
        if end > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let block_ids = self.tree.get(id).block_ids;
        let mut pos = offset as usize;
        let mut written = 0;
        while written < buf.len() {
            let blocknr = block_ids[pos / BLOCK_SIZE];
            let block_off = pos % BLOCK_SIZE;
            let take = (BLOCK_SIZE - block_off).min(buf.len() - written);
            self.blocks.block_mut(blocknr)[block_off..block_off + take]
                .copy_from_slice(&buf[written..written + take]);
            pos += take;
            written += take;
        }

        let node = self.tree.get_mut(id);
        if end as u64 > node.size {
            node.size = end as u64;
        }
        node.blocks_used = ((node.size as usize + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32;
        self.save()?;
        Ok(buf.len())
    }

    /// Cuts a file to `size` or extends it with zero bytes, staying within
    /// the reserved blocks.
    pub fn truncate(&mut self, path: &str, size: u64) -> Result<(), FsError> {
        debug!("truncate {} to {}", path, size);
        let id = self.tree.resolve(path)?;
        if self.tree.get(id).kind == NodeKind::Directory {
            return Err(FsError::IsDirectory);
        }
        if size > MAX_FILE_SIZE as u64 {
            return Err(FsError::FileTooLarge);
        }
        let (old_size, block_ids) = {
            let node = self.tree.get(id);
            (node.size, node.block_ids)
        };

        // Zero the gap so an extended read sees no stale bytes.
        let mut pos = old_size as usize;
        let end = size as usize;
        while pos < end {
            let blocknr = block_ids[pos / BLOCK_SIZE];
            let block_off = pos % BLOCK_SIZE;
            let take = (BLOCK_SIZE - block_off).min(end - pos);
            for byte in &mut self.blocks.block_mut(blocknr)[block_off..block_off + take] {
                *byte = 0;
            }
            pos += take;
        }

        let node = self.tree.get_mut(id);
        node.size = size;
        node.blocks_used = ((size as usize + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32;
        self.save()
    }

    pub fn statfs(&self) -> StatFs {
        StatFs {
            block_size: BLOCK_SIZE as u32,
            blocks_total: (BLOCK_COUNT - DATA_BLOCK_START) as u32,
            blocks_free: self.blocks.free_data_blocks() as u32,
            inodes_total: (INODE_COUNT - INODE_ID_START) as u32,
            inodes_free: self.blocks.free_inodes() as u32,
        }
    }
}

/// Cross check of a decoded tree against the occupancy maps. A save writes
/// the two artifacts one after the other, so a torn save can pair a fresh
/// tree image with a stale block image that both pass their checksums.
/// File ownership must match the maps exactly, one owner per bit.
fn verify_maps(tree: &Tree, blocks: &BlockStore) -> Result<(), FsError> {
    let mut inode_owned = [false; INODE_COUNT];
    let mut block_owned = [false; BLOCK_COUNT];

    let mut stack = vec![ROOT_ID];
    while let Some(id) = stack.pop() {
        let node = tree.get(id);
        stack.extend(&node.children);
        if node.kind != NodeKind::File {
            continue;
        }
        let ino = node.inode as usize;
        if inode_owned[ino] {
            return Err(FsError::BadImage("inode assigned twice"));
        }
        inode_owned[ino] = true;
        if blocks.inode_state(ino) != State::Used {
            return Err(FsError::BadImage("inode map disagrees with the tree"));
        }
        for &blocknr in node.block_ids.iter() {
            let blocknr = blocknr as usize;
            if block_owned[blocknr] {
                return Err(FsError::BadImage("block assigned twice"));
            }
            block_owned[blocknr] = true;
            if blocks.block_state(blocknr) != State::Used {
                return Err(FsError::BadImage("block map disagrees with the tree"));
            }
        }
    }

    for ino in 0..INODE_COUNT {
        if blocks.inode_state(ino) == State::Used && !inode_owned[ino] {
            return Err(FsError::BadImage("inode map disagrees with the tree"));
        }
    }
    for blocknr in 0..BLOCK_COUNT {
        if blocks.block_state(blocknr) == State::Used && !block_owned[blocknr] {
            return Err(FsError::BadImage("block map disagrees with the tree"));
        }
    }
    Ok(())
}

fn clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn test_creds() -> Credentials {
        Credentials {
            uid: 1000,
            gid: 1000,
        }
    }

    fn new_fs() -> SnapFs<MemStore> {
        SnapFs::format(MemStore::new(), test_creds()).unwrap()
    }

    #[test]
    fn written_content_reads_back_exactly() {
        let mut fs = new_fs();
        fs.create("/a.txt", 0o644).unwrap();

        assert_eq!(fs.write("/a.txt", b"hello", 0).unwrap(), 5);

        assert_eq!(fs.read("/a.txt", 0, 4096).unwrap(), b"hello");
        let meta = fs.getattr("/a.txt").unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.blocks, 1);
        assert_eq!(meta.kind, NodeKind::File);
    }

    #[test]
    fn getattr_reports_root_and_ownership() {
        let mut fs = new_fs();
        let meta = fs.getattr("/").unwrap();
        assert_eq!(meta.kind, NodeKind::Directory);
        assert_eq!(meta.nlink, 2);
        assert_eq!(meta.uid, 1000);
        assert_eq!(meta.size, 0);

        fs.mkdir("/d", 0o755).unwrap();
        assert_eq!(fs.getattr("/").unwrap().nlink, 3);
        assert_eq!(fs.getattr("/d").unwrap().mode & 0o7777, 0o755);
    }

    #[test]
    fn readdir_lists_dot_entries_then_children_in_order() {
        let mut fs = new_fs();
        fs.mkdir("/d", 0o755).unwrap();
        fs.create("/b.txt", 0o644).unwrap();
        fs.create("/a.txt", 0o644).unwrap();

        assert_eq!(fs.readdir("/").unwrap(), vec![".", "..", "d", "b.txt", "a.txt"]);
        assert_eq!(fs.readdir("/d").unwrap(), vec![".", ".."]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();

        assert!(matches!(
            fs.create("/a", 0o644),
            Err(FsError::AlreadyExists)
        ));
        assert!(matches!(fs.mkdir("/a", 0o755), Err(FsError::AlreadyExists)));
    }

    #[test]
    fn names_longer_than_the_limit_are_rejected() {
        let mut fs = new_fs();
        let long = format!("/{}", "n".repeat(NAME_MAX + 1));
        let just_fits = format!("/{}", "n".repeat(NAME_MAX));

        assert!(matches!(
            fs.create(&long, 0o644),
            Err(FsError::NameTooLong)
        ));
        fs.create(&just_fits, 0o644).unwrap();
    }

    #[test]
    fn creation_needs_an_existing_parent_directory() {
        let mut fs = new_fs();
        fs.create("/f", 0o644).unwrap();

        assert!(matches!(
            fs.create("/missing/x", 0o644),
            Err(FsError::NotFound)
        ));
        assert!(matches!(
            fs.create("/f/x", 0o644),
            Err(FsError::NotDirectory)
        ));
        assert!(matches!(
            fs.create("/", 0o644),
            Err(FsError::InvalidPath(_))
        ));
        assert!(matches!(
            fs.create("/f//x", 0o644),
            Err(FsError::InvalidPath(_))
        ));
    }

    #[test]
    fn sixth_child_of_a_directory_is_rejected() {
        let mut fs = new_fs();
        fs.mkdir("/d", 0o755).unwrap();
        for n in 0..5 {
            fs.create(&format!("/d/f{}", n), 0o644).unwrap();
        }

        assert!(matches!(
            fs.create("/d/f5", 0o644),
            Err(FsError::TreeFull)
        ));
    }

    #[test]
    fn directories_below_depth_two_are_rejected() {
        let mut fs = new_fs();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mkdir("/a/b", 0o755).unwrap();

        assert!(matches!(
            fs.mkdir("/a/b/c", 0o755),
            Err(FsError::TreeFull)
        ));
        assert!(matches!(
            fs.create("/a/b/c.txt", 0o644),
            Err(FsError::TreeFull)
        ));
    }

    #[test]
    fn populated_directories_refuse_removal() {
        let mut fs = new_fs();
        fs.mkdir("/d", 0o755).unwrap();
        fs.create("/d/a.txt", 0o644).unwrap();

        assert!(matches!(fs.rmdir("/d"), Err(FsError::NotEmpty)));

        fs.unlink("/d/a.txt").unwrap();
        fs.rmdir("/d").unwrap();
        assert_eq!(fs.readdir("/").unwrap(), vec![".", ".."]);
        assert!(matches!(fs.getattr("/d"), Err(FsError::NotFound)));
    }

    #[test]
    fn removing_missing_entries_reports_not_found() {
        let mut fs = new_fs();
        assert!(matches!(fs.unlink("/nope"), Err(FsError::NotFound)));
        assert!(matches!(fs.rmdir("/d/nope"), Err(FsError::NotFound)));
    }

    #[test]
    fn unlink_releases_the_inode_and_all_reserved_blocks() {
        let mut fs = new_fs();
        let before = fs.statfs();
        fs.create("/a", 0o644).unwrap();

        let held = fs.statfs();
        assert_eq!(held.blocks_free, before.blocks_free - FILE_BLOCKS as u32);
        assert_eq!(held.inodes_free, before.inodes_free - 1);

        fs.unlink("/a").unwrap();
        assert_eq!(fs.statfs(), before);
    }

    #[test]
    fn seventh_file_fails_until_space_is_reclaimed() {
        let mut fs = new_fs();
        fs.mkdir("/d0", 0o755).unwrap();
        for n in 0..5 {
            fs.create(&format!("/d0/f{}", n), 0o644).unwrap();
        }
        fs.create("/f5", 0o644).unwrap();
        // Six files hold 96 of the 99 data blocks.
        assert_eq!(fs.statfs().blocks_free, 3);

        assert!(matches!(
            fs.create("/f6", 0o644),
            Err(FsError::OutOfBlocks)
        ));
        // The failed attempt must not leak its partial reservation.
        assert_eq!(fs.statfs().blocks_free, 3);

        fs.unlink("/d0/f0").unwrap();
        fs.create("/f6", 0o644).unwrap();
        assert_eq!(fs.statfs().blocks_free, 3);
    }

    #[test]
    fn writes_spanning_a_block_boundary_split_over_reserved_blocks() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        let head = vec![b'x'; BLOCK_SIZE - 4];
        fs.write("/a", &head, 0).unwrap();
        assert_eq!(fs.getattr("/a").unwrap().blocks, 1);

        fs.write("/a", b"0123456789", (BLOCK_SIZE - 4) as u64).unwrap();

        let meta = fs.getattr("/a").unwrap();
        assert_eq!(meta.size, (BLOCK_SIZE + 6) as u64);
        assert_eq!(meta.blocks, 2);
        let mut expected = head;
        expected.extend_from_slice(b"0123456789");
        assert_eq!(fs.read("/a", 0, u64::max_value()).unwrap(), expected);
    }

    #[test]
    fn appends_at_an_exact_block_multiple_open_the_next_block() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        fs.write("/a", &vec![b'y'; BLOCK_SIZE], 0).unwrap();
        assert_eq!(fs.getattr("/a").unwrap().blocks, 1);

        fs.write("/a", b"tail", BLOCK_SIZE as u64).unwrap();

        let meta = fs.getattr("/a").unwrap();
        assert_eq!(meta.size, (BLOCK_SIZE + 4) as u64);
        assert_eq!(meta.blocks, 2);
        assert_eq!(fs.read("/a", BLOCK_SIZE as u64 - 2, 6).unwrap(), b"yytail");
    }

    #[test]
    fn overwrites_inside_existing_content_keep_the_size() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        fs.write("/a", b"abcdef", 0).unwrap();

        fs.write("/a", b"XY", 2).unwrap();

        assert_eq!(fs.read("/a", 0, 64).unwrap(), b"abXYef");
        assert_eq!(fs.getattr("/a").unwrap().size, 6);
    }

    #[test]
    fn writes_past_the_end_of_file_are_rejected() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        fs.write("/a", b"ab", 0).unwrap();

        assert!(matches!(
            fs.write("/a", b"gap", 3),
            Err(FsError::InvalidOffset)
        ));
    }

    #[test]
    fn files_never_outgrow_their_reserved_blocks() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();

        assert!(matches!(
            fs.write("/a", &vec![0u8; MAX_FILE_SIZE + 1], 0),
            Err(FsError::FileTooLarge)
        ));

        fs.write("/a", &vec![0u8; MAX_FILE_SIZE], 0).unwrap();
        assert_eq!(fs.getattr("/a").unwrap().blocks, FILE_BLOCKS as u32);
        assert!(matches!(
            fs.write("/a", b"x", MAX_FILE_SIZE as u64),
            Err(FsError::FileTooLarge)
        ));
    }

    #[test]
    fn zero_length_writes_change_nothing() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        fs.write("/a", b"abc", 0).unwrap();

        assert_eq!(fs.write("/a", b"", 1).unwrap(), 0);
        assert_eq!(fs.read("/a", 0, 64).unwrap(), b"abc");
    }

    #[test]
    fn reads_honor_offset_and_clamp_at_the_end() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        fs.write("/a", b"hello", 0).unwrap();

        assert_eq!(fs.read("/a", 3, 100).unwrap(), b"lo");
        assert_eq!(fs.read("/a", 5, 10).unwrap(), b"");
        assert_eq!(fs.read("/a", 99, 10).unwrap(), b"");
        assert_eq!(fs.read("/a", 0, 0).unwrap(), b"");
    }

    #[test]
    fn directory_content_access_is_rejected() {
        let mut fs = new_fs();
        fs.mkdir("/d", 0o755).unwrap();

        assert!(matches!(
            fs.read("/d", 0, 10),
            Err(FsError::IsDirectory)
        ));
        assert!(matches!(
            fs.write("/d", b"x", 0),
            Err(FsError::IsDirectory)
        ));
        assert!(matches!(fs.truncate("/d", 0), Err(FsError::IsDirectory)));
    }

    #[test]
    fn rename_moves_a_file_into_a_directory() {
        let mut fs = new_fs();
        fs.create("/a.txt", 0o644).unwrap();
        fs.write("/a.txt", b"payload", 0).unwrap();
        fs.mkdir("/d", 0o755).unwrap();

        fs.rename("/a.txt", "/d/a.txt").unwrap();

        assert_eq!(fs.readdir("/d").unwrap(), vec![".", "..", "a.txt"]);
        assert_eq!(fs.readdir("/").unwrap(), vec![".", "..", "d"]);
        assert_eq!(fs.read("/d/a.txt", 0, 64).unwrap(), b"payload");
        assert!(matches!(fs.getattr("/a.txt"), Err(FsError::NotFound)));
    }

    #[test]
    fn rename_within_a_directory_changes_the_name() {
        let mut fs = new_fs();
        fs.create("/old", 0o644).unwrap();
        fs.write("/old", b"kept", 0).unwrap();

        fs.rename("/old", "/new").unwrap();

        assert_eq!(fs.read("/new", 0, 64).unwrap(), b"kept");
        assert!(matches!(fs.getattr("/old"), Err(FsError::NotFound)));
    }

    #[test]
    fn renaming_a_directory_follows_its_descendants() {
        let mut fs = new_fs();
        fs.mkdir("/d", 0o755).unwrap();
        fs.create("/d/f", 0o644).unwrap();
        fs.write("/d/f", b"deep", 0).unwrap();

        fs.rename("/d", "/e").unwrap();

        assert_eq!(fs.read("/e/f", 0, 64).unwrap(), b"deep");
        assert!(matches!(fs.getattr("/d/f"), Err(FsError::NotFound)));
    }

    #[test]
    fn rename_guards_destination_and_root() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        fs.create("/b", 0o644).unwrap();
        fs.mkdir("/d", 0o755).unwrap();

        assert!(matches!(
            fs.rename("/a", "/b"),
            Err(FsError::AlreadyExists)
        ));
        assert!(matches!(
            fs.rename("/", "/r"),
            Err(FsError::InvalidPath(_))
        ));
        assert!(matches!(
            fs.rename("/d", "/d/sub"),
            Err(FsError::InvalidPath(_))
        ));
        assert!(matches!(fs.rename("/nope", "/x"), Err(FsError::NotFound)));
    }

    #[test]
    fn rename_cannot_push_a_subtree_past_the_depth_limit() {
        let mut fs = new_fs();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mkdir("/a/b", 0o755).unwrap();
        fs.mkdir("/x", 0o755).unwrap();

        assert!(matches!(
            fs.rename("/a", "/x/a"),
            Err(FsError::TreeFull)
        ));
        // Without the child the same move fits.
        fs.rmdir("/a/b").unwrap();
        fs.rename("/a", "/x/a").unwrap();
        assert_eq!(fs.readdir("/x").unwrap(), vec![".", "..", "a"]);
    }

    #[test]
    fn open_succeeds_without_checking_existence() {
        let fs = new_fs();
        fs.open("/no/such/entry").unwrap();
        assert!(matches!(
            fs.open("relative"),
            Err(FsError::InvalidPath(_))
        ));
    }

    #[test]
    fn truncate_shrinks_and_extends_with_zeroes() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        fs.write("/a", b"hello", 0).unwrap();

        fs.truncate("/a", 2).unwrap();
        assert_eq!(fs.read("/a", 0, 64).unwrap(), b"he");
        assert_eq!(fs.getattr("/a").unwrap().blocks, 1);

        fs.truncate("/a", 5).unwrap();
        assert_eq!(fs.read("/a", 0, 64).unwrap(), b"he\0\0\0");

        fs.truncate("/a", 0).unwrap();
        assert_eq!(fs.getattr("/a").unwrap().blocks, 0);

        assert!(matches!(
            fs.truncate("/a", MAX_FILE_SIZE as u64 + 1),
            Err(FsError::FileTooLarge)
        ));
    }

    #[test]
    fn statfs_reports_fixed_totals_and_live_counts() {
        let mut fs = new_fs();
        let initial = fs.statfs();
        assert_eq!(initial.block_size, BLOCK_SIZE as u32);
        assert_eq!(initial.blocks_total, 99);
        assert_eq!(initial.blocks_free, 99);
        assert_eq!(initial.inodes_total, 98);
        assert_eq!(initial.inodes_free, 98);

        fs.create("/a", 0o644).unwrap();
        let held = fs.statfs();
        assert_eq!(held.blocks_free, 83);
        assert_eq!(held.inodes_free, 97);
    }

    #[test]
    fn full_state_survives_a_snapshot_reload() {
        let mut fs = new_fs();
        fs.mkdir("/docs", 0o750).unwrap();
        fs.create("/docs/notes.txt", 0o640).unwrap();
        fs.write("/docs/notes.txt", b"remember the milk", 0).unwrap();
        fs.create("/top.txt", 0o644).unwrap();
        fs.write("/top.txt", b"shallow", 0).unwrap();
        let stats = fs.statfs();

        let mut fs = SnapFs::load(fs.into_store(), test_creds()).unwrap();

        assert_eq!(fs.readdir("/").unwrap(), vec![".", "..", "docs", "top.txt"]);
        assert_eq!(
            fs.read("/docs/notes.txt", 0, 64).unwrap(),
            b"remember the milk"
        );
        assert_eq!(fs.read("/top.txt", 0, 64).unwrap(), b"shallow");
        let meta = fs.getattr("/docs/notes.txt").unwrap();
        assert_eq!(meta.size, 17);
        assert_eq!(meta.mode & 0o7777, 0o640);
        assert_eq!(fs.statfs(), stats);

        // Reclamation still works against reloaded maps.
        fs.unlink("/docs/notes.txt").unwrap();
        assert_eq!(fs.statfs().blocks_free, stats.blocks_free + 16);
    }

    #[test]
    fn corrupted_tree_image_fails_to_load() {
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        let mut store = fs.into_store();
        store.tree.as_mut().unwrap()[100] ^= 0xff;

        assert!(matches!(
            SnapFs::load(store, test_creds()),
            Err(FsError::BadImage(_))
        ));
    }

    #[test]
    fn mixed_generation_images_are_rejected_at_load() {
        // A fresh tree image beside a block image from before the create.
        let fs = new_fs();
        let store = fs.into_store();
        let stale_blocks = store.blocks.clone();
        let mut fs = SnapFs::load(store, test_creds()).unwrap();
        fs.create("/a", 0o644).unwrap();
        let mut store = fs.into_store();
        store.blocks = stale_blocks;

        assert!(matches!(
            SnapFs::load(store, test_creds()),
            Err(FsError::BadImage(_))
        ));

        // The reverse tear: the tree lost a file the block image still
        // tracks.
        let mut fs = new_fs();
        fs.create("/a", 0o644).unwrap();
        let store = fs.into_store();
        let stale_blocks = store.blocks.clone();
        let mut fs = SnapFs::load(store, test_creds()).unwrap();
        fs.unlink("/a").unwrap();
        let mut store = fs.into_store();
        store.blocks = stale_blocks;

        assert!(matches!(
            SnapFs::load(store, test_creds()),
            Err(FsError::BadImage(_))
        ));
    }

    #[test]
    fn loading_an_empty_store_reports_not_formatted() {
        assert!(matches!(
            SnapFs::load(MemStore::new(), test_creds()),
            Err(FsError::NotFormatted)
        ));
    }

    #[test]
    fn load_or_format_formats_once_then_reloads() {
        let mut fs = SnapFs::load_or_format(MemStore::new(), test_creds()).unwrap();
        fs.mkdir("/kept", 0o755).unwrap();

        let fs = SnapFs::load_or_format(fs.into_store(), test_creds()).unwrap();
        assert_eq!(fs.getattr("/kept").unwrap().kind, NodeKind::Directory);
    }

    #[test]
    fn open_and_create_keep_working_after_a_reload() {
        let fs = new_fs();
        let mut fs = SnapFs::load(fs.into_store(), test_creds()).unwrap();

        fs.open("/anything").unwrap();
        fs.create("/a", 0o644).unwrap();
        assert_eq!(fs.getattr("/a").unwrap().kind, NodeKind::File);
    }
}
