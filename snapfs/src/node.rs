use crate::error::FsError;
use crate::sb::FILE_BLOCKS;

/// Longest usable name for a single path component.
pub const NAME_MAX: usize = 63;

/// Shape limits of the namespace. The snapshot format stores a complete
/// 5-ary tree two levels below the root, so mutations enforce the same
/// bounds up front: at most five children per directory, nothing deeper
/// than two levels.
pub const FANOUT: usize = 5;
pub const MAX_DEPTH: usize = 2;

/// Index of a node in the tree arena.
pub type NodeId = usize;

/// The root always sits in slot 0.
pub const ROOT_ID: NodeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// One file or directory. Files carry an inode id and the sixteen block ids
/// reserved for them at creation; directories carry neither and keep their
/// size fixed at zero. Timestamps are seconds since the Unix epoch.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Canonical absolute path, rebuilt whenever the node moves.
    pub path: String,
    pub kind: NodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub inode: u32,
    pub size: u64,
    pub blocks_used: u32,
    pub block_ids: [u32; FILE_BLOCKS],
    pub crtime: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl Node {
    pub fn root(uid: u32, gid: u32, now: u64) -> Self {
        let mut root = Node::new(NodeKind::Directory, "/", "/", 0o777, uid, gid, now);
        root.parent = None;
        root
    }

    pub fn new(
        kind: NodeKind,
        name: &str,
        path: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        now: u64,
    ) -> Self {
        let (type_bits, nlink) = match kind {
            NodeKind::Directory => (libc::S_IFDIR as u32, 2),
            NodeKind::File => (libc::S_IFREG as u32, 0),
        };
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind,
            mode: type_bits | (mode & 0o7777),
            uid,
            gid,
            nlink,
            inode: 0,
            size: 0,
            blocks_used: 0,
            block_ids: [0; FILE_BLOCKS],
            crtime: now,
            atime: now,
            mtime: now,
            ctime: now,
            children: Vec::new(),
            parent: None,
        }
    }
}

/// The namespace tree. Nodes live in slots addressed by [`NodeId`]; vacated
/// slots are recycled for later inserts. Parent links are plain ids, so the
/// arena is the only owner and no reference cycles exist.
pub struct Tree {
    slots: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

impl Tree {
    pub fn new(root: Node) -> Self {
        Self {
            slots: vec![Some(root)],
            free: Vec::new(),
        }
    }

    pub fn get(&self, id: NodeId) -> &Node {
        self.slots[id].as_ref().expect("vacant node slot")
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id].as_mut().expect("vacant node slot")
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    /// Vacates a slot and recycles its id. The node must already be
    /// detached from its parent.
    pub fn remove(&mut self, id: NodeId) -> Node {
        assert_ne!(id, ROOT_ID, "root is never removed");
        let node = self.slots[id].take().expect("vacant node slot");
        assert!(node.parent.is_none());
        self.free.push(id);
        node
    }

    /// Appends `child` to the end of `parent`'s child list.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.get_mut(child).parent = Some(parent);
        self.get_mut(parent).children.push(child);
    }

    /// Splices a node out of its parent's child list, keeping the order of
    /// the remaining siblings.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.get(id).parent {
            let children = &mut self.get_mut(parent).children;
            if let Some(at) = children.iter().position(|&c| c == id) {
                children.remove(at);
            }
            self.get_mut(id).parent = None;
        }
    }

    pub fn child_by_name(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.get(dir)
            .children
            .iter()
            .copied()
            .find(|&c| self.get(c).name == name)
    }

    /// Maps an absolute path to a node id. The path must start with `/`;
    /// one trailing slash is tolerated. Resolution walks the tree one
    /// component at a time and fails on the first miss.
    pub fn resolve(&self, path: &str) -> Result<NodeId, FsError> {
        let rest = match path.strip_prefix('/') {
            Some(rest) => rest,
            None => return Err(FsError::InvalidPath(path.to_string())),
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Ok(ROOT_ID);
        }

        let mut cur = ROOT_ID;
        for segment in rest.split('/') {
            cur = self
                .child_by_name(cur, segment)
                .ok_or(FsError::NotFound)?;
        }
        Ok(cur)
    }

    /// Levels between a node and the root; the root itself is at depth 0.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = id;
        while let Some(parent) = self.get(cur).parent {
            depth += 1;
            cur = parent;
        }
        depth
    }

    /// Levels between a node and its deepest descendant; a leaf has
    /// height 0.
    pub fn height(&self, id: NodeId) -> usize {
        self.get(id)
            .children
            .iter()
            .map(|&c| 1 + self.height(c))
            .max()
            .unwrap_or(0)
    }

    /// True when `id` sits at or below `top`.
    pub fn in_subtree(&self, id: NodeId, top: NodeId) -> bool {
        let mut cur = id;
        loop {
            if cur == top {
                return true;
            }
            match self.get(cur).parent {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }

    /// Checks that a subtree of the given height can hang below `parent`
    /// without breaking the fanout or depth limits.
    pub fn check_attach(&self, parent: NodeId, height: usize) -> Result<(), FsError> {
        if self.get(parent).children.len() >= FANOUT {
            return Err(FsError::TreeFull);
        }
        if self.depth(parent) + 1 + height > MAX_DEPTH {
            return Err(FsError::TreeFull);
        }
        Ok(())
    }

    /// Recomputes the canonical path of a node from its parent's path, then
    /// does the same for every descendant. Called after a rename.
    pub fn rebuild_paths(&mut self, id: NodeId) {
        if let Some(parent) = self.get(id).parent {
            let parent_path = self.get(parent).path.clone();
            let name = self.get(id).name.clone();
            self.get_mut(id).path = join_path(&parent_path, &name);
        }
        let children = self.get(id).children.clone();
        for child in children {
            self.rebuild_paths(child);
        }
    }
}

/// Joins a directory path and a child name into a canonical path.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Splits an absolute path into its parent path and base name. `"/d/a.txt"`
/// becomes `("/d", "a.txt")`; a name directly under the root keeps `"/"` as
/// its parent. Paths without a usable base name, the bare root included,
/// are rejected, as are doubled separators: the resolver can never match
/// an empty segment, so the splitter refuses to produce one.
pub fn split_path(path: &str) -> Result<(&str, &str), FsError> {
    let trimmed = if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    };
    if !trimmed.starts_with('/') || trimmed.contains("//") {
        return Err(FsError::InvalidPath(path.to_string()));
    }
    let cut = match trimmed.rfind('/') {
        Some(at) => at,
        None => return Err(FsError::InvalidPath(path.to_string())),
    };
    let name = &trimmed[cut + 1..];
    if name.is_empty() {
        return Err(FsError::InvalidPath(path.to_string()));
    }
    let parent = if cut == 0 { "/" } else { &trimmed[..cut] };
    Ok((parent, name))
}
