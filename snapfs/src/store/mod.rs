mod file;
mod mem;

pub use file::{FileStore, BLOCK_IMAGE, TREE_IMAGE};
pub use mem::MemStore;

/// The persistence medium for snapshot images. One store holds the pair of
/// artifacts a filesystem writes on every mutation: the namespace tree
/// image and the block store image.
pub trait SnapshotStore {
    /// Loads the tree image, or `None` when no filesystem has been written
    /// to this store yet.
    fn read_tree(&mut self) -> std::io::Result<Option<Vec<u8>>>;
    /// Loads the block store image, or `None` when absent.
    fn read_blocks(&mut self) -> std::io::Result<Option<Vec<u8>>>;
    /// Replaces the tree image wholesale.
    fn write_tree(&mut self, img: &[u8]) -> std::io::Result<()>;
    /// Replaces the block store image wholesale.
    fn write_blocks(&mut self, img: &[u8]) -> std::io::Result<()>;
}
