use crate::store::SnapshotStore;

/// In-memory stand-in for a file-backed store. Tests reach into the public
/// fields to inspect or corrupt the images between a save and a load.
#[derive(Default)]
pub struct MemStore {
    pub tree: Option<Vec<u8>>,
    pub blocks: Option<Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemStore {
    fn read_tree(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.tree.clone())
    }

    fn read_blocks(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.blocks.clone())
    }

    fn write_tree(&mut self, img: &[u8]) -> std::io::Result<()> {
        self.tree = Some(img.to_vec());
        Ok(())
    }

    fn write_blocks(&mut self, img: &[u8]) -> std::io::Result<()> {
        self.blocks = Some(img.to_vec());
        Ok(())
    }
}
