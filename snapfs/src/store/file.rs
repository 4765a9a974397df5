use std::fs::{self, File};
use std::io::prelude::*;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::debug;

use crate::store::SnapshotStore;

/// Artifact names inside a store directory.
pub const TREE_IMAGE: &str = "tree.bin";
pub const BLOCK_IMAGE: &str = "blocks.bin";

/// Keeps both snapshot artifacts as regular files in one directory. Each
/// save rewrites an artifact in place and syncs it; there is no staging
/// copy, so a crash mid-write is detected by the image checksum rather
/// than prevented.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    /// Returns ownership of the store directory path to the caller.
    pub fn into_dir(self) -> PathBuf {
        self.dir
    }

    fn read_image(&self, name: &str) -> std::io::Result<Option<Vec<u8>>> {
        match fs::read(self.dir.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_image(&self, name: &str, img: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(self.dir.join(name))?;
        file.write_all(img)?;
        file.sync_all()?;
        debug!("wrote {} ({} bytes)", name, img.len());
        Ok(())
    }
}

impl SnapshotStore for FileStore {
    fn read_tree(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        self.read_image(TREE_IMAGE)
    }

    fn read_blocks(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        self.read_image(BLOCK_IMAGE)
    }

    fn write_tree(&mut self, img: &[u8]) -> std::io::Result<()> {
        self.write_image(TREE_IMAGE, img)
    }

    fn write_blocks(&mut self, img: &[u8]) -> std::io::Result<()> {
        self.write_image(BLOCK_IMAGE, img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_survive_a_write_read_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        store.write_tree(b"tree image").unwrap();
        store.write_blocks(b"block image").unwrap();

        assert_eq!(store.read_tree().unwrap().unwrap(), b"tree image");
        assert_eq!(store.read_blocks().unwrap().unwrap(), b"block image");
    }

    #[test]
    fn missing_images_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        assert!(store.read_tree().unwrap().is_none());
        assert!(store.read_blocks().unwrap().is_none());
    }

    #[test]
    fn writes_replace_previous_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        store.write_tree(b"first, and rather long").unwrap();
        store.write_tree(b"second").unwrap();

        assert_eq!(store.read_tree().unwrap().unwrap(), b"second");
    }

    #[test]
    fn open_creates_the_store_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");

        let store = FileStore::open(&nested).unwrap();

        assert!(nested.is_dir());
        assert_eq!(store.into_dir(), nested);
    }
}
