mod alloc;
mod error;
mod fs;
mod node;
mod sb;
mod snapshot;
mod store;

pub use crate::error::FsError;
pub use crate::fs::{Credentials, Metadata, SnapFs, StatFs};
pub use crate::node::{NodeKind, NAME_MAX};
pub use crate::sb::{BLOCK_SIZE, FILE_BLOCKS, MAX_FILE_SIZE};
pub use crate::store::{FileStore, MemStore, SnapshotStore, BLOCK_IMAGE, TREE_IMAGE};
