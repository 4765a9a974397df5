use thiserror::Error;

/// Every failure an engine operation can signal. A filesystem bridge maps
/// these onto negative POSIX codes with [`FsError::errno`].
#[derive(Error, Debug)]
pub enum FsError {
    #[error("no entry at path")]
    NotFound,
    #[error("directory not empty")]
    NotEmpty,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("write offset beyond end of file")]
    InvalidOffset,
    #[error("name exceeds the fixed name space")]
    NameTooLong,
    #[error("file exceeds its reserved blocks")]
    FileTooLarge,
    #[error("namespace tree is full")]
    TreeFull,
    #[error("out of inodes")]
    OutOfInodes,
    #[error("out of data blocks")]
    OutOfBlocks,
    #[error("store holds no filesystem image")]
    NotFormatted,
    #[error("corrupt filesystem image: {0}")]
    BadImage(&'static str),
    #[error("snapshot i/o failed")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// The positive POSIX error code for this failure. Bridges negate it
    /// before handing it back to the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::InvalidPath(_) | FsError::InvalidOffset => libc::EINVAL,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::TreeFull | FsError::OutOfInodes | FsError::OutOfBlocks => libc::ENOSPC,
            FsError::NotFormatted | FsError::BadImage(_) | FsError::Io(_) => libc::EIO,
        }
    }
}
