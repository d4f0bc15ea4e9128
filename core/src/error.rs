use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimfsError {
    #[error("Filesystem is not mounted")]
    NotMounted,

    #[error("Not a SIMFS image (bad magic)")]
    BadFilesystem,

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("No free inodes")]
    NoSpaceInodes,

    #[error("No free data blocks")]
    NoSpaceBlocks,

    #[error("Root directory is full")]
    DirectoryFull,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filesystem corrupted: {0}")]
    Corrupt(String),
}

pub type SimfsResult<T> = Result<T, SimfsError>;
