//! Error taxonomy for the operation engine.
//!
//! Each variant corresponds to one of the numeric POSIX-family codes the
//! callback binding surfaces to the FUSE host. Propagation is immediate:
//! every operation returns on the first error it detects, with no partial
//! rollback (see the operation engine docs for why that is safe here).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SfsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    DirectoryRequired,
    #[error("directory not empty")]
    NotEmpty,
    #[error("file name too long")]
    NameTooLong,
    #[error("no space left on device")]
    NoSpace,
    #[error("operation not supported")]
    NotSupported,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("file already exists")]
    AlreadyExists,
    #[error("disk i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SfsError {
    /// Maps this error onto the errno the callback binding hands back to
    /// the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            SfsError::NotFound => libc::ENOENT,
            SfsError::IsDirectory => libc::EISDIR,
            SfsError::DirectoryRequired => libc::ENOTDIR,
            SfsError::NotEmpty => libc::ENOTEMPTY,
            SfsError::NameTooLong => libc::ENAMETOOLONG,
            SfsError::NoSpace => libc::ENOSPC,
            SfsError::NotSupported => libc::ENOSYS,
            SfsError::InvalidArgument => libc::EINVAL,
            SfsError::AlreadyExists => libc::EEXIST,
            SfsError::Io(_) => libc::EIO,
        }
    }
}
