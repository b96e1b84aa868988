use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("filesystem not mounted")]
    NotMounted,
    #[error("filesystem already mounted")]
    AlreadyMounted,
    #[error("no such file or directory")]
    NotFound,
    #[error("invalid path")]
    InvalidPath,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("file exists")]
    AlreadyExists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("resource busy")]
    Busy,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("bad file handle")]
    BadHandle,
    #[error("handle not opened for writing")]
    NotWritable,
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid file name")]
    InvalidFileName,
    #[error("file name too long")]
    NameTooLong,
    #[error("path too deep")]
    PathTooDeep,
    #[error("file too large")]
    FileTooLarge,
    #[error("directory full")]
    DirectoryFull,
    #[error("no free data blocks")]
    OutOfSpace,
    #[error("no free inodes")]
    OutOfInodes,
    #[error("block address outside the data region")]
    InvalidBlockId,
    #[error("resource released twice")]
    DoubleFree,
    #[error("invalid superblock")]
    InvalidSuperBlock,
    #[error("disk image has the wrong size")]
    InvalidImage,
    #[error("on-disk structures are inconsistent")]
    Corrupted,
    #[error("I/O error")]
    IoError,
}

impl FsError {
    /// Nearest POSIX errno, as handed back to the kernel.
    pub fn errno(self) -> libc::c_int {
        match self {
            FsError::NotMounted => libc::ENODEV,
            FsError::AlreadyMounted | FsError::Busy => libc::EBUSY,
            FsError::NotFound | FsError::InvalidPath => libc::ENOENT,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::TooManyOpenFiles => libc::ENFILE,
            FsError::BadHandle | FsError::NotWritable => libc::EBADF,
            FsError::PermissionDenied => libc::EACCES,
            FsError::InvalidArgument | FsError::InvalidFileName => libc::EINVAL,
            FsError::NameTooLong | FsError::PathTooDeep => libc::ENAMETOOLONG,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::DirectoryFull | FsError::OutOfSpace | FsError::OutOfInodes => libc::ENOSPC,
            FsError::InvalidBlockId
            | FsError::DoubleFree
            | FsError::InvalidSuperBlock
            | FsError::InvalidImage
            | FsError::Corrupted
            | FsError::IoError => libc::EIO,
        }
    }
}

pub type Result<T> = core::result::Result<T, FsError>;
