use core::fmt;

/// 可恢复的错误，最终以失败值的形式交给系统调用层。
///
/// 不可恢复的情形（文件超出索引容量、`deny_write` 配对失衡、设备读写失败）
/// 直接 panic，不出现在这里。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 空闲扇区不足
    NoSpace,
    NotFound,
    AlreadyExists,
    /// 名字为空或超过 [`NAME_MAX`](crate::NAME_MAX) 字节
    InvalidName,
    NotADirectory,
    IsADirectory,
    /// inode 魔数不符
    Corrupted,
    /// 目录是当前工作目录或其祖先
    Busy,
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NoSpace => "no free sectors left on the device",
            Self::NotFound => "no such file or directory",
            Self::AlreadyExists => "file exists",
            Self::InvalidName => "invalid file name",
            Self::NotADirectory => "not a directory",
            Self::IsADirectory => "is a directory",
            Self::Corrupted => "inode magic mismatch",
            Self::Busy => "directory is in use as a working directory",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}
