//! # 磁盘数据结构层
//!
//! 磁盘布局没有超级块，所有结构都从两个固定扇区出发：
//! 扇区 [`FREE_MAP_SECTOR`](crate::FREE_MAP_SECTOR) 是空闲位图文件的 inode，
//! 扇区 [`ROOT_DIR_SECTOR`](crate::ROOT_DIR_SECTOR) 是根目录的 inode。
//! 其余扇区按需分配给 inode、数据块与索引块。
//!
//! 所有结构都以字节数组存取，字段一律小端序。

mod inode;
pub use inode::{
    DIRECT_COUNT, DOUBLE_INDIRECT_CAP, DiskInode, INDIRECT_CAP, INDIRECT_COUNT, INODE_MAGIC,
    IndexPos, InodeKind, MAX_FILE_SIZE,
};

mod index_block;
pub use index_block::IndexBlock;

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;
