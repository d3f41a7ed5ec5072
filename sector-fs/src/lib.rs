#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

/* sector-fs 的整体架构，自上而下 */

// 文件系统门面：格式化、挂载，以及按路径创建、打开、删除
mod fs;

// 带读写位置的文件，交给系统调用层使用
mod file;

// 目录层：在 inode 之上构建层级命名空间
mod directory;

// 索引节点层：打开 inode 的登记表、字节偏移到扇区的翻译、文件扩展
mod inode;

// 磁盘数据结构层：inode、索引块、目录项的磁盘格式
pub mod layout;

// 空闲扇区分配器的接口
mod free_map;

// 块缓存层：内存上的扇区数据缓存
mod block_cache;

mod error;
mod sector;

#[cfg(test)]
mod test_util;

pub use block_dev::BlockDevice;

pub use self::{
    block_cache::BufferCache,
    directory::Directory,
    error::{Error, Result},
    file::File,
    free_map::{Bitmap, FreeMap},
    fs::FileSystem,
    inode::{Inode, Stat, StatKind, Volume},
    layout::InodeKind,
    sector::SectorId,
};

/// 扇区大小，也是分配的最小单位
pub const SECTOR_SIZE: usize = 512;

/// 块缓存的容量（扇区数）
pub const CACHE_CAPACITY: usize = 64;

/// 文件名分量的最大长度
pub const NAME_MAX: usize = 14;

/// 空闲扇区位图文件的 inode 所在扇区
pub const FREE_MAP_SECTOR: SectorId = SectorId::new(0);

/// 根目录的 inode 所在扇区
pub const ROOT_DIR_SECTOR: SectorId = SectorId::new(1);

/// 格式化时根目录预留的目录项个数
pub const ROOT_DIR_ENTRIES: usize = 16;

type DataBlock = [u8; SECTOR_SIZE];
