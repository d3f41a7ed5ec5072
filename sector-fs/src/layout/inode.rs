//! 磁盘上的 inode，恰好占一个扇区
//!
//! - 直接索引：[`DIRECT_COUNT`] 个扇区号，各指向一个数据扇区
//! - 一级索引：指向一个索引块，整块连续存储指向数据扇区的扇区号
//! - 二级索引：指向一个索引块，其中每个扇区号指向一个一级索引块
//!
//! ## 块索引编码
//!
//! 剔去直接索引与一级索引的部分后，
//! 除以索引块的**可编号数量**得到一级索引块在二级索引块中的位置，
//! 取模得到数据扇区在该一级索引块中的位置。

use crate::error::{Error, Result};
use crate::{DataBlock, SECTOR_SIZE, SectorId};

/// 校验 inode 合法性的魔数
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// 直接索引可编号数量
pub const DIRECT_COUNT: usize = 123;
/// 索引块的编号容量
pub const INDIRECT_COUNT: usize = SECTOR_SIZE / SectorId::SIZE;
/// 用上一级索引时的编号容量
pub const INDIRECT_CAP: usize = DIRECT_COUNT + INDIRECT_COUNT;
/// 用上二级索引时的编号容量，也是单个文件的扇区数上限
pub const DOUBLE_INDIRECT_CAP: usize = INDIRECT_CAP + INDIRECT_COUNT * INDIRECT_COUNT;
/// 单个文件的字节数上限
pub const MAX_FILE_SIZE: usize = DOUBLE_INDIRECT_CAP * SECTOR_SIZE;

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(u32)]
pub enum InodeKind {
    #[default]
    File = 0,
    Directory = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInode {
    pub kind: InodeKind,
    /// 文件字节数
    pub length: u32,
    pub magic: u32,
    /// 直接索引，存储容量：DIRECT_COUNT * SECTOR_SIZE 字节
    pub direct: [SectorId; DIRECT_COUNT],
    /// 指向一个一级索引块
    pub indirect: SectorId,
    /// 指向一个二级索引块
    pub double_indirect: SectorId,
}

/// 文件第 n 个数据扇区的扇区号存放的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPos {
    Direct(usize),
    Indirect(usize),
    DoubleIndirect { outer: usize, inner: usize },
}

impl DiskInode {
    /// 磁盘上的字节数：kind、length、magic，直接索引，一级与二级索引
    pub const SIZE: usize = SectorId::SIZE * (3 + DIRECT_COUNT + 2);

    const LENGTH_OFFSET: usize = 4;
    const MAGIC_OFFSET: usize = 8;
    const DIRECT_OFFSET: usize = 12;
    const INDIRECT_OFFSET: usize = Self::DIRECT_OFFSET + DIRECT_COUNT * SectorId::SIZE;
    const DOUBLE_INDIRECT_OFFSET: usize = Self::INDIRECT_OFFSET + SectorId::SIZE;

    /// 空文件，所有索引都未分配
    pub fn new(kind: InodeKind) -> Self {
        Self {
            kind,
            length: 0,
            magic: INODE_MAGIC,
            direct: [SectorId::INVALID; DIRECT_COUNT],
            indirect: SectorId::INVALID,
            double_indirect: SectorId::INVALID,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    /// 魔数不符或类型非法时视为损坏
    pub fn from_bytes(data: &DataBlock) -> Result<Self> {
        let magic = read_u32(data, Self::MAGIC_OFFSET);
        if magic != INODE_MAGIC {
            return Err(Error::Corrupted);
        }
        let kind = match read_u32(data, 0) {
            0 => InodeKind::File,
            1 => InodeKind::Directory,
            _ => return Err(Error::Corrupted),
        };

        let mut direct = [SectorId::INVALID; DIRECT_COUNT];
        for (i, id) in direct.iter_mut().enumerate() {
            *id = read_sector_id(data, Self::DIRECT_OFFSET + i * SectorId::SIZE);
        }

        Ok(Self {
            kind,
            length: read_u32(data, Self::LENGTH_OFFSET),
            magic,
            direct,
            indirect: read_sector_id(data, Self::INDIRECT_OFFSET),
            double_indirect: read_sector_id(data, Self::DOUBLE_INDIRECT_OFFSET),
        })
    }

    pub fn to_bytes(&self) -> DataBlock {
        let mut data = [0; SECTOR_SIZE];
        data[..4].copy_from_slice(&(self.kind as u32).to_le_bytes());
        data[Self::LENGTH_OFFSET..Self::LENGTH_OFFSET + 4].copy_from_slice(&self.length.to_le_bytes());
        data[Self::MAGIC_OFFSET..Self::MAGIC_OFFSET + 4].copy_from_slice(&self.magic.to_le_bytes());
        for (i, id) in self.direct.iter().enumerate() {
            let at = Self::DIRECT_OFFSET + i * SectorId::SIZE;
            data[at..at + SectorId::SIZE].copy_from_slice(&id.to_le_bytes());
        }
        data[Self::INDIRECT_OFFSET..Self::INDIRECT_OFFSET + SectorId::SIZE]
            .copy_from_slice(&self.indirect.to_le_bytes());
        data[Self::DOUBLE_INDIRECT_OFFSET..Self::DOUBLE_INDIRECT_OFFSET + SectorId::SIZE]
            .copy_from_slice(&self.double_indirect.to_le_bytes());
        data
    }

    /// 计算容纳指定数据量需要多少个**数据扇区**
    #[inline]
    pub fn count_data_sectors(size: usize) -> usize {
        size.div_ceil(SECTOR_SIZE)
    }

    /// 计算 `data_sectors` 个数据扇区需要多少个**索引块**
    pub fn count_index_sectors(data_sectors: usize) -> usize {
        assert!(data_sectors <= DOUBLE_INDIRECT_CAP, "file is too large");
        let mut total = 0;

        // 超出直接索引，使用一级索引块
        if data_sectors > DIRECT_COUNT {
            total += 1;
        }

        // 超出一级索引，使用二级索引块及其下属的一级索引块
        if data_sectors > INDIRECT_CAP {
            total += 1 + (data_sectors - INDIRECT_CAP).div_ceil(INDIRECT_COUNT);
        }

        total
    }

    /// 计算容纳指定数据量需要多少个**数据扇区**与**索引块**
    #[inline]
    pub fn count_total_sectors(size: usize) -> usize {
        let data_sectors = Self::count_data_sectors(size);
        data_sectors + Self::count_index_sectors(data_sectors)
    }
}

impl IndexPos {
    /// 第 `index` 个数据扇区的扇区号存放在哪里。
    ///
    /// 超出二级索引的容量意味着磁盘格式无法表示这个文件，直接 panic。
    pub fn locate(index: usize) -> Self {
        if index < DIRECT_COUNT {
            Self::Direct(index)
        } else if index < INDIRECT_CAP {
            // 剔去直接索引的部分
            Self::Indirect(index - DIRECT_COUNT)
        } else if index < DOUBLE_INDIRECT_CAP {
            // 剔去使用了一级索引的部分
            let index = index - INDIRECT_CAP;
            Self::DoubleIndirect {
                outer: index / INDIRECT_COUNT,
                inner: index % INDIRECT_COUNT,
            }
        } else {
            panic!("file is too large: sector index {index} exceeds {DOUBLE_INDIRECT_CAP}");
        }
    }
}

const _: () = assert!(DiskInode::SIZE == SECTOR_SIZE);

#[inline]
pub(super) fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(super) fn read_sector_id(data: &[u8], at: usize) -> SectorId {
    SectorId::new(read_u32(data, at))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_every_field() {
        let mut inode = DiskInode::new(InodeKind::Directory);
        inode.length = 70_000;
        inode.direct[0] = SectorId::new(9);
        inode.direct[DIRECT_COUNT - 1] = SectorId::new(42);
        inode.double_indirect = SectorId::new(7);

        let bytes = inode.to_bytes();
        assert_eq!(&bytes[8..12], &INODE_MAGIC.to_le_bytes());
        assert_eq!(DiskInode::from_bytes(&bytes), Ok(inode));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(DiskInode::from_bytes(&[0; SECTOR_SIZE]), Err(Error::Corrupted));

        let mut bytes = DiskInode::new(InodeKind::File).to_bytes();
        bytes[0] = 5;
        assert_eq!(DiskInode::from_bytes(&bytes), Err(Error::Corrupted));
    }

    #[test]
    fn locate_crosses_every_level() {
        assert_eq!(IndexPos::locate(0), IndexPos::Direct(0));
        assert_eq!(IndexPos::locate(122), IndexPos::Direct(122));
        assert_eq!(IndexPos::locate(123), IndexPos::Indirect(0));
        assert_eq!(IndexPos::locate(250), IndexPos::Indirect(127));
        assert_eq!(
            IndexPos::locate(251),
            IndexPos::DoubleIndirect { outer: 0, inner: 0 }
        );
        assert_eq!(
            IndexPos::locate(251 + 128 * 3 + 5),
            IndexPos::DoubleIndirect { outer: 3, inner: 5 }
        );
        assert_eq!(
            IndexPos::locate(DOUBLE_INDIRECT_CAP - 1),
            IndexPos::DoubleIndirect {
                outer: INDIRECT_COUNT - 1,
                inner: INDIRECT_COUNT - 1
            }
        );
    }

    #[test]
    #[should_panic(expected = "file is too large")]
    fn locate_past_capacity_is_fatal() {
        IndexPos::locate(DOUBLE_INDIRECT_CAP);
    }

    #[test]
    fn index_sector_arithmetic() {
        assert_eq!(DiskInode::count_index_sectors(DIRECT_COUNT), 0);
        assert_eq!(DiskInode::count_index_sectors(DIRECT_COUNT + 1), 1);
        assert_eq!(DiskInode::count_index_sectors(INDIRECT_CAP), 1);
        assert_eq!(DiskInode::count_index_sectors(INDIRECT_CAP + 1), 3);
        assert_eq!(DiskInode::count_index_sectors(INDIRECT_CAP + 129), 4);
        assert_eq!(DiskInode::count_total_sectors(10_000), 20);
    }
}
