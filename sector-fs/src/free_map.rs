//! # 空闲扇区分配器
//!
//! 分配器对文件系统来说是外部服务：inode 层只通过 [`FreeMap`] 申请、归还扇区，
//! 位图如何持久化由调用方决定。
//!
//! [`Bitmap`] 是一个纯内存的实现，每一位对应设备上的一个扇区。

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::{ROOT_DIR_SECTOR, SectorId};

pub trait FreeMap: Send + Sync {
    /// 分配 `count` 个**连续**扇区，返回首扇区；空间不足返回空
    fn allocate(&self, count: usize) -> Option<SectorId>;

    /// 归还从 `start` 开始的 `count` 个扇区
    fn release(&self, start: SectorId, count: usize);

    /// 回到刚格式化的状态：只有位图文件与根目录的 inode 扇区被占用
    fn format(&self);
}

/// 位图中的一组
type BitGroup = u64;
const GROUP_BITS: usize = BitGroup::BITS as usize;

/// 格式化后被系统占用的扇区数：位图文件头与根目录头
const RESERVED_SECTORS: usize = ROOT_DIR_SECTOR.raw() as usize + 1;

#[derive(Debug)]
pub struct Bitmap {
    /// 位图所指示的扇区总数
    sectors: usize,
    groups: Mutex<Vec<BitGroup>>,
}

/// 扇区在位图中的位置：组号与组内偏移
struct BitPos(usize);

impl Bitmap {
    /// 已格式化的位图
    pub fn new(sectors: usize) -> Self {
        let bitmap = Self {
            sectors,
            groups: Mutex::new(vec![0; sectors.div_ceil(GROUP_BITS)]),
        };
        bitmap.format();
        bitmap
    }

    /// 从持久化的字节恢复位图
    pub fn from_bytes(sectors: usize, bytes: &[u8]) -> Self {
        let bitmap = Self {
            sectors,
            groups: Mutex::new(vec![0; sectors.div_ceil(GROUP_BITS)]),
        };
        bitmap.load(bytes);
        bitmap
    }

    /// 用持久化的字节覆盖当前内容，挂载时位图文件读出后调用
    pub fn load(&self, bytes: &[u8]) {
        let mut groups = self.groups.lock();
        groups.fill(0);
        for (group, chunk) in groups.iter_mut().zip(bytes.chunks(8)) {
            let mut raw = [0; 8];
            raw[..chunk.len()].copy_from_slice(chunk);
            *group = BitGroup::from_le_bytes(raw);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.groups
            .lock()
            .iter()
            .flat_map(|group| group.to_le_bytes())
            .collect()
    }

    /// 持久化后的字节数
    #[inline]
    pub fn byte_len(sectors: usize) -> usize {
        sectors.div_ceil(GROUP_BITS) * 8
    }

    /// 位图所指示的扇区总数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.sectors
    }

    pub fn is_used(&self, id: SectorId) -> bool {
        let (group, bit) = BitPos(id.raw() as usize).decode();
        self.groups.lock()[group] & (1 << bit) != 0
    }

    pub fn used_count(&self) -> usize {
        self.groups
            .lock()
            .iter()
            .map(|group| group.count_ones() as usize)
            .sum()
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.sectors - self.used_count()
    }
}

impl FreeMap for Bitmap {
    fn allocate(&self, count: usize) -> Option<SectorId> {
        if count == 0 {
            return None;
        }
        let mut groups = self.groups.lock();

        if count == 1 {
            // 寻找还有0的位组
            let (group, bit) = groups
                .iter()
                .enumerate()
                .find_map(|(group, &bits)| {
                    (bits != BitGroup::MAX).then_some((group, bits.trailing_ones() as usize))
                })?;
            let index = BitPos::encode(group, bit);
            if index >= self.sectors {
                return None;
            }
            groups[group] |= 1 << bit;
            return Some(SectorId::new(index as u32));
        }

        // 连续区域：线性扫描
        let mut run = 0;
        for index in 0..self.sectors {
            let (group, bit) = BitPos(index).decode();
            if groups[group] & (1 << bit) == 0 {
                run += 1;
                if run == count {
                    let start = index + 1 - count;
                    for index in start..=index {
                        let (group, bit) = BitPos(index).decode();
                        groups[group] |= 1 << bit;
                    }
                    return Some(SectorId::new(start as u32));
                }
            } else {
                run = 0;
            }
        }

        None
    }

    fn release(&self, start: SectorId, count: usize) {
        let mut groups = self.groups.lock();
        for index in start.raw() as usize..start.raw() as usize + count {
            let (group, bit) = BitPos(index).decode();
            // 编号一定得有对应的位
            assert_ne!(
                groups[group] & (1 << bit),
                0,
                "sector {index} released twice"
            );
            groups[group] &= !(1 << bit);
        }
    }

    fn format(&self) {
        let mut groups = self.groups.lock();
        groups.fill(0);
        for index in 0..RESERVED_SECTORS.min(self.sectors) {
            let (group, bit) = BitPos(index).decode();
            groups[group] |= 1 << bit;
        }
    }
}

impl BitPos {
    /// 线性映射编码得到扇区号
    #[inline]
    fn encode(group: usize, bit: usize) -> usize {
        group * GROUP_BITS + bit
    }

    #[inline]
    fn decode(self) -> (usize, usize) {
        (self.0 / GROUP_BITS, self.0 % GROUP_BITS)
    }
}
