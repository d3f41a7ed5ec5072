use core::ops::{Index, IndexMut};

use super::inode::{INDIRECT_COUNT, read_sector_id};
use crate::{DataBlock, SECTOR_SIZE, SectorId};

/// 索引块：整块连续存储**扇区号**，未分配的位置为 [`SectorId::INVALID`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock([SectorId; INDIRECT_COUNT]);

impl IndexBlock {
    pub const SIZE: usize = INDIRECT_COUNT * SectorId::SIZE;

    pub fn new() -> Self {
        Self([SectorId::INVALID; INDIRECT_COUNT])
    }

    pub fn from_bytes(data: &DataBlock) -> Self {
        let mut ids = [SectorId::INVALID; INDIRECT_COUNT];
        for (i, id) in ids.iter_mut().enumerate() {
            *id = read_sector_id(data, i * SectorId::SIZE);
        }
        Self(ids)
    }

    pub fn to_bytes(&self) -> DataBlock {
        let mut data = [0; SECTOR_SIZE];
        for (chunk, id) in data.chunks_exact_mut(SectorId::SIZE).zip(self.0.iter()) {
            chunk.copy_from_slice(&id.to_le_bytes());
        }
        data
    }

    /// 依次列出已分配的扇区号
    pub fn valid(&self) -> impl Iterator<Item = SectorId> + '_ {
        self.0.iter().copied().filter(|id| id.is_valid())
    }
}

impl Default for IndexBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for IndexBlock {
    type Output = SectorId;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<usize> for IndexBlock {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}
