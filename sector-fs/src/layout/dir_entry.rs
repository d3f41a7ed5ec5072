use crate::{NAME_MAX, SectorId};

/// 目录项：目录的内容就是连续存放的目录项数组。
///
/// 删除只把 `in_use` 置假，留下的墓碑可以被之后的插入复用。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 子项 inode 所在扇区
    sector: SectorId,
    // 最后一字节留给 \0
    name: [u8; NAME_MAX + 1],
    in_use: bool,
}

impl DirEntry {
    /// 元信息大小恒为20字节
    pub const SIZE: usize = SectorId::SIZE + NAME_MAX + 1 + 1;

    const NAME_OFFSET: usize = SectorId::SIZE;
    const IN_USE_OFFSET: usize = Self::NAME_OFFSET + NAME_MAX + 1;

    /// 正在使用的目录项；调用方负责保证名字合法
    pub fn new(name: &str, sector: SectorId) -> Self {
        debug_assert!(Self::is_valid_name(name));
        let bytes = name.as_bytes();
        let mut raw = [0; NAME_MAX + 1];
        raw[..bytes.len()].copy_from_slice(bytes);

        Self {
            sector,
            name: raw,
            in_use: true,
        }
    }

    /// 名字非空、不超过 [`NAME_MAX`] 字节且不含 `/` 与 `\0`
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= NAME_MAX
            && !name.bytes().any(|c| c == b'/' || c == 0)
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_MAX + 1);
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    #[inline]
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use
    }

    /// 变为墓碑
    #[inline]
    pub fn tombstone(&mut self) {
        self.in_use = false;
    }

    /// "." 与 ".." 由目录创建时写入，遍历时跳过
    #[inline]
    pub fn is_dot(&self) -> bool {
        matches!(self.name(), "." | "..")
    }

    pub fn from_bytes(data: &[u8; DirEntry::SIZE]) -> Self {
        let mut sector = [0; SectorId::SIZE];
        sector.copy_from_slice(&data[..SectorId::SIZE]);
        let mut name = [0; NAME_MAX + 1];
        name.copy_from_slice(&data[Self::NAME_OFFSET..Self::IN_USE_OFFSET]);

        Self {
            sector: SectorId::from_le_bytes(sector),
            name,
            in_use: data[Self::IN_USE_OFFSET] != 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; DirEntry::SIZE] {
        let mut data = [0; DirEntry::SIZE];
        data[..SectorId::SIZE].copy_from_slice(&self.sector.to_le_bytes());
        data[Self::NAME_OFFSET..Self::IN_USE_OFFSET].copy_from_slice(&self.name);
        data[Self::IN_USE_OFFSET] = self.in_use as u8;
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rules() {
        assert!(DirEntry::is_valid_name("a"));
        assert!(DirEntry::is_valid_name("fourteen_chars"));
        assert!(!DirEntry::is_valid_name(""));
        assert!(!DirEntry::is_valid_name("fifteen_chars__"));
        assert!(!DirEntry::is_valid_name("a/b"));
    }

    #[test]
    fn full_length_name_fits() {
        let entry = DirEntry::new("fourteen_chars", SectorId::new(77));
        let back = DirEntry::from_bytes(&entry.to_bytes());
        assert_eq!(back.name(), "fourteen_chars");
        assert_eq!(back.sector(), SectorId::new(77));
        assert!(back.in_use());
    }

    #[test]
    fn zeroed_slot_is_free() {
        let entry = DirEntry::from_bytes(&[0; DirEntry::SIZE]);
        assert!(!entry.in_use());
        assert_eq!(entry.name(), "");
    }
}
