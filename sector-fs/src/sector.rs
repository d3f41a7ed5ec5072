//! 扇区号

use derive_more::{Add, Display, From, Into};

/// 设备上一个扇区的地址。
///
/// 磁盘格式中扇区号占一个机器字（`u32`，小端序）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Add, From, Into, Display)]
#[repr(transparent)]
pub struct SectorId(u32);

impl core::ops::Add<u32> for SectorId {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        self + Self(rhs)
    }
}

impl Default for SectorId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl SectorId {
    /// 尚未分配
    pub const INVALID: Self = Self(u32::MAX);

    /// 扇区号在磁盘上所占字节数
    pub const SIZE: usize = core::mem::size_of::<u32>();

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// 拉伸扇区号至块设备的块ID
    #[inline]
    pub fn block(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn from_le_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    #[inline]
    pub fn to_le_bytes(self) -> [u8; Self::SIZE] {
        self.0.to_le_bytes()
    }
}
