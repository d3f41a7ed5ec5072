//! # 块设备接口层
//!
//! 块设备是以**扇区**为单位存储数据的设备，例如磁盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 文件系统只通过这两个原语访问设备，从不直接管理物理磁盘。
//! 设备被假定为可靠的：驱动在读写失败时应当直接 panic。

#![no_std]

use core::any::Any;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 读出第 `block_id` 块，`buf` 的长度恰为一块
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    /// 写入第 `block_id` 块，`buf` 的长度恰为一块
    fn write_block(&self, block_id: usize, buf: &[u8]);

    fn handle_irq(&self) {}
}
