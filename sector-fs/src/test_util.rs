//! 单元测试共用的内存块设备与夹具

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use block_dev::BlockDevice;

use crate::{Bitmap, Directory, FileSystem, InodeKind, SECTOR_SIZE, SectorId, Volume};

/// 记录读写次数的内存盘
pub struct MemDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![[0; SECTOR_SIZE]; sectors]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 绕过计数直接查看设备内容
    pub fn peek(&self, id: usize) -> [u8; SECTOR_SIZE] {
        self.sectors.lock().unwrap()[id]
    }

    /// 绕过缓存直接修改设备内容
    pub fn poke(&self, id: usize, data: &[u8]) {
        self.sectors.lock().unwrap()[id][..data.len()].copy_from_slice(data);
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        buf.copy_from_slice(&self.sectors.lock().unwrap()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.sectors.lock().unwrap()[block_id].copy_from_slice(buf);
    }
}

/// 在 `sectors` 个扇区的内存盘上格式化，返回卷、位图与设备
pub fn formatted_volume(sectors: usize) -> (Arc<Volume>, Arc<Bitmap>, Arc<MemDisk>) {
    let disk = Arc::new(MemDisk::new(sectors));
    let bitmap = Arc::new(Bitmap::new(sectors));
    let fs = FileSystem::format(disk.clone(), bitmap.clone()).unwrap();
    (fs.volume().clone(), bitmap, disk)
}

/// 在 `dir` 下新建 `length` 字节的文件，返回其 inode 扇区
pub fn new_file(volume: &Arc<Volume>, dir: &Directory, name: &str, length: usize) -> SectorId {
    let sector = volume.alloc_sector().unwrap();
    volume.create_inode(sector, length, InodeKind::File).unwrap();
    dir.add(name, sector).unwrap();
    sector
}

/// 在 `dir` 下新建空目录，返回其 inode 扇区
pub fn new_dir(volume: &Arc<Volume>, dir: &Directory, name: &str) -> SectorId {
    let sector = volume.alloc_sector().unwrap();
    Directory::create(volume, sector, 0, dir.inumber()).unwrap();
    dir.add(name, sector).unwrap();
    sector
}
