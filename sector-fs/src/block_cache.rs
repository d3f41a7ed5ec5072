//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的扇区复制到内存中，提高对块设备的操作效率。
//!
//! 块缓存层对使用者来说是透明的，inode 层对设备的操作都经过块缓存层。
//! 写入只会弄脏缓存，只有在淘汰或 [`BufferCache::flush_all`] 时才写回设备。
//!
//! 整个缓存由**一把锁**保护：查找、淘汰与字节拷贝都在锁内完成，
//! 因此任意两次扇区操作都是串行的。

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::{CACHE_CAPACITY, DataBlock, SECTOR_SIZE, SectorId};

/// 扇区缓存，队首为最近使用的扇区，队尾最先被淘汰
pub struct BufferCache {
    /// 底层块设备的引用
    device: Arc<dyn BlockDevice>,
    capacity: usize,
    queue: Mutex<VecDeque<CachedSector>>,
}

/// 内存中的扇区
struct CachedSector {
    id: SectorId,
    /// 缓存的数据
    data: Box<DataBlock>,
    /// 是否为脏块
    modified: bool,
}

impl BufferCache {
    #[inline]
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self::with_capacity(device, CACHE_CAPACITY)
    }

    pub fn with_capacity(device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer cache needs at least one slot");
        Self {
            device,
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// 从扇区 `id` 的 `offset` 处读出 `buf.len()` 个字节
    pub fn read(&self, id: SectorId, offset: usize, buf: &mut [u8]) {
        assert!(
            offset + buf.len() <= SECTOR_SIZE,
            "cache read out of sector bounds"
        );
        self.map(id, |data| buf.copy_from_slice(&data[offset..offset + buf.len()]));
    }

    /// 把 `buf` 写到扇区 `id` 的 `offset` 处，扇区被标为脏块
    pub fn write(&self, id: SectorId, offset: usize, buf: &[u8]) {
        assert!(
            offset + buf.len() <= SECTOR_SIZE,
            "cache write out of sector bounds"
        );
        self.map_mut(id, |data| data[offset..offset + buf.len()].copy_from_slice(buf));
    }

    /// 把整个扇区清零
    #[inline]
    pub fn zeroize(&self, id: SectorId) {
        self.map_mut(id, |data| data.fill(0));
    }

    /// 在持有缓存锁的情况下读取扇区。
    ///
    /// `f` 内不能再访问缓存，否则会死锁。
    pub fn map<V>(&self, id: SectorId, f: impl FnOnce(&DataBlock) -> V) -> V {
        let mut queue = self.queue.lock();
        let sector = self.lookup(&mut queue, id);
        f(&sector.data)
    }

    /// 在持有缓存锁的情况下修改扇区，扇区被标为脏块。
    ///
    /// `f` 内不能再访问缓存，否则会死锁。
    pub fn map_mut<V>(&self, id: SectorId, f: impl FnOnce(&mut DataBlock) -> V) -> V {
        let mut queue = self.queue.lock();
        let sector = self.lookup(&mut queue, id);
        sector.modified = true;
        f(&mut sector.data)
    }

    /// 写回所有脏块，但保留缓存
    pub fn sync(&self) {
        let mut queue = self.queue.lock();
        for sector in queue.iter_mut() {
            sector.sync(&self.device);
        }
    }

    /// 写回并丢弃所有缓存，只在文件系统关闭时调用
    pub fn flush_all(&self) {
        let mut queue = self.queue.lock();
        let count = queue.len();
        while let Some(mut sector) = queue.pop_front() {
            sector.sync(&self.device);
        }
        log::debug!("buffer cache flushed, {count} sectors dropped");
    }

    /// 当前缓存的扇区数
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: SectorId) -> bool {
        self.queue.lock().iter().any(|sector| sector.id == id)
    }
}

impl BufferCache {
    /// 块缓存调度策略：命中则移到队首；
    /// 未命中且缓存已满时踢走队尾（最久未用）的扇区，脏块先写回。
    fn lookup<'a>(&self, queue: &'a mut VecDeque<CachedSector>, id: SectorId) -> &'a mut CachedSector {
        assert!(id.is_valid(), "access to an unallocated sector");

        if let Some(index) = queue.iter().position(|sector| sector.id == id) {
            if index != 0 {
                let sector = queue.remove(index).unwrap();
                queue.push_front(sector);
            }
            return &mut queue[0];
        }

        if queue.len() >= self.capacity {
            let mut victim = queue.pop_back().unwrap();
            log::trace!(
                "evict sector {} (dirty: {})",
                victim.id,
                victim.modified
            );
            victim.sync(&self.device);
        }

        queue.push_front(CachedSector::load(id, &self.device));
        &mut queue[0]
    }
}

impl CachedSector {
    fn load(id: SectorId, device: &Arc<dyn BlockDevice>) -> Self {
        let mut data = Box::new([0; SECTOR_SIZE]);
        device.read_block(id.block(), data.as_mut_slice());

        Self {
            id,
            data,
            modified: false,
        }
    }

    fn sync(&mut self, device: &Arc<dyn BlockDevice>) {
        if self.modified {
            self.modified = false;
            device.write_block(self.id.block(), self.data.as_slice());
        }
    }
}

impl Drop for BufferCache {
    fn drop(&mut self) {
        self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::MemDisk;

    fn cache(sectors: usize) -> (BufferCache, Arc<MemDisk>) {
        let disk = Arc::new(MemDisk::new(sectors));
        (BufferCache::new(disk.clone()), disk)
    }

    fn stamp(i: u32) -> [u8; 8] {
        let mut bytes = [0xA5; 8];
        bytes[..4].copy_from_slice(&i.to_le_bytes());
        bytes
    }

    #[test]
    fn hit_does_not_touch_the_device() {
        let (cache, disk) = cache(8);
        let mut buf = [0; 4];
        cache.read(SectorId::new(3), 0, &mut buf);
        cache.read(SectorId::new(3), 4, &mut buf);
        assert_eq!(disk.reads(), 1);
        assert_eq!(disk.writes(), 0);
    }

    #[test]
    fn writes_are_write_back() {
        let (cache, disk) = cache(8);
        cache.write(SectorId::new(2), 10, b"hello");
        assert_eq!(disk.writes(), 0);
        assert_eq!(&disk.peek(2)[10..15], &[0; 5]);

        cache.flush_all();
        assert_eq!(&disk.peek(2)[10..15], b"hello");
        assert!(cache.is_empty());
    }

    #[test]
    fn sync_keeps_entries() {
        let (cache, disk) = cache(8);
        cache.write(SectorId::new(1), 0, b"x");
        cache.sync();
        assert_eq!(disk.peek(1)[0], b'x');
        assert!(cache.contains(SectorId::new(1)));
        cache.sync();
        assert_eq!(disk.writes(), 1);
    }

    #[test]
    fn overflowing_the_cache_keeps_data_correct() {
        let total = CACHE_CAPACITY as u32 + 40;
        let (cache, disk) = cache(total as usize);

        for i in 0..total {
            cache.write(SectorId::new(i), 100, &stamp(i));
        }
        assert_eq!(cache.len(), CACHE_CAPACITY);

        for i in 0..total {
            let mut buf = [0; 8];
            cache.read(SectorId::new(i), 100, &mut buf);
            assert_eq!(buf, stamp(i), "sector {i}");
        }
        assert!(disk.reads() > total as usize);
    }

    #[test]
    fn dirty_victim_is_written_back_before_eviction() {
        let (cache, disk) = cache(CACHE_CAPACITY + 1);
        cache.write(SectorId::new(0), 0, b"evicted");

        // 填满缓存，把扇区0挤出去
        let mut buf = [0; 1];
        for i in 1..=CACHE_CAPACITY as u32 {
            cache.read(SectorId::new(i), 0, &mut buf);
        }
        assert!(!cache.contains(SectorId::new(0)));
        assert_eq!(&disk.peek(0)[..7], b"evicted");

        // 如果重新读取命中的是缓存而不是设备，这次篡改就不会被看到
        let mut cell = disk.peek(0);
        cell[7] = b'!';
        disk.poke(0, &cell);

        let mut back = [0; 8];
        cache.read(SectorId::new(0), 0, &mut back);
        assert_eq!(&back, b"evicted!");
    }

    #[test]
    fn hit_promotes_to_most_recently_used() {
        let (cache, _disk) = cache(CACHE_CAPACITY + 1);
        let mut buf = [0; 1];
        for i in 0..CACHE_CAPACITY as u32 {
            cache.read(SectorId::new(i), 0, &mut buf);
        }
        // 扇区0本该是最旧的，读一次后它变成最新的
        cache.read(SectorId::new(0), 0, &mut buf);
        cache.read(SectorId::new(CACHE_CAPACITY as u32), 0, &mut buf);

        assert!(cache.contains(SectorId::new(0)));
        assert!(!cache.contains(SectorId::new(1)));
    }

    #[test]
    #[should_panic(expected = "out of sector bounds")]
    fn range_past_sector_end_is_fatal() {
        let (cache, _disk) = cache(2);
        cache.write(SectorId::new(0), SECTOR_SIZE - 2, b"abc");
    }
}
