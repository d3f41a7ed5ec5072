//! # 索引节点层
//!
//! 磁盘 inode 只描述数据的位置，这一层负责：
//!
//! - 维护打开的 inode 登记表，保证同一扇区在内存中只有一个 inode；
//! - 把文件的字节偏移翻译为扇区号，惰性缓存一级、二级索引块；
//! - 写越过文件末尾时扩展文件；
//! - 延迟删除：被删除的 inode 在最后一次关闭时才归还扇区。
//!
//! [`Inode`] 是共享的句柄，克隆即重新打开，析构即关闭。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use enumflags2::bitflags;
use spin::Mutex;

use crate::block_cache::BufferCache;
use crate::error::{Error, Result};
use crate::free_map::FreeMap;
use crate::layout::{DOUBLE_INDIRECT_CAP, DiskInode, IndexBlock, IndexPos, InodeKind};
use crate::{SECTOR_SIZE, SectorId};

/// 一个挂载的设备：块缓存、空闲扇区分配器与打开的 inode
pub struct Volume {
    cache: BufferCache,
    free_map: Arc<dyn FreeMap>,
    /// 打开的 inode，以 inode 所在扇区为键
    open_inodes: Mutex<BTreeMap<SectorId, Arc<OpenInode>>>,
}

/// 内存中的 inode，同一扇区至多一个
struct OpenInode {
    sector: SectorId,
    state: Mutex<InodeState>,
}

struct InodeState {
    /// 只在持有登记表锁时修改
    open_count: usize,
    lifecycle: Lifecycle,
    deny_write_count: usize,
    disk: DiskInode,
    index: IndexCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Live,
    /// 已被删除，最后一次关闭时归还所有扇区
    PendingDeletion,
}

/// 惰性展开的索引块，生命期与内存 inode 相同
#[derive(Default)]
struct IndexCache {
    indirect: Option<CachedIndex>,
    double: Option<CachedIndex>,
    /// 二级索引下属的一级索引块，以其在二级索引块中的位置为键
    inner: BTreeMap<usize, CachedIndex>,
}

struct CachedIndex {
    sector: SectorId,
    block: IndexBlock,
    dirty: bool,
}

/// 打开的 inode 的句柄。
///
/// 克隆等同于重新打开；句柄析构等同于关闭，最后一次关闭会把内存 inode 移出登记表。
pub struct Inode {
    volume: Arc<Volume>,
    inner: Arc<OpenInode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// inode 所在扇区
    pub inumber: u32,
    pub kind: StatKind,
    /// 文件字节数
    pub size: u64,
    /// 数据扇区与索引块的总数
    pub blocks: u64,
}

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    FILE = 0o100000,
}

impl Volume {
    pub fn new(device: Arc<dyn BlockDevice>, free_map: Arc<dyn FreeMap>) -> Arc<Self> {
        Self::with_cache(BufferCache::new(device), free_map)
    }

    pub fn with_cache(cache: BufferCache, free_map: Arc<dyn FreeMap>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            free_map,
            open_inodes: Mutex::new(BTreeMap::new()),
        })
    }

    #[inline]
    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    #[inline]
    pub fn free_map(&self) -> &Arc<dyn FreeMap> {
        &self.free_map
    }

    /// 申请一个扇区存放新的 inode
    pub fn alloc_sector(&self) -> Result<SectorId> {
        self.free_map.allocate(1).ok_or_else(|| {
            log::warn!("free map exhausted");
            Error::NoSpace
        })
    }

    #[inline]
    pub fn release_sector(&self, sector: SectorId) {
        self.free_map.release(sector, 1);
    }

    /// 在调用方已占下的 `sector` 上创建 inode，预先分配并清零 `length` 字节的数据扇区。
    ///
    /// 分配失败时归还这次申请到的所有扇区，`sector` 本身仍归调用方处理。
    pub fn create_inode(&self, sector: SectorId, length: usize, kind: InodeKind) -> Result<()> {
        let mut disk = DiskInode::new(kind);
        let mut index = IndexCache::default();

        let sectors = DiskInode::count_data_sectors(length);
        self.extend(&mut disk, &mut index, sectors)?;
        disk.length = length as u32;

        index.flush(&self.cache);
        self.cache.write(sector, 0, &disk.to_bytes());
        log::debug!("create inode {sector}: {kind:?}, {length} bytes");
        Ok(())
    }

    /// 打开 `sector` 上的 inode；已打开则共享同一个内存 inode。
    pub fn open_inode(self: &Arc<Self>, sector: SectorId) -> Result<Inode> {
        let mut open_inodes = self.open_inodes.lock();

        if let Some(inner) = open_inodes.get(&sector) {
            inner.state.lock().open_count += 1;
            return Ok(Inode {
                volume: self.clone(),
                inner: inner.clone(),
            });
        }

        let disk = self
            .cache
            .map(sector, DiskInode::from_bytes)
            .inspect_err(|_| log::error!("sector {sector} does not hold an inode"))?;
        let inner = Arc::new(OpenInode {
            sector,
            state: Mutex::new(InodeState {
                open_count: 1,
                lifecycle: Lifecycle::Live,
                deny_write_count: 0,
                disk,
                index: IndexCache::default(),
            }),
        });
        open_inodes.insert(sector, inner.clone());
        log::debug!("open inode {sector}");

        Ok(Inode {
            volume: self.clone(),
            inner,
        })
    }

    /// 打开的内存 inode 个数
    pub fn open_inodes(&self) -> usize {
        self.open_inodes.lock().len()
    }

    pub fn is_open(&self, sector: SectorId) -> bool {
        self.open_inodes.lock().contains_key(&sector)
    }
}

impl Volume {
    fn close(&self, inode: &OpenInode) {
        let mut open_inodes = self.open_inodes.lock();
        let mut state = inode.state.lock();

        assert!(state.open_count > 0, "inode {} closed too many times", inode.sector);
        state.open_count -= 1;
        if state.open_count > 0 {
            return;
        }
        open_inodes.remove(&inode.sector);
        if state.lifecycle == Lifecycle::PendingDeletion {
            self.reclaim(inode.sector, &mut state);
        }
        log::debug!("inode {} released", inode.sector);
    }

    /// 归还文件占有的全部扇区：数据扇区、索引块与 inode 本身
    fn reclaim(&self, sector: SectorId, state: &mut InodeState) {
        let length = state.disk.length as usize;
        let mut released = 0;

        for pos in (0..length).step_by(SECTOR_SIZE) {
            let data = state
                .byte_to_sector(pos, &self.cache)
                .expect("offset inside the file must map to a sector");
            self.free_map.release(data, 1);
            released += 1;
        }

        if state.disk.indirect.is_valid() {
            self.free_map.release(state.disk.indirect, 1);
            released += 1;
        }
        if state.disk.double_indirect.is_valid() {
            let outer = state.index.double(&state.disk, &self.cache);
            for inner in outer.block.valid() {
                self.free_map.release(inner, 1);
                released += 1;
            }
            self.free_map.release(state.disk.double_indirect, 1);
            released += 1;
        }

        self.free_map.release(sector, 1);
        state.index = IndexCache::default();
        log::debug!("inode {sector} removed, {} sectors reclaimed", released + 1);
    }

    /// 把文件扩展到 `sectors` 个数据扇区，新扇区均被清零。
    ///
    /// 只修改内存中的 inode 与索引块，成功后由调用方写回；
    /// 失败时撤销这次扩展做出的全部链接并归还新申请的扇区。
    fn extend(&self, disk: &mut DiskInode, index: &mut IndexCache, sectors: usize) -> Result<()> {
        let start = DiskInode::count_data_sectors(disk.length as usize);
        if sectors <= start {
            return Ok(());
        }
        assert!(
            sectors <= DOUBLE_INDIRECT_CAP,
            "file is too large: {sectors} sectors exceed {DOUBLE_INDIRECT_CAP}"
        );

        let mut extension = Extension::default();
        for n in start..sectors {
            if let Err(err) = self.link_data_sector(disk, index, n, &mut extension) {
                log::warn!(
                    "extending to {sectors} sectors failed at {n}, rolling back {} sectors",
                    extension.allocated.len()
                );
                extension.rollback(self, disk, index, start..n);
                return Err(err);
            }
        }

        Ok(())
    }

    fn link_data_sector(
        &self,
        disk: &mut DiskInode,
        index: &mut IndexCache,
        n: usize,
        extension: &mut Extension,
    ) -> Result<()> {
        let pos = IndexPos::locate(n);

        // 先备好索引块
        match pos {
            IndexPos::Direct(_) => {}
            IndexPos::Indirect(_) => {
                if !disk.indirect.is_valid() {
                    let id = extension.alloc(self)?;
                    disk.indirect = id;
                    index.indirect = Some(CachedIndex::fresh(id));
                    extension.new_indirect = true;
                }
            }
            IndexPos::DoubleIndirect { outer, .. } => {
                if !disk.double_indirect.is_valid() {
                    let id = extension.alloc(self)?;
                    disk.double_indirect = id;
                    index.double = Some(CachedIndex::fresh(id));
                    extension.new_double = true;
                }
                let double = index.double(disk, &self.cache);
                if !double.block[outer].is_valid() {
                    let id = extension.alloc(self)?;
                    double.block[outer] = id;
                    double.dirty = true;
                    index.inner.insert(outer, CachedIndex::fresh(id));
                    extension.new_inner.push(outer);
                }
            }
        }

        let data = extension.alloc(self)?;
        self.cache.zeroize(data);
        *index.slot(disk, pos, &self.cache) = data;
        Ok(())
    }
}

/// 一次扩展新申请的扇区与新建的索引块，失败时据此回滚
#[derive(Default)]
struct Extension {
    allocated: Vec<SectorId>,
    new_indirect: bool,
    new_double: bool,
    new_inner: Vec<usize>,
}

impl Extension {
    fn alloc(&mut self, volume: &Volume) -> Result<SectorId> {
        let id = volume.alloc_sector()?;
        self.allocated.push(id);
        Ok(id)
    }

    fn rollback(
        self,
        volume: &Volume,
        disk: &mut DiskInode,
        index: &mut IndexCache,
        linked: core::ops::Range<usize>,
    ) {
        // 已有索引块中的链接置为未分配
        for n in linked {
            match IndexPos::locate(n) {
                IndexPos::Direct(i) => disk.direct[i] = SectorId::INVALID,
                IndexPos::Indirect(i) => {
                    if let Some(indirect) = index.indirect.as_mut() {
                        indirect.block[i] = SectorId::INVALID;
                    }
                }
                IndexPos::DoubleIndirect { outer, inner } => {
                    if let Some(block) = index.inner.get_mut(&outer) {
                        block.block[inner] = SectorId::INVALID;
                    }
                }
            }
        }

        for outer in self.new_inner {
            index.inner.remove(&outer);
            if let Some(double) = index.double.as_mut() {
                double.block[outer] = SectorId::INVALID;
            }
        }
        if self.new_double {
            disk.double_indirect = SectorId::INVALID;
            index.double = None;
        }
        if self.new_indirect {
            disk.indirect = SectorId::INVALID;
            index.indirect = None;
        }

        for id in self.allocated {
            volume.release_sector(id);
        }
    }
}

impl CachedIndex {
    /// 新申请的索引块，全部未分配
    fn fresh(sector: SectorId) -> Self {
        Self {
            sector,
            block: IndexBlock::new(),
            dirty: true,
        }
    }

    fn load(sector: SectorId, cache: &BufferCache) -> Self {
        assert!(sector.is_valid(), "index block is not allocated");
        Self {
            sector,
            block: cache.map(sector, IndexBlock::from_bytes),
            dirty: false,
        }
    }
}

impl IndexCache {
    fn indirect(&mut self, disk: &DiskInode, cache: &BufferCache) -> &mut CachedIndex {
        self.indirect
            .get_or_insert_with(|| CachedIndex::load(disk.indirect, cache))
    }

    fn double(&mut self, disk: &DiskInode, cache: &BufferCache) -> &mut CachedIndex {
        self.double
            .get_or_insert_with(|| CachedIndex::load(disk.double_indirect, cache))
    }

    fn inner(&mut self, disk: &DiskInode, cache: &BufferCache, outer: usize) -> &mut CachedIndex {
        let id = self.double(disk, cache).block[outer];
        self.inner
            .entry(outer)
            .or_insert_with(|| CachedIndex::load(id, cache))
    }

    /// 第 n 个数据扇区的扇区号所在的槽位，写入即标脏
    fn slot<'a>(
        &'a mut self,
        disk: &'a mut DiskInode,
        pos: IndexPos,
        cache: &BufferCache,
    ) -> &'a mut SectorId {
        match pos {
            IndexPos::Direct(i) => &mut disk.direct[i],
            IndexPos::Indirect(i) => {
                let indirect = self.indirect(disk, cache);
                indirect.dirty = true;
                &mut indirect.block[i]
            }
            IndexPos::DoubleIndirect { outer, inner } => {
                let block = self.inner(disk, cache, outer);
                block.dirty = true;
                &mut block.block[inner]
            }
        }
    }

    /// 写回被修改过的索引块
    fn flush(&mut self, cache: &BufferCache) {
        let blocks = self
            .indirect
            .iter_mut()
            .chain(self.double.iter_mut())
            .chain(self.inner.values_mut());
        for index in blocks.filter(|index| index.dirty) {
            cache.write(index.sector, 0, &index.block.to_bytes());
            index.dirty = false;
        }
    }
}

impl InodeState {
    /// 字节偏移 `pos` 所在的扇区；越过文件末尾返回空
    fn byte_to_sector(&mut self, pos: usize, cache: &BufferCache) -> Option<SectorId> {
        if pos >= self.disk.length as usize {
            return None;
        }

        let id = match IndexPos::locate(pos / SECTOR_SIZE) {
            IndexPos::Direct(i) => self.disk.direct[i],
            IndexPos::Indirect(i) => self.index.indirect(&self.disk, cache).block[i],
            IndexPos::DoubleIndirect { outer, inner } => {
                self.index.inner(&self.disk, cache, outer).block[inner]
            }
        };
        Some(id)
    }
}

impl Inode {
    /// inode 所在扇区，同时也是它的编号
    #[inline]
    pub fn inumber(&self) -> SectorId {
        self.inner.sector
    }

    #[inline]
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    pub fn kind(&self) -> InodeKind {
        self.inner.state.lock().disk.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == InodeKind::Directory
    }

    /// 文件字节数
    pub fn length(&self) -> usize {
        self.inner.state.lock().disk.length as usize
    }

    pub fn open_count(&self) -> usize {
        self.inner.state.lock().open_count
    }

    pub fn is_removed(&self) -> bool {
        self.inner.state.lock().lifecycle == Lifecycle::PendingDeletion
    }

    /// 两个句柄是否指向同一个内存 inode
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn stat(&self) -> Stat {
        let state = self.inner.state.lock();
        let length = state.disk.length as usize;
        Stat {
            inumber: self.inner.sector.raw(),
            kind: state.disk.kind.into(),
            size: length as u64,
            blocks: DiskInode::count_total_sectors(length) as u64,
        }
    }

    /// 重新打开，打开计数加一
    #[inline]
    pub fn reopen(&self) -> Self {
        self.clone()
    }

    /// 关闭，等同于析构句柄
    #[inline]
    pub fn close(self) {}

    /// 标记删除；扇区在最后一次关闭时归还，持有者在此之前仍可读写
    pub fn remove(&self) {
        self.inner.state.lock().lifecycle = Lifecycle::PendingDeletion;
        log::debug!("inode {} marked for deletion", self.inner.sector);
    }

    /// 从 `offset` 处读出数据填充 `buf`，返回实际读出的字节数，只有到达文件末尾时才少于请求
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let cache = self.volume.cache();
        let mut read_size = 0;

        while read_size < buf.len() {
            let pos = offset + read_size;
            let (length, sector) = {
                let mut state = self.inner.state.lock();
                let sector = state.byte_to_sector(pos, cache);
                (state.disk.length as usize, sector)
            };
            let Some(sector) = sector else {
                break;
            };

            // 扇区内偏移；文件剩余、扇区剩余与请求剩余三者取最小
            let sector_offset = pos % SECTOR_SIZE;
            let chunk = (buf.len() - read_size)
                .min(SECTOR_SIZE - sector_offset)
                .min(length - pos);
            cache.read(
                sector,
                sector_offset,
                &mut buf[read_size..read_size + chunk],
            );
            read_size += chunk;
        }

        read_size
    }

    /// 把 `buf` 写到 `offset` 处，越过文件末尾时先扩展文件。
    ///
    /// 写被禁止时什么也不做；扩展失败时返回 0。
    pub fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let end = offset + buf.len();

        {
            let mut state = self.inner.state.lock();
            if state.deny_write_count > 0 {
                return 0;
            }
            if end > state.disk.length as usize {
                if let Err(err) = self.grow(&mut state, end) {
                    log::warn!("inode {}: write past end failed: {err}", self.inner.sector);
                    return 0;
                }
            }
        }

        let cache = self.volume.cache();
        let mut written_size = 0;
        while written_size < buf.len() {
            let pos = offset + written_size;
            let sector = self
                .inner
                .state
                .lock()
                .byte_to_sector(pos, cache)
                .expect("file was extended to cover the write");

            let sector_offset = pos % SECTOR_SIZE;
            let chunk = (buf.len() - written_size).min(SECTOR_SIZE - sector_offset);
            cache.write(
                sector,
                sector_offset,
                &buf[written_size..written_size + chunk],
            );
            written_size += chunk;
        }

        written_size
    }

    /// 禁止写入，用于保护正在执行的可执行文件。每个打开者至多调用一次。
    ///
    /// 目录不能被禁止写入。
    pub fn deny_write(&self) {
        let mut state = self.inner.state.lock();
        assert!(
            state.disk.kind != InodeKind::Directory,
            "directory {} cannot be write-denied",
            self.inner.sector
        );
        assert!(
            state.deny_write_count < state.open_count,
            "deny_write called more times than the inode is open"
        );
        state.deny_write_count += 1;
    }

    /// 解除一次 [`Inode::deny_write`]
    pub fn allow_write(&self) {
        let mut state = self.inner.state.lock();
        assert!(state.deny_write_count > 0, "allow_write without deny_write");
        assert!(state.deny_write_count <= state.open_count);
        state.deny_write_count -= 1;
    }
}

impl Inode {
    /// 把长度扩展到 `end` 字节，新的索引块与 inode 在写入数据之前落盘
    fn grow(&self, state: &mut InodeState, end: usize) -> Result<()> {
        let volume = &self.volume;
        let InodeState { disk, index, .. } = state;

        volume.extend(disk, index, DiskInode::count_data_sectors(end))?;
        disk.length = end as u32;

        index.flush(volume.cache());
        volume
            .cache()
            .write(self.inner.sector, 0, &disk.to_bytes());
        Ok(())
    }
}

impl Clone for Inode {
    fn clone(&self) -> Self {
        // 持有登记表锁，与关闭互斥
        let _open_inodes = self.volume.open_inodes.lock();
        self.inner.state.lock().open_count += 1;
        Self {
            volume: self.volume.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        self.volume.close(&self.inner);
    }
}

impl core::fmt::Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("sector", &self.inner.sector)
            .finish_non_exhaustive()
    }
}

impl From<InodeKind> for StatKind {
    #[inline]
    fn from(kind: InodeKind) -> Self {
        match kind {
            InodeKind::Directory => Self::DIR,
            InodeKind::File => Self::FILE,
        }
    }
}
