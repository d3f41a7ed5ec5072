//! # 目录层
//!
//! 目录就是类型为 [`InodeKind::Directory`] 的 inode，
//! 内容是连续存放的 [`DirEntry`]，与普通文件一样通过 `read_at`/`write_at` 读写。
//!
//! 除根目录外，每个目录在创建时都写入 "." 与 ".." 两项；根目录的 ".." 指向自己。

use alloc::string::String;
use alloc::sync::Arc;

use crate::error::{Error, Result};
use crate::inode::{Inode, Volume};
use crate::layout::{DirEntry, InodeKind};
use crate::{ROOT_DIR_SECTOR, SectorId};

/// 打开的目录：inode 加上遍历游标。
///
/// 游标属于句柄而不属于磁盘，重新遍历需要 [`Directory::reopen`]。
#[derive(Debug)]
pub struct Directory {
    inode: Inode,
    pos: usize,
}

impl Directory {
    /// 在 `sector` 上创建目录，预留 `entry_count` 个目录项的空间，并写入 "." 与 ".."。
    ///
    /// 至少预留两项，保证写入 "." 与 ".." 时不必再扩展。
    pub fn create(
        volume: &Arc<Volume>,
        sector: SectorId,
        entry_count: usize,
        parent: SectorId,
    ) -> Result<()> {
        volume.create_inode(
            sector,
            entry_count.max(2) * DirEntry::SIZE,
            InodeKind::Directory,
        )?;

        let dir = Self::open(volume.open_inode(sector)?)?;
        dir.add(".", sector)?;
        dir.add("..", parent)?;
        Ok(())
    }

    /// 接管 `inode`；它不是目录时关闭它并返回错误
    pub fn open(inode: Inode) -> Result<Self> {
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(Self { inode, pos: 0 })
    }

    pub fn open_root(volume: &Arc<Volume>) -> Result<Self> {
        Self::open(volume.open_inode(ROOT_DIR_SECTOR)?)
    }

    /// 同一个 inode 的新句柄，游标从头开始
    #[inline]
    pub fn reopen(&self) -> Self {
        Self {
            inode: self.inode.reopen(),
            pos: 0,
        }
    }

    #[inline]
    pub fn close(self) {}

    #[inline]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    #[inline]
    pub fn inumber(&self) -> SectorId {
        self.inode.inumber()
    }

    /// 按名字查找并打开子项。
    ///
    /// 空名字代表目录自己，用于解析以 `/` 结尾的路径。
    pub fn lookup(&self, name: &str) -> Result<Inode> {
        if name.is_empty() {
            return Ok(self.inode.reopen());
        }

        let (_, entry) = self.find(name).ok_or(Error::NotFound)?;
        self.inode.volume().open_inode(entry.sector())
    }

    /// 子项是否存在，不打开它
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// 添加指向 `sector` 的目录项，优先复用墓碑，否则追加到末尾。
    ///
    /// 目录从不禁止写入，写入不完整只可能是空间不足。
    pub fn add(&self, name: &str, sector: SectorId) -> Result<()> {
        if !DirEntry::is_valid_name(name) {
            return Err(Error::InvalidName);
        }
        if self.find(name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let offset = self
            .entries()
            .find_map(|(offset, entry)| (!entry.in_use()).then_some(offset))
            .unwrap_or(self.inode.length());

        let entry = DirEntry::new(name, sector);
        if self.inode.write_at(&entry.to_bytes(), offset) != DirEntry::SIZE {
            return Err(Error::NoSpace);
        }
        Ok(())
    }

    /// 删除目录项并标记其 inode 删除；inode 的扇区在最后一次关闭时才归还。
    ///
    /// "." 与 ".." 不能删除，按路径删除目录请用 [`FileSystem::remove`](crate::FileSystem::remove)。
    pub fn remove(&self, name: &str) -> Result<()> {
        debug_assert!(
            !matches!(name, "." | ".."),
            "dot entries of a directory cannot be removed"
        );
        let (offset, mut entry) = self.find(name).ok_or(Error::NotFound)?;
        let inode = self.inode.volume().open_inode(entry.sector())?;

        entry.tombstone();
        if self.inode.write_at(&entry.to_bytes(), offset) != DirEntry::SIZE {
            return Err(Error::NoSpace);
        }

        inode.remove();
        Ok(())
    }

    /// 父目录
    pub fn parent(&self) -> Result<Self> {
        Self::open(self.lookup("..")?)
    }

    /// 解析 `path`：逐段进入子目录，最后一段不打开，
    /// 返回 `(其所在目录, 最后一段)`。
    ///
    /// 以 `/` 开头的路径从根目录开始解析，否则从 `start` 开始；
    /// 中间段不存在或不是目录时失败。
    pub fn resolve_path<'p>(path: &'p str, start: &Self) -> Result<(Self, &'p str)> {
        let (mut dir, mut rest) = match path.strip_prefix('/') {
            Some(relative) => (Self::open_root(start.inode.volume())?, relative),
            None => (start.reopen(), path),
        };

        while let Some((segment, tail)) = rest.split_once('/') {
            dir = dir.lookup(segment).and_then(Self::open).inspect_err(|err| {
                log::debug!("resolving {path:?}: segment {segment:?}: {err}")
            })?;
            rest = tail;
        }

        Ok((dir, rest))
    }
}

impl Directory {
    /// 依次读出所有目录项（含墓碑）及其偏移
    fn entries(&self) -> impl Iterator<Item = (usize, DirEntry)> + '_ {
        let mut offset = 0;
        core::iter::from_fn(move || {
            let entry = read_entry(&self.inode, offset)?;
            let item = (offset, entry);
            offset += DirEntry::SIZE;
            Some(item)
        })
    }

    fn find(&self, name: &str) -> Option<(usize, DirEntry)> {
        self.entries()
            .find(|(_, entry)| entry.in_use() && entry.name() == name)
    }
}

/// 读取 `offset` 处的目录项；读到目录末尾返回空
fn read_entry(inode: &Inode, offset: usize) -> Option<DirEntry> {
    let mut raw = [0; DirEntry::SIZE];
    (inode.read_at(&mut raw, offset) == DirEntry::SIZE).then(|| DirEntry::from_bytes(&raw))
}

/// 按磁盘顺序列出子项名字，跳过墓碑、"." 与 ".."
impl Iterator for Directory {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = read_entry(&self.inode, self.pos) {
            self.pos += DirEntry::SIZE;
            if entry.in_use() && !entry.is_dot() {
                return Some(String::from(entry.name()));
            }
        }
        None
    }
}
