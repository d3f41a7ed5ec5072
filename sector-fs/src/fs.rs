//! # 文件系统门面
//!
//! 格式化与挂载设备，并按路径创建、打开、删除文件与目录。
//!
//! 路径以 `/` 开头时从根目录解析，否则从调用者的工作目录解析。

use alloc::string::String;
use alloc::sync::Arc;

use block_dev::BlockDevice;

use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::free_map::FreeMap;
use crate::inode::{Inode, Volume};
use crate::layout::InodeKind;
use crate::{ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR, SectorId};

pub struct FileSystem {
    volume: Arc<Volume>,
}

impl FileSystem {
    /// 格式化设备：重置空闲扇区分配器，创建自己作为父目录的根目录
    pub fn format(device: Arc<dyn BlockDevice>, free_map: Arc<dyn FreeMap>) -> Result<Self> {
        free_map.format();
        let volume = Volume::new(device, free_map);
        Directory::create(&volume, ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR)?;
        volume.cache().sync();
        log::info!("formatted, root directory at sector {ROOT_DIR_SECTOR}");

        Ok(Self { volume })
    }

    /// 挂载已格式化的设备，根目录损坏时失败
    pub fn mount(device: Arc<dyn BlockDevice>, free_map: Arc<dyn FreeMap>) -> Result<Self> {
        let volume = Volume::new(device, free_map);
        Directory::open_root(&volume)?;
        log::info!("mounted");

        Ok(Self { volume })
    }

    #[inline]
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    #[inline]
    pub fn open_root(&self) -> Result<Directory> {
        Directory::open_root(&self.volume)
    }

    /// 创建 `initial_size` 字节、内容全零的普通文件
    pub fn create(&self, path: &str, initial_size: usize, cwd: &Directory) -> Result<()> {
        self.make(path, cwd, |volume, sector, _| {
            volume.create_inode(sector, initial_size, InodeKind::File)
        })
    }

    /// 创建空目录
    pub fn mkdir(&self, path: &str, cwd: &Directory) -> Result<()> {
        self.make(path, cwd, |volume, sector, parent| {
            Directory::create(volume, sector, 0, parent.inumber())
        })
    }

    pub fn open(&self, path: &str, cwd: &Directory) -> Result<Inode> {
        let (dir, name) = self.resolve(path, cwd)?;
        dir.lookup(name)
    }

    /// 删除文件或目录。
    ///
    /// 目录是工作目录本身或其祖先时拒绝删除；
    /// 其余情况下目录项立即消失，扇区在最后一个持有者关闭后归还。
    pub fn remove(&self, path: &str, cwd: &Directory) -> Result<()> {
        let (dir, name) = self.resolve(path, cwd)?;
        let target = dir.lookup(name)?;

        if target.is_dir() && Self::is_ancestor(&target, cwd)? {
            log::debug!("refusing to remove {path:?}: in use by working directory");
            return Err(Error::Busy);
        }

        if matches!(name, "" | "." | "..") {
            // 目标的目录项在它自己的父目录里
            let target = Directory::open(target)?;
            let parent = target.parent()?;
            let name = Self::name_in(&parent, target.inumber())?;
            drop(target);
            return parent.remove(&name);
        }
        drop(target);
        dir.remove(name)
    }

    /// 把工作目录切换到 `path`
    pub fn chdir(&self, path: &str, cwd: &mut Directory) -> Result<()> {
        let inode = self.open(path, cwd)?;
        *cwd = Directory::open(inode)?;
        Ok(())
    }

    /// 写回缓存中的脏扇区
    #[inline]
    pub fn sync(&self) {
        self.volume.cache().sync();
    }

    /// 写回并清空缓存，之后设备内容完整
    pub fn shutdown(&self) {
        self.volume.cache().flush_all();
        log::info!("shut down, {} inodes still open", self.volume.open_inodes());
    }
}

impl FileSystem {
    #[inline]
    fn resolve<'p>(&self, path: &'p str, cwd: &Directory) -> Result<(Directory, &'p str)> {
        Directory::resolve_path(path, cwd)
    }

    /// 解析路径、申请 inode 扇区、由 `init` 初始化 inode，最后加入目录。
    ///
    /// 加入目录失败时把新 inode 标记删除再关闭，连同它的扇区一起归还。
    fn make(
        &self,
        path: &str,
        cwd: &Directory,
        init: impl FnOnce(&Arc<Volume>, SectorId, &Directory) -> Result<()>,
    ) -> Result<()> {
        let (dir, name) = self.resolve(path, cwd)?;
        if dir.inode().is_removed() {
            return Err(Error::NotFound);
        }

        let sector = self.volume.alloc_sector()?;
        if let Err(err) = init(&self.volume, sector, &dir) {
            self.volume.release_sector(sector);
            return Err(err);
        }

        dir.add(name, sector).inspect_err(|err| {
            log::debug!("adding {path:?} failed: {err}, discarding inode {sector}");
            if let Ok(inode) = self.volume.open_inode(sector) {
                inode.remove();
            }
        })
    }

    /// `dir` 是否是 `cwd` 本身或它的祖先；沿 ".." 一直走到根目录
    fn is_ancestor(dir: &Inode, cwd: &Directory) -> Result<bool> {
        let mut current = cwd.reopen();
        loop {
            if current.inumber() == dir.inumber() {
                return Ok(true);
            }
            if current.inumber() == ROOT_DIR_SECTOR {
                return Ok(false);
            }
            current = current.parent()?;
        }
    }

    /// `parent` 中指向 `sector` 的目录项名字
    fn name_in(parent: &Directory, sector: SectorId) -> Result<String> {
        parent
            .reopen()
            .find(|name| {
                parent
                    .lookup(name)
                    .is_ok_and(|inode| inode.inumber() == sector)
            })
            .ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::layout::DiskInode;
    use crate::test_util::MemDisk;
    use crate::{Bitmap, SECTOR_SIZE};

    fn fresh(sectors: usize) -> (FileSystem, Arc<Bitmap>, Arc<MemDisk>) {
        let disk = Arc::new(MemDisk::new(sectors));
        let bitmap = Arc::new(Bitmap::new(sectors));
        let fs = FileSystem::format(disk.clone(), bitmap.clone()).unwrap();
        (fs, bitmap, disk)
    }

    #[test]
    fn format_makes_a_self_parented_root() {
        let (fs, _, _) = fresh(64);
        let root = fs.open_root().unwrap();
        assert_eq!(root.lookup(".").unwrap().inumber(), ROOT_DIR_SECTOR);
        assert_eq!(root.lookup("..").unwrap().inumber(), ROOT_DIR_SECTOR);
        assert_eq!(root.reopen().count(), 0);
    }

    #[test]
    fn mount_rejects_an_unformatted_device() {
        let disk = Arc::new(MemDisk::new(16));
        let bitmap = Arc::new(Bitmap::new(16));
        assert_eq!(
            FileSystem::mount(disk, bitmap).err(),
            Some(Error::Corrupted)
        );
    }

    #[test]
    fn absolute_and_relative_paths() {
        let (fs, _, _) = fresh(256);
        let root = fs.open_root().unwrap();
        fs.mkdir("/a", &root).unwrap();

        let mut cwd = fs.open_root().unwrap();
        fs.chdir("a", &mut cwd).unwrap();
        fs.create("f", 5, &cwd).unwrap();

        let by_abs = fs.open("/a/f", &cwd).unwrap();
        let by_rel = fs.open("f", &cwd).unwrap();
        assert!(by_abs.ptr_eq(&by_rel));
        assert_eq!(by_abs.length(), 5);

        assert_eq!(fs.open("f", &root).unwrap_err(), Error::NotFound);
        assert_eq!(fs.chdir("f", &mut cwd).unwrap_err(), Error::NotADirectory);
        assert_eq!(cwd.inumber(), fs.open("/a", &root).unwrap().inumber());
    }

    #[test]
    fn create_rejects_duplicates_without_leaking() {
        let (fs, bitmap, _) = fresh(256);
        let root = fs.open_root().unwrap();
        fs.create("/x", 2000, &root).unwrap();
        let used = bitmap.used_count();

        assert_eq!(fs.create("/x", 2000, &root), Err(Error::AlreadyExists));
        assert_eq!(
            fs.create("/fifteen_chars__", 0, &root),
            Err(Error::InvalidName)
        );
        assert_eq!(bitmap.used_count(), used);
        assert_eq!(fs.volume().open_inodes(), 1);
    }

    #[test]
    fn create_out_of_space_leaks_nothing() {
        let (fs, bitmap, _) = fresh(64);
        let root = fs.open_root().unwrap();
        let used = bitmap.used_count();

        assert_eq!(
            fs.create("/big", 100 * SECTOR_SIZE, &root),
            Err(Error::NoSpace)
        );
        assert_eq!(bitmap.used_count(), used);
        assert!(!root.contains("big"));
    }

    #[test]
    fn ancestor_removal_guard() {
        let (fs, _, _) = fresh(256);
        let root = fs.open_root().unwrap();
        fs.mkdir("/a", &root).unwrap();
        fs.mkdir("/a/b", &root).unwrap();
        fs.mkdir("/s", &root).unwrap();

        let mut cwd = fs.open_root().unwrap();
        fs.chdir("/a/b", &mut cwd).unwrap();

        assert_eq!(fs.remove("/a", &cwd), Err(Error::Busy));
        assert_eq!(fs.remove("/a/b", &cwd), Err(Error::Busy));
        assert_eq!(fs.remove(".", &cwd), Err(Error::Busy));
        assert_eq!(fs.remove("..", &cwd), Err(Error::Busy));
        assert_eq!(fs.remove("/", &cwd), Err(Error::Busy));

        fs.remove("/s", &cwd).unwrap();
        assert_eq!(fs.open("/s", &root).unwrap_err(), Error::NotFound);

        fs.chdir("/", &mut cwd).unwrap();
        fs.remove("/a/b/", &cwd).unwrap();
        let a = Directory::open(fs.open("/a", &root).unwrap()).unwrap();
        assert_eq!(a.count(), 0);
    }

    #[test]
    fn nothing_is_created_inside_a_removed_directory() {
        let (fs, _, _) = fresh(256);
        let root = fs.open_root().unwrap();
        fs.mkdir("/d", &root).unwrap();

        let mut cwd = fs.open_root().unwrap();
        fs.chdir("d", &mut cwd).unwrap();
        // 其他进程的工作目录不受保护
        fs.remove("/d", &root).unwrap();
        assert_eq!(fs.create("f", 0, &cwd), Err(Error::NotFound));
        assert_eq!(fs.mkdir("g", &cwd), Err(Error::NotFound));
    }

    #[test]
    fn end_to_end() {
        let (fs, bitmap, _) = fresh(512);
        let root = fs.open_root().unwrap();
        let used = bitmap.used_count();

        fs.mkdir("/a", &root).unwrap();
        fs.mkdir("/a/b", &root).unwrap();
        fs.create("/a/b/c.txt", 0, &root).unwrap();

        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let file = fs.open("/a/b/c.txt", &root).unwrap();
        assert_eq!(file.write_at(&data, 0), data.len());
        file.close();

        let held = fs.open("/a/b/c.txt", &root).unwrap();
        let mut back = alloc::vec![0; data.len()];
        assert_eq!(held.read_at(&mut back, 0), data.len());
        assert_eq!(back, data);

        fs.remove("/a/b", &root).unwrap();
        assert_eq!(fs.open("/a/b/c.txt", &root).unwrap_err(), Error::NotFound);
        assert_eq!(fs.open("/a/b", &root).unwrap_err(), Error::NotFound);

        back.fill(0);
        assert_eq!(held.read_at(&mut back, 0), data.len());
        assert_eq!(back, data);
        held.close();

        fs.remove("/a", &root).unwrap();
        // c.txt 本身没有被删除，它的扇区随目录一起失去引用
        let c_sectors = 1 + DiskInode::count_total_sectors(data.len());
        assert_eq!(bitmap.used_count(), used + c_sectors);
        assert_eq!(fs.volume().open_inodes(), 1);
    }

    #[test]
    fn shutdown_leaves_a_complete_image() {
        let (fs, bitmap, disk) = fresh(128);
        let root = fs.open_root().unwrap();
        fs.create("/f", 0, &root).unwrap();
        fs.open("/f", &root).unwrap().write_at(b"persisted", 100);
        drop(root);
        fs.shutdown();
        assert!(fs.volume().cache().is_empty());

        let remounted = FileSystem::mount(disk, bitmap).unwrap();
        let root = remounted.open_root().unwrap();
        let file = remounted.open("f", &root).unwrap();
        let mut buf = [0; 9];
        assert_eq!(file.read_at(&mut buf, 100), 9);
        assert_eq!(&buf, b"persisted");
    }
}
