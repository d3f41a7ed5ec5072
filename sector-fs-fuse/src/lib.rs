//! 在宿主机上读写 sector-fs 镜像

mod block_file;
pub mod free_map_file;

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;

use sector_fs::{Bitmap, FileSystem, SECTOR_SIZE};

pub use self::block_file::BlockFile;

/// 打开的镜像：文件系统与它的空闲位图
pub struct Image {
    fs: FileSystem,
    bitmap: Arc<Bitmap>,
}

impl Image {
    /// 新建 `sectors` 个扇区的镜像并格式化，已存在的文件会被截断
    pub fn create(path: &Path, sectors: usize) -> io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fd.set_len((sectors * SECTOR_SIZE) as u64)?;

        let bitmap = Arc::new(Bitmap::new(sectors));
        let fs = FileSystem::format(Arc::new(BlockFile::new(fd)), bitmap.clone())
            .map_err(io::Error::other)?;
        free_map_file::create(&fs, &bitmap).map_err(io::Error::other)?;
        log::info!("created {path:?}: {sectors} sectors");

        Ok(Self { fs, bitmap })
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        let block_file = Arc::new(BlockFile::new(fd));
        let sectors = block_file.sectors()?;

        // 先挂载，再用镜像里的位图覆盖这个临时的位图
        let bitmap = Arc::new(Bitmap::new(sectors));
        let fs = FileSystem::mount(block_file, bitmap.clone()).map_err(io::Error::other)?;
        free_map_file::load(&fs, &bitmap).map_err(io::Error::other)?;

        Ok(Self { fs, bitmap })
    }

    #[inline]
    pub fn fs(&self) -> &FileSystem {
        &self.fs
    }

    #[inline]
    pub fn bitmap(&self) -> &Arc<Bitmap> {
        &self.bitmap
    }

    /// 保存位图并把缓存全部写回镜像
    pub fn close(self) -> io::Result<()> {
        free_map_file::save(&self.fs, &self.bitmap).map_err(io::Error::other)?;
        self.fs.shutdown();
        Ok(())
    }
}
