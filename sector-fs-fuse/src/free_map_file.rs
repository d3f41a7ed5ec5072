//! 空闲位图作为普通文件存放在镜像里，inode 位于 [`FREE_MAP_SECTOR`]。
//!
//! 文件在格式化时就按最终大小创建，之后的保存只覆盖内容，不再申请扇区。

use sector_fs::{Bitmap, Error, FREE_MAP_SECTOR, FileSystem, InodeKind, Result};

/// 创建位图文件并写入当前位图
pub fn create(fs: &FileSystem, bitmap: &Bitmap) -> Result<()> {
    let length = Bitmap::byte_len(bitmap.capacity());
    fs.volume()
        .create_inode(FREE_MAP_SECTOR, length, InodeKind::File)?;
    log::debug!("free map file: {length} bytes for {} sectors", bitmap.capacity());
    save(fs, bitmap)
}

pub fn save(fs: &FileSystem, bitmap: &Bitmap) -> Result<()> {
    let inode = fs.volume().open_inode(FREE_MAP_SECTOR)?;
    let bytes = bitmap.to_bytes();
    if inode.write_at(&bytes, 0) != bytes.len() {
        return Err(Error::NoSpace);
    }
    Ok(())
}

/// 用镜像中的位图文件覆盖内存中的位图
pub fn load(fs: &FileSystem, bitmap: &Bitmap) -> Result<()> {
    let inode = fs.volume().open_inode(FREE_MAP_SECTOR)?;
    let mut bytes = vec![0; inode.length()];
    let complete = inode.read_at(&mut bytes, 0) == bytes.len();
    if !complete || bytes.len() < Bitmap::byte_len(bitmap.capacity()) {
        log::error!("free map file is shorter than the image");
        return Err(Error::Corrupted);
    }
    bitmap.load(&bytes);
    log::debug!(
        "free map loaded: {} of {} sectors used",
        bitmap.used_count(),
        bitmap.capacity()
    );
    Ok(())
}
