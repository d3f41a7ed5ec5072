use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use block_dev::BlockDevice;
use sector_fs::SECTOR_SIZE;

/// 以宿主机上的镜像文件作为块设备
#[derive(Debug)]
pub struct BlockFile {
    inner: Mutex<File>,
}

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self {
            inner: Mutex::new(fd),
        }
    }

    /// 镜像能容纳的扇区数
    pub fn sectors(&self) -> std::io::Result<usize> {
        let len = self.inner.lock().unwrap().metadata()?.len();
        Ok(len as usize / SECTOR_SIZE)
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.inner.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf)
            .unwrap_or_else(|err| panic!("not a complete sector {block_id}: {err}"));
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.inner.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        file.write_all(buf)
            .unwrap_or_else(|err| panic!("not a complete sector {block_id}: {err}"));
    }
}
