use alloc::vec::Vec;

use crate::inode::{Inode, Stat};
use crate::SECTOR_SIZE;

/// 进程打开的文件：inode 加上**文件**内的偏移量。
///
/// 禁止写入由句柄记录，句柄析构时自动解除。
#[derive(Debug)]
pub struct File {
    inode: Inode,
    pos: usize,
    deny_write: bool,
}

impl File {
    #[inline]
    pub fn new(inode: Inode) -> Self {
        Self {
            inode,
            pos: 0,
            deny_write: false,
        }
    }

    /// 同一个 inode 的新句柄，偏移量归零，不继承写禁止
    #[inline]
    pub fn reopen(&self) -> Self {
        Self::new(self.inode.reopen())
    }

    #[inline]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// 从当前位置读，位置随之前进
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let read_size = self.inode.read_at(buf, self.pos);
        self.pos += read_size;
        read_size
    }

    /// 从当前位置写，位置随之前进；写被禁止或空间不足时返回 0
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let write_size = self.inode.write_at(buf, self.pos);
        self.pos += write_size;
        write_size
    }

    pub fn read_all(&mut self) -> Vec<u8> {
        let mut buffer = [0u8; SECTOR_SIZE];

        let mut bytes = Vec::new();
        loop {
            let len = self.read(&mut buffer);
            if len == 0 {
                break;
            }
            bytes.extend_from_slice(&buffer[..len]);
        }
        bytes
    }

    /// 位置可以越过文件末尾，之后的写入会扩展文件
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.inode.length()
    }

    #[inline]
    pub fn stat(&self) -> Stat {
        self.inode.stat()
    }

    /// 禁止所有打开者写入，重复调用无效
    pub fn deny_write(&mut self) {
        if !self.deny_write {
            self.deny_write = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&mut self) {
        if self.deny_write {
            self.deny_write = false;
            self.inode.allow_write();
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.allow_write();
    }
}
