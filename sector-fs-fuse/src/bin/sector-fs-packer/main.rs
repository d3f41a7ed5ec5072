mod cli;

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use clap::Parser;
use cli::{Cli, Command};
use sector_fs::{Directory, File, FileSystem};
use sector_fs_fuse::Image;

fn main() -> io::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Pack {
            source,
            out,
            sectors,
        } => {
            println!("source={source:?}\nout={out:?}");
            let image = Image::create(&out, sectors)?;
            let root = image.fs().open_root().map_err(io::Error::other)?;
            pack_dir(image.fs(), &source, "", &root)?;
            drop(root);

            println!(
                "{} of {sectors} sectors used",
                image.bitmap().used_count()
            );
            image.close()
        }
        Command::Ls { image, path } => {
            let image = Image::open(&image)?;
            let root = image.fs().open_root().map_err(io::Error::other)?;
            let inode = image.fs().open(&path, &root).map_err(io::Error::other)?;

            if inode.is_dir() {
                let dir = Directory::open(inode).map_err(io::Error::other)?;
                for name in dir {
                    println!("{name}");
                }
            } else {
                let stat = inode.stat();
                println!("{path}: {} bytes, {} sectors", stat.size, stat.blocks);
            }
            Ok(())
        }
        Command::Cat { image, path } => {
            let image = Image::open(&image)?;
            let root = image.fs().open_root().map_err(io::Error::other)?;
            let inode = image.fs().open(&path, &root).map_err(io::Error::other)?;
            if inode.is_dir() {
                return Err(io::Error::other(sector_fs::Error::IsADirectory));
            }

            let data = File::new(inode).read_all();
            io::stdout().write_all(&data)
        }
    }
}

/// 把宿主机目录 `host` 的内容复制到镜像的 `prefix` 目录下
fn pack_dir(fs: &FileSystem, host: &Path, prefix: &str, root: &Directory) -> io::Result<()> {
    for entry in fs::read_dir(host)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            log::warn!("skipping non-UTF-8 name {name:?}");
            continue;
        };
        let path = format!("{prefix}/{name}");

        if entry.file_type()?.is_dir() {
            log::info!("dir={path:?}");
            fs.mkdir(&path, root).map_err(io::Error::other)?;
            pack_dir(fs, &entry.path(), &path, root)?;
            continue;
        }

        let data = fs::read(entry.path())?;
        log::info!("file={path:?}, {} bytes", data.len());
        fs.create(&path, 0, root).map_err(io::Error::other)?;

        let inode = fs.open(&path, root).map_err(io::Error::other)?;
        if inode.write_at(&data, 0) != data.len() {
            return Err(io::Error::other(sector_fs::Error::NoSpace));
        }
    }

    Ok(())
}
