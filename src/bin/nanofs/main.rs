mod cli;

use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Builder;
use fuser::MountOption;
use log::{info, LevelFilter};
use nanofs::{DiskImage, FileSystem, FuseAdapter, Mode, Volume};

use cli::{Cli, Command};

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    Builder::new()
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{} {style}{}{style:#}] {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .init();
}

/// Mounts the image, runs `op` on it and unmounts again, whatever `op` returned.
fn with_fs<T>(
    image: &Path,
    op: impl FnOnce(&mut FileSystem<DiskImage>) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let mut volume = Volume::new(image);
    volume
        .mount()
        .with_context(|| format!("cannot mount {}", image.display()))?;
    let result = volume.fs().map_err(anyhow::Error::from).and_then(op);
    volume.unmount()?;
    result
}

fn put(fs: &mut FileSystem<DiskImage>, host_file: &Path, path: &str) -> anyhow::Result<()> {
    let data = std::fs::read(host_file).with_context(|| format!("cannot read {}", host_file.display()))?;
    let fd = fs.open(path, Mode::ReadWrite)?;
    let written = fs.write(fd, &data);
    fs.close(fd)?;
    let written = written?;
    if written < data.len() {
        bail!("{path}: only {written} of {} bytes fit", data.len());
    }
    info!("copied {} bytes to {}", written, path);
    Ok(())
}

fn cat(fs: &mut FileSystem<DiskImage>, path: &str) -> anyhow::Result<()> {
    let fd = fs.open(path, Mode::ReadOnly)?;
    let mut stdout = io::stdout().lock();
    let mut buf = [0u8; 512];
    let result = loop {
        match fs.read(fd, &mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => stdout.write_all(&buf[..n])?,
            Err(e) => break Err(e),
        }
    };
    fs.close(fd)?;
    Ok(result?)
}

fn ls(fs: &mut FileSystem<DiskImage>, path: &str) -> anyhow::Result<()> {
    for entry in fs.readdir(path)? {
        let inode = fs.get_inode(entry.inumber())?;
        let kind = if inode.is_dir() { 'd' } else { '-' };
        let mode = match inode.mode {
            Mode::ReadOnly => "r-",
            Mode::ReadWrite => "rw",
        };
        println!("{kind}{mode} {:>3} {:>5} {}", inode.inumber.get(), inode.size, entry.name());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG").is_err() {
        init_logger(cli.verbose);
    } else {
        env_logger::init();
    }

    match cli.command {
        Command::Format { image, name } => {
            Volume::new(&image)
                .format(&name)
                .with_context(|| format!("cannot format {}", image.display()))?;
            info!("formatted {}", image.display());
        }
        Command::Mount { image, mount_point, auto_unmount } => {
            if !mount_point.is_dir() {
                bail!("mount point {} is not a directory", mount_point.display());
            }
            let uid = unsafe { libc::getuid() };
            let gid = unsafe { libc::getgid() };
            let adapter = FuseAdapter::new(Volume::new(&image), uid, gid);

            let mut options = vec![MountOption::RW, MountOption::FSName("nanofs".to_string())];
            if auto_unmount {
                options.push(MountOption::AutoUnmount);
            }
            info!("serving {} at {}", image.display(), mount_point.display());
            fuser::mount2(adapter, &mount_point, &options)
                .with_context(|| format!("cannot mount at {}", mount_point.display()))?;
            info!("unmounted {}", mount_point.display());
        }
        Command::Ls { image, path } => with_fs(&image, |fs| ls(fs, &path))?,
        Command::Mkdir { image, path } => with_fs(&image, |fs| Ok(fs.mkdir(&path).map(|_| ())?))?,
        Command::Rmdir { image, path } => with_fs(&image, |fs| Ok(fs.rmdir(&path)?))?,
        Command::Rm { image, path } => with_fs(&image, |fs| Ok(fs.rm(&path)?))?,
        Command::Put { image, host_file, path } => with_fs(&image, |fs| put(fs, &host_file, &path))?,
        Command::Cat { image, path } => with_fs(&image, |fs| cat(fs, &path))?,
        Command::Stat { image } => with_fs(&image, |fs| {
            println!("{}", fs.dump());
            Ok(())
        })?,
        Command::Check { image } => with_fs(&image, |fs| {
            fs.check()?;
            println!("{}: clean", image.display());
            Ok(())
        })?,
    }
    Ok(())
}
