#![allow(unused)]

use std::sync::Arc;

mod common;

use common::pattern;
use nanofs::*;

#[test]
fn disk_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fs.img");
    let volume = Volume::new(&path);
    volume.format("disk").unwrap();

    let raw = std::fs::read(&path).unwrap();
    assert_eq!(raw.len(), FS_SIZE);
    assert!(raw[..BLOCK_SIZE].iter().all(|&b| b == 0));
    assert_eq!(raw[SUPER_START * BLOCK_SIZE..][..4], MAGIC.to_le_bytes());
    // First free block links to its successor
    let head = DATA_START * BLOCK_SIZE;
    assert_eq!(u16::from_le_bytes([raw[head], raw[head + 1]]) as usize, DATA_START + 1);
    // The last one terminates the chain
    let tail = (BLOCK_COUNT - 1) * BLOCK_SIZE;
    assert_eq!(u16::from_le_bytes([raw[tail], raw[tail + 1]]) as usize, BLOCK_COUNT);
}

#[test]
fn disk_mount_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fs.img");
    let mut volume = Volume::new(&path);
    volume.format("disk").unwrap();
    volume.mount().unwrap();

    let data = pattern(1500);
    {
        let fs = volume.fs().unwrap();
        fs.mkdir("/etc").unwrap();
        let fd = fs.open("/etc/motd", Mode::ReadWrite).unwrap();
        assert_eq!(fs.write(fd, &data).unwrap(), data.len());
        fs.close(fd).unwrap();
        log!("File System mounted: {}", fs.dump());
    }
    volume.unmount().unwrap();

    let mut volume = Volume::new(&path);
    volume.mount().unwrap();
    let fs = volume.fs().unwrap();
    let fd = fs.open("/etc/motd", Mode::ReadOnly).unwrap();
    let mut buf = vec![0u8; 2000];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), data.len());
    assert_eq!(&buf[..data.len()], &data[..]);
    fs.close(fd).unwrap();
    fs.check().unwrap();
    volume.unmount().unwrap();
}

#[test]
fn volume_state_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut volume = Volume::new(dir.path().join("fs.img"));
    assert!(!volume.is_mounted());
    assert_eq!(volume.fs().map(|_| ()), Err(Error::NotMounted));
    assert_eq!(volume.unmount(), Err(Error::NotMounted));

    volume.format("state").unwrap();
    volume.mount().unwrap();
    assert_eq!(volume.mount(), Err(Error::AlreadyMounted));
    volume.unmount().unwrap();
    assert_eq!(volume.unmount(), Err(Error::NotMounted));
}

#[test]
fn mount_rejects_foreign_images() {
    let dir = tempfile::tempdir().unwrap();

    let short = dir.path().join("short.img");
    std::fs::write(&short, vec![0u8; FS_SIZE / 2]).unwrap();
    assert_eq!(Volume::new(&short).mount(), Err(Error::InvalidImage));

    let blank = dir.path().join("blank.img");
    std::fs::write(&blank, vec![0u8; FS_SIZE]).unwrap();
    assert_eq!(Volume::new(&blank).mount(), Err(Error::InvalidSuperBlock));
}

#[test]
fn disk_image_is_a_block_device() {
    let dir = tempfile::tempdir().unwrap();
    let image = Arc::new(DiskImage::create(dir.path().join("raw.img")).unwrap());
    let mut fs = FileSystem::format(Arc::clone(&image), "raw").unwrap();
    fs.mkdir("/x").unwrap();
    assert_eq!(fs.readdir("/").unwrap().len(), 1);
    fs.unmount().unwrap();
    assert!(FileSystem::mount(image).is_ok());
}
