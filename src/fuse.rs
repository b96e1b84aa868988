//! Kernel-facing adapter. Translates `fuser` callbacks into calls on a mounted
//! [`Volume`]. FUSE inode numbers are inumbers; the root is 1 on both sides.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType as FuseFileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;

use crate::config::*;
use crate::disk_image::DiskImage;
use crate::error::{FsError, Result};
use crate::file::FileHandle;
use crate::fs::FileSystem;
use crate::structs::{FileType, Inode, Inumber, Mode};
use crate::volume::Volume;

const TTL: Duration = Duration::from_secs(1);

pub struct FuseAdapter {
    volume: Volume,
    paths: HashMap<u64, String>,
    uid: u32,
    gid: u32,
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn kind_of(inode: &Inode) -> FuseFileType {
    match inode.ftype {
        FileType::Directory => FuseFileType::Directory,
        FileType::File => FuseFileType::RegularFile,
    }
}

/// Requested access mode from `open(2)` flags.
fn access_mode(flags: i32) -> Mode {
    if flags & libc::O_ACCMODE == libc::O_RDONLY {
        Mode::ReadOnly
    } else {
        Mode::ReadWrite
    }
}

/// Mode for a newly created file, from its permission bits.
fn creation_mode(perm: u32) -> Mode {
    if perm & 0o222 == 0 {
        Mode::ReadOnly
    } else {
        Mode::ReadWrite
    }
}

impl FuseAdapter {
    /// `uid`/`gid` own every file, typically the mounting user.
    pub fn new(volume: Volume, uid: u32, gid: u32) -> Self {
        let mut paths = HashMap::new();
        paths.insert(Inumber::ROOT.get() as u64, "/".to_string());
        Self { volume, paths, uid, gid }
    }

    fn fs(&mut self) -> Result<&mut FileSystem<DiskImage>> {
        self.volume.fs()
    }

    fn path_of(&self, ino: u64) -> Result<String> {
        self.paths.get(&ino).cloned().ok_or(FsError::NotFound)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String> {
        let name = name.to_str().ok_or(FsError::InvalidFileName)?;
        Ok(join(&self.path_of(parent)?, name))
    }

    fn attr(&self, inode: &Inode) -> FileAttr {
        let time = UNIX_EPOCH + Duration::from_secs(inode.created);
        let (size, perm, nlink) = match (inode.ftype, inode.mode) {
            (FileType::Directory, _) => (0, 0o755, 2),
            (FileType::File, Mode::ReadWrite) => (inode.size as u64, 0o644, 1),
            (FileType::File, Mode::ReadOnly) => (inode.size as u64, 0o444, 1),
        };
        FileAttr {
            ino: inode.inumber.get() as u64,
            size,
            blocks: inode.block_count() as u64,
            atime: time,
            mtime: time,
            ctime: time,
            crtime: time,
            kind: kind_of(inode),
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    /// Resolves `path` and remembers it under the resulting inode number.
    fn entry(&mut self, path: String) -> Result<FileAttr> {
        let inode = self.fs()?.get_attributes(&path)?;
        let attr = self.attr(&inode);
        self.paths.insert(attr.ino, path);
        Ok(attr)
    }

    fn getattr_of(&mut self, ino: u64) -> Result<FileAttr> {
        let inumber = u8::try_from(ino).ok().and_then(Inumber::new).ok_or(FsError::NotFound)?;
        let inode = self.fs()?.get_inode(inumber)?;
        Ok(self.attr(&inode))
    }

    /// Creates a regular file and returns it with an open handle.
    fn create_file(&mut self, parent: u64, name: &OsStr, perm: u32) -> Result<(FileAttr, FileHandle)> {
        let path = self.child_path(parent, name)?;
        let mode = creation_mode(perm);
        let fs = self.fs()?;
        if fs.get_attributes(&path).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        let handle = fs.open(&path, mode)?;
        let attr = self.entry(path)?;
        Ok((attr, handle))
    }

    fn read_at(&mut self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>> {
        let handle = FileHandle::from_raw(fh);
        let offset = u32::try_from(offset).map_err(|_| FsError::InvalidArgument)?;
        let fs = self.fs()?;
        match fs.seek(handle, offset) {
            Ok(()) => {}
            // Reads past the end see end of file
            Err(FsError::InvalidArgument) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        let mut buf = vec![0u8; size as usize];
        let n = fs.read(handle, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write_at(&mut self, fh: u64, offset: i64, data: &[u8]) -> Result<usize> {
        let handle = FileHandle::from_raw(fh);
        let offset = u32::try_from(offset).map_err(|_| FsError::InvalidArgument)?;
        let fs = self.fs()?;
        fs.seek(handle, offset)?;
        fs.write(handle, data)
    }

    fn list(&mut self, ino: u64) -> Result<Vec<(u64, FuseFileType, String)>> {
        let path = self.path_of(ino)?;
        let (parent, _) = crate::path::split(&path);
        let parent_ino = if path == "/" {
            ino
        } else {
            self.fs()?.get_attributes(parent)?.inumber.get() as u64
        };

        let fs = self.fs()?;
        let mut out = vec![
            (ino, FuseFileType::Directory, ".".to_string()),
            (parent_ino, FuseFileType::Directory, "..".to_string()),
        ];
        for entry in fs.readdir(&path)? {
            let child = fs.get_inode(entry.inumber())?;
            out.push((entry.inumber().get() as u64, kind_of(&child), entry.name().to_string()));
        }
        for (child_ino, _, name) in out.iter().skip(2) {
            self.paths.insert(*child_ino, join(&path, name));
        }
        Ok(out)
    }
}

impl Filesystem for FuseAdapter {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> core::result::Result<(), c_int> {
        self.volume.mount().map_err(|e| {
            log::error!("mount of {} failed: {}", self.volume.image().display(), e);
            e.errno()
        })
    }

    fn destroy(&mut self) {
        if let Err(e) = self.volume.unmount() {
            log::error!("unmount failed: {}", e);
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.child_path(parent, name).and_then(|path| self.entry(path)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.getattr_of(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    // Attributes are fixed and truncation is unsupported, so the current
    // attributes are acknowledged unchanged.
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        match self.getattr_of(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        if mode & libc::S_IFMT as u32 != libc::S_IFREG as u32 {
            reply.error(libc::EPERM);
            return;
        }
        let result = self
            .create_file(parent, name, mode)
            .and_then(|(attr, handle)| self.fs()?.close(handle).map(|_| attr));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        let result = self.child_path(parent, name).and_then(|path| {
            self.fs()?.mkdir(&path)?;
            self.entry(path)
        });
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_path(parent, name).and_then(|path| {
            let ino = self.fs()?.get_attributes(&path)?.inumber.get() as u64;
            self.fs()?.rm(&path)?;
            self.paths.remove(&ino);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_path(parent, name).and_then(|path| {
            let ino = self.fs()?.get_attributes(&path)?.inumber.get() as u64;
            self.fs()?.rmdir(&path)?;
            self.paths.remove(&ino);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let result = self.path_of(ino).and_then(|path| self.fs()?.open(&path, access_mode(flags)));
        match result {
            Ok(handle) => reply.opened(handle.raw(), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.read_at(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.write_at(fh, offset, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs().and_then(|fs| fs.close(FileHandle::from_raw(fh))) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.getattr_of(ino) {
            Ok(attr) if attr.kind == FuseFileType::Directory => reply.opened(0, 0),
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let entries = match self.list(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        for (i, (child, kind, name)) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            // A full buffer ends this batch; the kernel asks again from the last offset
            if reply.add(*child, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.fs() {
            Ok(fs) => {
                let st = fs.statfs();
                reply.statfs(
                    st.blocks,
                    st.blocks_free,
                    st.blocks_free,
                    st.inodes,
                    st.inodes_free,
                    st.block_size,
                    st.name_max,
                    st.block_size,
                );
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        match self.create_file(parent, name, mode) {
            Ok((attr, handle)) => reply.created(&TTL, &attr, 0, handle.raw(), 0),
            Err(e) => reply.error(e.errno()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_modes() {
        assert_eq!(access_mode(libc::O_RDONLY), Mode::ReadOnly);
        assert_eq!(access_mode(libc::O_WRONLY), Mode::ReadWrite);
        assert_eq!(access_mode(libc::O_RDWR | libc::O_APPEND), Mode::ReadWrite);
        assert_eq!(creation_mode(0o644), Mode::ReadWrite);
        assert_eq!(creation_mode(0o444), Mode::ReadOnly);
    }

    #[test]
    fn test_attr_shape() {
        let adapter = FuseAdapter::new(Volume::new("unused.img"), 1000, 1000);
        let mut file = Inode::new(Inumber::new(3).unwrap(), FileType::File, Mode::ReadWrite);
        file.size = 130;
        let attr = adapter.attr(&file);
        assert_eq!(attr.ino, 3);
        assert_eq!(attr.size, 130);
        assert_eq!(attr.blocks, 3);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.uid, 1000);

        let mut dir = Inode::new(Inumber::ROOT, FileType::Directory, Mode::ReadWrite);
        dir.size = 4;
        let attr = adapter.attr(&dir);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.kind, FuseFileType::Directory);
    }
}
