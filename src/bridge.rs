//! Callback binding: the thin seam between `fuser`'s inode-keyed
//! `Filesystem` trait and this crate's path-keyed operation engine.
//!
//! `fuser` identifies files by inode number; the operation engine below
//! identifies them by path. The inode/path table here is the adapter
//! between the two: it keeps just enough state (an `inode -> path` map
//! populated as the kernel looks entries up) to translate each incoming
//! call into the matching path-based engine call, and owns no state the
//! engine doesn't already track on disk.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyWrite, Request, TimeOrNow,
};
use log::{debug, warn};

use crate::error::SfsError;
use crate::ops::{Attr, Engine, Kind};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

pub struct SfsFuse {
    engine: Engine,
    paths: HashMap<u64, String>,
    idents: HashMap<String, u64>,
    next_ino: u64,
}

impl SfsFuse {
    pub fn new(engine: Engine) -> Self {
        let mut paths = HashMap::new();
        let mut idents = HashMap::new();
        paths.insert(ROOT_INO, "/".to_string());
        idents.insert("/".to_string(), ROOT_INO);
        Self {
            engine,
            paths,
            idents,
            next_ino: ROOT_INO + 1,
        }
    }

    fn path_of(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    fn ino_for(&mut self, path: String) -> u64 {
        if let Some(&ino) = self.idents.get(&path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.idents.insert(path.clone(), ino);
        self.paths.insert(ino, path);
        ino
    }

    fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.idents.remove(path) {
            self.paths.remove(&ino);
        }
    }

    fn file_attr(ino: u64, attr: Attr, req: &Request) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino,
            size: attr.size,
            blocks: (attr.size + 1007) / 1008,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: match attr.kind {
                Kind::Directory => FileType::Directory,
                Kind::File => FileType::RegularFile,
            },
            perm: attr.mode,
            nlink: attr.nlink,
            uid: req.uid(),
            gid: req.gid(),
            rdev: 0,
            blksize: 1008,
            flags: 0,
        }
    }
}

fn child_path(parent: &str, name: &OsStr) -> Option<String> {
    let name = name.to_str()?;
    Some(if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    })
}

impl Filesystem for SfsFuse {
    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup {name:?} in inode {parent}");
        let Some(parent_path) = self.path_of(parent).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        let Some(path) = child_path(&parent_path, name) else {
            reply.error(SfsError::InvalidArgument.errno());
            return;
        };
        match self.engine.getattr(&path) {
            Ok(attr) => {
                let ino = self.ino_for(path);
                reply.entry(&TTL, &Self::file_attr(ino, attr, req), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        debug!("getattr {path}");
        match self.engine.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &Self::file_attr(ino, attr, req)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.path_of(ino).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        debug!("readdir {path}");
        let names = match self.engine.readdir(&path) {
            Ok(names) => names,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        for (i, name) in names.iter().enumerate().skip(offset as usize) {
            let child = match name.as_str() {
                "." => path.clone(),
                ".." => path.clone(),
                leaf => child_path(&path, OsStr::new(leaf)).unwrap_or_else(|| path.clone()),
            };
            let kind = match self.engine.getattr(&child) {
                Ok(attr) => match attr.kind {
                    Kind::Directory => FileType::Directory,
                    Kind::File => FileType::RegularFile,
                },
                Err(_) => FileType::RegularFile,
            };
            let child_ino = self.ino_for(child);
            if reply.add(child_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        debug!("read {path} size={size} offset={offset}");
        let mut buf = vec![0u8; size as usize];
        match self.engine.read(&path, &mut buf, offset as u64) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        debug!("write {path} size={} offset={offset}", data.len());
        match self.engine.write(&path, data, offset as u64) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_path) = self.path_of(parent).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        let Some(path) = child_path(&parent_path, name) else {
            reply.error(SfsError::InvalidArgument.errno());
            return;
        };
        debug!("create {path} mode={mode:o}");
        match self.engine.create(&path, mode) {
            Ok(()) => {
                let attr = self.engine.getattr(&path).expect("just created");
                let ino = self.ino_for(path);
                reply.created(&TTL, &Self::file_attr(ino, attr, req), 0, 0, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_of(parent).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        let Some(path) = child_path(&parent_path, name) else {
            reply.error(SfsError::InvalidArgument.errno());
            return;
        };
        debug!("mkdir {path} mode={mode:o}");
        match self.engine.mkdir(&path, mode) {
            Ok(()) => {
                let attr = self.engine.getattr(&path).expect("just created");
                let ino = self.ino_for(path);
                reply.entry(&TTL, &Self::file_attr(ino, attr, req), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        let Some(path) = child_path(&parent_path, name) else {
            reply.error(SfsError::InvalidArgument.errno());
            return;
        };
        debug!("rmdir {path}");
        match self.engine.rmdir(&path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        let Some(path) = child_path(&parent_path, name) else {
            reply.error(SfsError::InvalidArgument.errno());
            return;
        };
        debug!("unlink {path}");
        match self.engine.unlink(&path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(parent_path), Some(new_parent_path)) = (
            self.path_of(parent).map(str::to_string),
            self.path_of(newparent).map(str::to_string),
        ) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        let (Some(old_path), Some(new_path)) = (
            child_path(&parent_path, name),
            child_path(&new_parent_path, newname),
        ) else {
            reply.error(SfsError::InvalidArgument.errno());
            return;
        };
        debug!("rename {old_path} {new_path}");
        match self.engine.rename(&old_path, &new_path) {
            Ok(()) => {
                self.forget_path(&old_path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
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
        let Some(path) = self.path_of(ino).map(str::to_string) else {
            reply.error(SfsError::NotFound.errno());
            return;
        };
        if let Some(new_size) = size {
            debug!("truncate {path} size={new_size}");
            if let Err(e) = self.engine.truncate(&path, new_size) {
                reply.error(e.errno());
                return;
            }
        }
        match self.engine.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &Self::file_attr(ino, attr, req)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request, _ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        reply.opened(0, 0);
    }

    fn opendir(&mut self, _req: &Request, _ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        reply.opened(0, 0);
    }

    fn init(
        &mut self,
        _req: &Request,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        debug!("sfs mounted");
        Ok(())
    }

    fn destroy(&mut self) {
        warn!("sfs unmounted");
    }
}
