// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! memfs FUSE adapter
//!
//! Maps kernel inode-based requests onto the path-based engine. Kernel inode
//! numbers are the engine's own inode numbers; the adapter remembers every
//! path it has seen for an inode so later requests can be turned back into
//! paths.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use fuser::{
    FUSE_ROOT_ID, FileAttr, FileType, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite,
    ReplyXattr, Request, TimeOrNow,
};
use libc::{EINVAL, ENOENT, c_int};
use memfs_core::{
    Context, FsConfig, FsCore, FsError, FsResult, HandleId, Stat, Timespec, PERM_MASK, ROOT_INO,
    S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFSOCK,
};
use std::collections::{BTreeSet, HashMap};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const NO_HANDLE: HandleId = HandleId::INVALID;

fn errno(err: FsError) -> c_int {
    err.errno()
}

fn file_type(mode: u32) -> FileType {
    match mode & S_IFMT {
        S_IFDIR => FileType::Directory,
        S_IFLNK => FileType::Symlink,
        S_IFCHR => FileType::CharDevice,
        S_IFBLK => FileType::BlockDevice,
        S_IFIFO => FileType::NamedPipe,
        S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn file_attr(stat: &Stat) -> FileAttr {
    FileAttr {
        ino: stat.ino,
        size: stat.size,
        blocks: stat.blocks(),
        atime: stat.atime.to_system_time(),
        mtime: stat.mtime.to_system_time(),
        ctime: stat.ctime.to_system_time(),
        crtime: stat.birthtime.to_system_time(),
        kind: file_type(stat.mode),
        perm: (stat.mode & PERM_MASK) as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: u32::try_from(stat.rdev).unwrap_or(u32::MAX),
        blksize: 512,
        flags: stat.flags,
    }
}

fn timespec(time: TimeOrNow) -> Timespec {
    match time {
        TimeOrNow::SpecificTime(t) => Timespec::from(t),
        TimeOrNow::Now => Timespec::now(),
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Reply to an xattr request under the kernel's size-probe protocol.
#[derive(Debug, PartialEq, Eq)]
enum XattrReply<'a> {
    /// `size == 0`: the caller only wants the length.
    Size(u32),
    Data(&'a [u8]),
    Range,
}

fn xattr_reply(value: &[u8], size: u32) -> XattrReply<'_> {
    if size == 0 {
        XattrReply::Size(u32::try_from(value.len()).unwrap_or(u32::MAX))
    } else if value.len() <= size as usize {
        XattrReply::Data(value)
    } else {
        XattrReply::Range
    }
}

fn send_xattr(reply: ReplyXattr, value: &[u8], size: u32) {
    match xattr_reply(value, size) {
        XattrReply::Size(len) => reply.size(len),
        XattrReply::Data(data) => reply.data(data),
        XattrReply::Range => reply.error(libc::ERANGE),
    }
}

/// One entry of a directory listing as handed to the kernel.
#[derive(Clone, Debug)]
struct DirEntry {
    name: String,
    stat: Stat,
}

/// Attribute changes carried by a single setattr request.
#[derive(Debug, Default)]
struct AttrChanges {
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    atime: Option<Timespec>,
    mtime: Option<Timespec>,
    crtime: Option<Timespec>,
    chgtime: Option<Timespec>,
    flags: Option<u32>,
}

pub struct MemFsFuse {
    core: Arc<FsCore>,
    attr_ttl: Duration,
    entry_ttl: Duration,
    readdir_plus: bool,
    /// Every known path of each inode; hard links give an inode several.
    paths: HashMap<u64, BTreeSet<String>>,
}

impl MemFsFuse {
    pub fn new(config: FsConfig) -> FsResult<Self> {
        let attr_ttl = Duration::from_millis(u64::from(config.cache.attr_ttl_ms));
        let entry_ttl = Duration::from_millis(u64::from(config.cache.entry_ttl_ms));
        let readdir_plus = config.cache.enable_readdir_plus;
        let core = Arc::new(FsCore::new(config)?);

        let mut paths = HashMap::new();
        paths.insert(ROOT_INO, BTreeSet::from(["/".to_string()]));

        Ok(Self {
            core,
            attr_ttl,
            entry_ttl,
            readdir_plus,
            paths,
        })
    }

    fn context(req: &Request<'_>) -> Context {
        Context::new(req.uid(), req.gid(), req.pid())
    }

    fn path_of(&self, ino: u64) -> Result<&str, c_int> {
        self.paths
            .get(&ino)
            .and_then(|set| set.first())
            .map(String::as_str)
            .ok_or(ENOENT)
    }

    /// Path for handle-based calls; the engine ignores it when the handle is valid.
    fn path_or_empty(&self, ino: u64) -> String {
        self.path_of(ino).unwrap_or_default().to_string()
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        let name = name.to_str().ok_or(EINVAL)?;
        Ok(join(self.path_of(parent)?, name))
    }

    fn remember(&mut self, ino: u64, path: String) {
        self.paths.entry(ino).or_default().insert(path);
    }

    /// Drop `path` and everything below it from the inode map.
    fn forget_path(&mut self, path: &str) {
        let prefix = join(path, "");
        self.paths.retain(|_, set| {
            set.retain(|p| p != path && !p.starts_with(&prefix));
            !set.is_empty()
        });
    }

    /// Re-home `old` and everything below it under `new`.
    fn move_paths(&mut self, old: &str, new: &str) {
        let prefix = join(old, "");
        for set in self.paths.values_mut() {
            let moved: Vec<String> = set
                .iter()
                .filter(|p| p.as_str() == old || p.starts_with(&prefix))
                .cloned()
                .collect();
            for path in moved {
                set.remove(&path);
                set.insert(format!("{new}{}", &path[old.len()..]));
            }
        }
    }

    fn stat_path(&mut self, ctx: &Context, path: String) -> Result<Stat, c_int> {
        let stat = self.core.getattr(ctx, &path, NO_HANDLE).map_err(errno)?;
        self.remember(stat.ino, path);
        Ok(stat)
    }

    fn do_lookup(&mut self, ctx: &Context, parent: u64, name: &OsStr) -> Result<Stat, c_int> {
        let path = self.child_path(parent, name)?;
        self.stat_path(ctx, path)
    }

    fn do_getattr(&self, ctx: &Context, ino: u64, fh: Option<u64>) -> Result<Stat, c_int> {
        match fh {
            Some(fh) => self
                .core
                .getattr(ctx, "", HandleId(fh))
                .map_err(errno),
            None => self.core.getattr(ctx, self.path_of(ino)?, NO_HANDLE).map_err(errno),
        }
    }

    fn do_setattr(
        &self,
        ctx: &Context,
        ino: u64,
        fh: Option<u64>,
        changes: AttrChanges,
    ) -> Result<Stat, c_int> {
        let fh = fh.map_or(NO_HANDLE, HandleId);
        if let Some(size) = changes.size {
            let path = self.path_or_empty(ino);
            self.core.truncate(ctx, &path, size, fh).map_err(errno)?;
        }

        let path = self.path_of(ino)?;
        if let Some(mode) = changes.mode {
            self.core.chmod(ctx, path, mode).map_err(errno)?;
        }
        if changes.uid.is_some() || changes.gid.is_some() {
            let uid = changes.uid.unwrap_or(u32::MAX);
            let gid = changes.gid.unwrap_or(u32::MAX);
            self.core.chown(ctx, path, uid, gid).map_err(errno)?;
        }
        if changes.atime.is_some() || changes.mtime.is_some() {
            let current = self.core.getattr(ctx, path, NO_HANDLE).map_err(errno)?;
            let times = [
                changes.atime.unwrap_or(current.atime),
                changes.mtime.unwrap_or(current.mtime),
            ];
            self.core.utimens(ctx, path, Some(times)).map_err(errno)?;
        }
        if let Some(crtime) = changes.crtime {
            self.core.setcrtime(ctx, path, crtime).map_err(errno)?;
        }
        if let Some(flags) = changes.flags {
            self.core.chflags(ctx, path, flags).map_err(errno)?;
        }
        // Applied last so the other changes cannot overwrite it.
        if let Some(chgtime) = changes.chgtime {
            self.core.setchgtime(ctx, path, chgtime).map_err(errno)?;
        }
        self.core.getattr(ctx, path, NO_HANDLE).map_err(errno)
    }

    fn do_mknod(
        &mut self,
        ctx: &Context,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
    ) -> Result<Stat, c_int> {
        let path = self.child_path(parent, name)?;
        let mode = mode & !(umask & PERM_MASK);
        self.core.mknod(ctx, &path, mode, u64::from(rdev)).map_err(errno)?;
        self.stat_path(ctx, path)
    }

    fn do_mkdir(
        &mut self,
        ctx: &Context,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
    ) -> Result<Stat, c_int> {
        let path = self.child_path(parent, name)?;
        self.core.mkdir(ctx, &path, mode & !umask).map_err(errno)?;
        self.stat_path(ctx, path)
    }

    fn do_symlink(
        &mut self,
        ctx: &Context,
        parent: u64,
        name: &OsStr,
        target: &Path,
    ) -> Result<Stat, c_int> {
        let path = self.child_path(parent, name)?;
        let target = target.to_str().ok_or(EINVAL)?;
        self.core.symlink(ctx, target, &path).map_err(errno)?;
        self.stat_path(ctx, path)
    }

    fn do_link(
        &mut self,
        ctx: &Context,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
    ) -> Result<Stat, c_int> {
        let old = self.path_of(ino)?.to_string();
        let new = self.child_path(newparent, newname)?;
        self.core.link(ctx, &old, &new).map_err(errno)?;
        self.stat_path(ctx, new)
    }

    fn do_remove(
        &mut self,
        ctx: &Context,
        parent: u64,
        name: &OsStr,
        dir: bool,
    ) -> Result<(), c_int> {
        let path = self.child_path(parent, name)?;
        if dir {
            self.core.rmdir(ctx, &path).map_err(errno)?;
        } else {
            self.core.unlink(ctx, &path).map_err(errno)?;
        }
        self.forget_path(&path);
        Ok(())
    }

    fn do_rename(
        &mut self,
        ctx: &Context,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
    ) -> Result<(), c_int> {
        let old = self.child_path(parent, name)?;
        let new = self.child_path(newparent, newname)?;
        let ino_at = |path: &str| self.core.getattr(ctx, path, NO_HANDLE).map(|s| s.ino).ok();
        // Renaming onto another link of the same node leaves both names in place.
        let same_node = ino_at(&old).is_some() && ino_at(&old) == ino_at(&new);
        self.core.rename(ctx, &old, &new).map_err(errno)?;
        if !same_node {
            self.forget_path(&new);
            self.move_paths(&old, &new);
        }
        Ok(())
    }

    fn do_create(
        &mut self,
        ctx: &Context,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
    ) -> Result<(Stat, u64), c_int> {
        let stat = self.do_mknod(ctx, parent, name, mode, umask, 0)?;
        let path = self.path_of(stat.ino)?;
        let fh = self.core.open(ctx, path, flags).map_err(errno)?;
        Ok((stat, fh.0))
    }

    fn do_read(
        &self,
        ctx: &Context,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
    ) -> Result<Vec<u8>, c_int> {
        let offset = u64::try_from(offset).map_err(|_| EINVAL)?;
        let mut buf = vec![0u8; size as usize];
        let path = self.path_or_empty(ino);
        let n = self
            .core
            .read(ctx, &path, &mut buf, offset, HandleId(fh))
            .map_err(errno)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn do_write(
        &self,
        ctx: &Context,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
    ) -> Result<u32, c_int> {
        let offset = u64::try_from(offset).map_err(|_| EINVAL)?;
        let path = self.path_or_empty(ino);
        let n = self
            .core
            .write(ctx, &path, data, offset, HandleId(fh))
            .map_err(errno)?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    /// Full listing of a directory, `.` and `..` first, each with its stat.
    fn list_dir(&mut self, ctx: &Context, ino: u64, fh: u64) -> Result<Vec<DirEntry>, c_int> {
        let dir_path = self.path_or_empty(ino);
        let mut entries = Vec::new();
        self.core
            .readdir(
                ctx,
                &dir_path,
                |name, stat, _| {
                    entries.push((name.to_string(), stat.copied()));
                    true
                },
                0,
                HandleId(fh),
            )
            .map_err(errno)?;

        let mut listing = Vec::with_capacity(entries.len());
        for (name, stat) in entries {
            let stat = match stat {
                Some(stat) => stat,
                // `..` comes without a stat; look the parent up by path.
                None if !dir_path.is_empty() => self
                    .core
                    .getattr(ctx, parent_of(&dir_path), NO_HANDLE)
                    .map_err(errno)?,
                None => continue,
            };
            if name != "." && name != ".." && !dir_path.is_empty() {
                self.remember(stat.ino, join(&dir_path, &name));
            }
            listing.push(DirEntry { name, stat });
        }
        Ok(listing)
    }

    fn do_setxattr(
        &self,
        ctx: &Context,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
    ) -> Result<(), c_int> {
        let name = name.to_str().ok_or(EINVAL)?;
        self.core
            .setxattr(ctx, self.path_of(ino)?, name, value, flags)
            .map_err(errno)
    }

    fn do_getxattr(&self, ctx: &Context, ino: u64, name: &OsStr) -> Result<Vec<u8>, c_int> {
        let name = name.to_str().ok_or(EINVAL)?;
        self.core.getxattr(ctx, self.path_of(ino)?, name).map_err(errno)
    }

    /// NUL-separated attribute names, as the kernel expects them.
    fn do_listxattr(&self, ctx: &Context, ino: u64) -> Result<Vec<u8>, c_int> {
        let mut names = Vec::new();
        self.core
            .listxattr(ctx, self.path_of(ino)?, |name| {
                names.extend_from_slice(name.as_bytes());
                names.push(0);
                true
            })
            .map_err(errno)?;
        Ok(names)
    }

    fn do_removexattr(&self, ctx: &Context, ino: u64, name: &OsStr) -> Result<(), c_int> {
        let name = name.to_str().ok_or(EINVAL)?;
        self.core.removexattr(ctx, self.path_of(ino)?, name).map_err(errno)
    }
}

impl fuser::Filesystem for MemFsFuse {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        if self.readdir_plus {
            if let Err(unsupported) = config.add_capabilities(fuser::consts::FUSE_DO_READDIRPLUS)
            {
                warn!(unsupported, "kernel does not support readdir-plus");
                self.readdir_plus = false;
            }
        }
        info!(
            attr_ttl_ms = self.attr_ttl.as_millis() as u64,
            entry_ttl_ms = self.entry_ttl.as_millis() as u64,
            readdir_plus = self.readdir_plus,
            "memfs FUSE adapter initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        let stats = self.core.stats();
        info!(
            nodes = stats.nodes,
            open_handles = stats.open_handles,
            payload_bytes = stats.payload_bytes,
            "memfs FUSE adapter destroyed"
        );
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.do_lookup(&Self::context(req), parent, name) {
            Ok(stat) => reply.entry(&self.entry_ttl, &file_attr(&stat), 0),
            Err(e) => reply.error(e),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        if ino != FUSE_ROOT_ID {
            self.paths.remove(&ino);
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        match self.do_getattr(&Self::context(req), ino, fh) {
            Ok(stat) => reply.attr(&self.attr_ttl, &file_attr(&stat)),
            Err(e) => reply.error(e),
        }
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        crtime: Option<SystemTime>,
        chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = AttrChanges {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(timespec),
            mtime: mtime.map(timespec),
            crtime: crtime.map(Timespec::from),
            chgtime: chgtime.map(Timespec::from),
            flags,
        };
        match self.do_setattr(&Self::context(req), ino, fh, changes) {
            Ok(stat) => reply.attr(&self.attr_ttl, &file_attr(&stat)),
            Err(e) => reply.error(e),
        }
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        let res = self
            .path_of(ino)
            .and_then(|path| self.core.readlink(&Self::context(req), path).map_err(errno));
        match res {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        match self.do_mknod(&Self::context(req), parent, name, mode, umask, rdev) {
            Ok(stat) => reply.entry(&self.entry_ttl, &file_attr(&stat), 0),
            Err(e) => reply.error(e),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        match self.do_mkdir(&Self::context(req), parent, name, mode, umask) {
            Ok(stat) => reply.entry(&self.entry_ttl, &file_attr(&stat), 0),
            Err(e) => reply.error(e),
        }
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.do_remove(&Self::context(req), parent, name, false) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.do_remove(&Self::context(req), parent, name, true) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        match self.do_symlink(&Self::context(req), parent, link_name, target) {
            Ok(stat) => reply.entry(&self.entry_ttl, &file_attr(&stat), 0),
            Err(e) => reply.error(e),
        }
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        // RENAME_NOREPLACE / RENAME_EXCHANGE have no engine counterpart.
        if flags != 0 {
            reply.error(EINVAL);
            return;
        }
        match self.do_rename(&Self::context(req), parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn link(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        match self.do_link(&Self::context(req), ino, newparent, newname) {
            Ok(stat) => reply.entry(&self.entry_ttl, &file_attr(&stat), 0),
            Err(e) => reply.error(e),
        }
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let res = self.path_of(ino).and_then(|path| {
            self.core.open(&Self::context(req), path, flags).map_err(errno)
        });
        match res {
            Ok(fh) => reply.opened(fh.0, 0),
            Err(e) => reply.error(e),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        match self.do_create(&Self::context(req), parent, name, mode, umask, flags) {
            Ok((stat, fh)) => reply.created(&self.entry_ttl, &file_attr(&stat), 0, fh, 0),
            Err(e) => reply.error(e),
        }
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.do_read(&Self::context(req), ino, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e),
        }
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.do_write(&Self::context(req), ino, fh, offset, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(e),
        }
    }

    fn release(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = self.path_or_empty(ino);
        match self.core.release(&Self::context(req), &path, HandleId(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let res = self
            .path_of(ino)
            .and_then(|path| self.core.opendir(&Self::context(req), path).map_err(errno));
        match res {
            Ok(fh) => reply.opened(fh.0, 0),
            Err(e) => reply.error(e),
        }
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let listing = match self.list_dir(&Self::context(req), ino, fh) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in listing.iter().enumerate().skip(skip) {
            let kind = file_type(entry.stat.mode);
            if reply.add(entry.stat.ino, (i + 1) as i64, kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn readdirplus(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectoryPlus,
    ) {
        let listing = match self.list_dir(&Self::context(req), ino, fh) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in listing.iter().enumerate().skip(skip) {
            let attr = file_attr(&entry.stat);
            if reply.add(entry.stat.ino, (i + 1) as i64, &entry.name, &self.entry_ttl, &attr, 0) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        let path = self.path_or_empty(ino);
        match self.core.releasedir(&Self::context(req), &path, HandleId(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn setxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
        reply: ReplyEmpty,
    ) {
        if position != 0 {
            debug!(ino, position, "positioned setxattr refused");
            reply.error(EINVAL);
            return;
        }
        match self.do_setxattr(&Self::context(req), ino, name, value, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn getxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        match self.do_getxattr(&Self::context(req), ino, name) {
            Ok(value) => send_xattr(reply, &value, size),
            Err(e) => reply.error(e),
        }
    }

    fn listxattr(&mut self, req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        match self.do_listxattr(&Self::context(req), ino) {
            Ok(names) => send_xattr(reply, &names, size),
            Err(e) => reply.error(e),
        }
    }

    fn removexattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.do_removexattr(&Self::context(req), ino, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }
}
