// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host binding hook surface
//!
//! FUSE bindings call into the filesystem through hooks that return plain
//! integers: zero or a byte count on success, a negated errno on failure.
//! [`HostBinding`] adapts an [`FsCore`] to that convention and supplies the
//! caller identity for every call from a [`ContextProvider`].

use crate::error::FsResult;
use crate::types::{Context, HandleId, Stat, Timespec};
use crate::vfs::FsCore;
use std::sync::Arc;

/// Identity of the caller behind the current upcall.
pub trait ContextProvider: Send + Sync {
    fn context(&self) -> Context;
}

impl<F> ContextProvider for F
where
    F: Fn() -> Context + Send + Sync,
{
    fn context(&self) -> Context {
        self()
    }
}

/// Every call is attributed to one fixed identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedContext(pub Context);

impl ContextProvider for FixedContext {
    fn context(&self) -> Context {
        self.0
    }
}

fn errc(res: FsResult<()>) -> i32 {
    match res {
        Ok(()) => 0,
        Err(e) => e.neg_errno(),
    }
}

fn count(res: FsResult<usize>) -> i32 {
    match res {
        // Hosts hand out buffers far below i32::MAX.
        Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
        Err(e) => e.neg_errno(),
    }
}

fn offset(ofst: i64) -> Option<u64> {
    u64::try_from(ofst).ok()
}

pub struct HostBinding {
    fs: Arc<FsCore>,
    context: Box<dyn ContextProvider>,
}

impl HostBinding {
    pub fn new(fs: Arc<FsCore>, context: impl ContextProvider + 'static) -> Self {
        Self {
            fs,
            context: Box::new(context),
        }
    }

    pub fn fs(&self) -> &Arc<FsCore> {
        &self.fs
    }

    /// Whether the host should advertise readdir-plus to the kernel.
    pub fn readdir_plus(&self) -> bool {
        self.fs.readdir_plus_enabled()
    }

    pub fn getattr(&self, path: &str, stat: &mut Stat, fh: u64) -> i32 {
        match self.fs.getattr(&self.context.context(), path, HandleId(fh)) {
            Ok(found) => {
                *stat = found;
                0
            }
            Err(e) => e.neg_errno(),
        }
    }

    pub fn mknod(&self, path: &str, mode: u32, dev: u64) -> i32 {
        errc(self.fs.mknod(&self.context.context(), path, mode, dev))
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> i32 {
        errc(self.fs.mkdir(&self.context.context(), path, mode))
    }

    pub fn unlink(&self, path: &str) -> i32 {
        errc(self.fs.unlink(&self.context.context(), path))
    }

    pub fn rmdir(&self, path: &str) -> i32 {
        errc(self.fs.rmdir(&self.context.context(), path))
    }

    pub fn link(&self, oldpath: &str, newpath: &str) -> i32 {
        errc(self.fs.link(&self.context.context(), oldpath, newpath))
    }

    pub fn symlink(&self, target: &str, newpath: &str) -> i32 {
        errc(self.fs.symlink(&self.context.context(), target, newpath))
    }

    pub fn rename(&self, oldpath: &str, newpath: &str) -> i32 {
        errc(self.fs.rename(&self.context.context(), oldpath, newpath))
    }

    pub fn readlink(&self, path: &str) -> (i32, String) {
        match self.fs.readlink(&self.context.context(), path) {
            Ok(target) => (0, target),
            Err(e) => (e.neg_errno(), String::new()),
        }
    }

    pub fn chmod(&self, path: &str, mode: u32) -> i32 {
        errc(self.fs.chmod(&self.context.context(), path, mode))
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> i32 {
        errc(self.fs.chown(&self.context.context(), path, uid, gid))
    }

    pub fn utimens(&self, path: &str, times: Option<[Timespec; 2]>) -> i32 {
        errc(self.fs.utimens(&self.context.context(), path, times))
    }

    pub fn chflags(&self, path: &str, flags: u32) -> i32 {
        errc(self.fs.chflags(&self.context.context(), path, flags))
    }

    pub fn setcrtime(&self, path: &str, tmsp: Timespec) -> i32 {
        errc(self.fs.setcrtime(&self.context.context(), path, tmsp))
    }

    pub fn setchgtime(&self, path: &str, tmsp: Timespec) -> i32 {
        errc(self.fs.setchgtime(&self.context.context(), path, tmsp))
    }

    pub fn truncate(&self, path: &str, size: i64, fh: u64) -> i32 {
        let Some(size) = offset(size) else {
            return -libc::EINVAL;
        };
        errc(self.fs.truncate(&self.context.context(), path, size, HandleId(fh)))
    }

    pub fn open(&self, path: &str, flags: i32) -> (i32, u64) {
        match self.fs.open(&self.context.context(), path, flags) {
            Ok(fh) => (0, fh.0),
            Err(e) => (e.neg_errno(), HandleId::INVALID.0),
        }
    }

    pub fn opendir(&self, path: &str) -> (i32, u64) {
        match self.fs.opendir(&self.context.context(), path) {
            Ok(fh) => (0, fh.0),
            Err(e) => (e.neg_errno(), HandleId::INVALID.0),
        }
    }

    pub fn release(&self, path: &str, fh: u64) -> i32 {
        errc(self.fs.release(&self.context.context(), path, HandleId(fh)))
    }

    pub fn releasedir(&self, path: &str, fh: u64) -> i32 {
        errc(self.fs.releasedir(&self.context.context(), path, HandleId(fh)))
    }

    pub fn read(&self, path: &str, buff: &mut [u8], ofst: i64, fh: u64) -> i32 {
        let Some(ofst) = offset(ofst) else {
            return -libc::EINVAL;
        };
        count(self.fs.read(&self.context.context(), path, buff, ofst, HandleId(fh)))
    }

    pub fn write(&self, path: &str, buff: &[u8], ofst: i64, fh: u64) -> i32 {
        let Some(ofst) = offset(ofst) else {
            return -libc::EINVAL;
        };
        count(self.fs.write(&self.context.context(), path, buff, ofst, HandleId(fh)))
    }

    pub fn readdir<F>(&self, path: &str, fill: F, ofst: i64, fh: u64) -> i32
    where
        F: FnMut(&str, Option<&Stat>, i64) -> bool,
    {
        errc(self.fs.readdir(&self.context.context(), path, fill, ofst, HandleId(fh)))
    }

    pub fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> i32 {
        errc(self.fs.setxattr(&self.context.context(), path, name, value, flags))
    }

    pub fn getxattr(&self, path: &str, name: &str) -> (i32, Vec<u8>) {
        match self.fs.getxattr(&self.context.context(), path, name) {
            Ok(value) => (0, value),
            Err(e) => (e.neg_errno(), Vec::new()),
        }
    }

    pub fn removexattr(&self, path: &str, name: &str) -> i32 {
        errc(self.fs.removexattr(&self.context.context(), path, name))
    }

    pub fn listxattr<F>(&self, path: &str, fill: F) -> i32
    where
        F: FnMut(&str) -> bool,
    {
        errc(self.fs.listxattr(&self.context.context(), path, fill))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ENOATTR;
    use crate::types::{S_IFREG, XATTR_CREATE};
    use crate::FsConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn create_test_binding() -> HostBinding {
        let fs = Arc::new(FsCore::new(FsConfig::default()).expect("engine should start"));
        HostBinding::new(fs, FixedContext(Context::new(501, 20, 99)))
    }

    #[test]
    fn test_success_and_error_codes() {
        let host = create_test_binding();
        assert_eq!(host.mknod("/a", S_IFREG | 0o644, 0), 0);
        assert_eq!(host.mknod("/a", S_IFREG | 0o644, 0), -libc::EEXIST);
        assert_eq!(host.unlink("/missing"), -libc::ENOENT);
        assert_eq!(host.rmdir("/a"), -libc::ENOTDIR);
        assert_eq!(host.readlink("/a"), (-libc::EINVAL, String::new()));
        assert_eq!(host.getxattr("/a", "user.x"), (-ENOATTR, Vec::new()));
        assert_eq!(host.setxattr("/a", "user.x", b"1", XATTR_CREATE), 0);
        assert_eq!(host.setxattr("/a", "user.x", b"1", XATTR_CREATE), -libc::EEXIST);
        assert_eq!(host.listxattr("/a", |_| false), -libc::ERANGE);
    }

    #[test]
    fn test_stat_out_parameter() {
        let host = create_test_binding();
        let mut stat = Stat::default();
        assert_eq!(host.getattr("/nope", &mut stat, u64::MAX), -libc::ENOENT);
        assert_eq!(stat, Stat::default());

        host.mknod("/a", S_IFREG | 0o600, 0);
        assert_eq!(host.getattr("/a", &mut stat, u64::MAX), 0);
        assert_eq!((stat.uid, stat.gid), (501, 20));
    }

    #[test]
    fn test_byte_counts_and_offsets() {
        let host = create_test_binding();
        host.mknod("/a", S_IFREG | 0o644, 0);
        let (rc, fh) = host.open("/a", libc::O_RDWR);
        assert_eq!(rc, 0);
        assert_eq!(host.write("/a", b"abc", 0, fh), 3);
        assert_eq!(host.write("/a", b"abc", -1, fh), -libc::EINVAL);
        let mut buf = [0u8; 8];
        assert_eq!(host.read("/a", &mut buf, 1, fh), 2);
        assert_eq!(host.truncate("/a", -5, fh), -libc::EINVAL);
        assert_eq!(host.release("/a", fh), 0);

        let (rc, fh) = host.open("/missing", 0);
        assert_eq!((rc, fh), (-libc::ENOENT, u64::MAX));
    }

    #[test]
    fn test_context_is_queried_per_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let fs = Arc::new(FsCore::new(FsConfig::default()).expect("engine should start"));
        let host = HostBinding::new(fs, move || {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            Context::new(n, n, 1)
        });

        host.mknod("/first", S_IFREG | 0o644, 0);
        host.mknod("/second", S_IFREG | 0o644, 0);
        let mut stat = Stat::default();
        host.getattr("/second", &mut stat, u64::MAX);
        assert_eq!(stat.uid, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_readdir_plus_capability() {
        let mut config = FsConfig::default();
        config.cache.enable_readdir_plus = false;
        let fs = Arc::new(FsCore::new(config).expect("engine should start"));
        let host = HostBinding::new(fs, FixedContext::default());
        assert!(!host.readdir_plus());
        assert!(create_test_binding().readdir_plus());
    }
}
