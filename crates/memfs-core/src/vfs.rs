// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The filesystem state engine
//!
//! [`FsCore`] owns the node table, the handle table and the inode counter
//! behind one mutex. Every public operation takes the lock on entry, resolves
//! its path or handle, checks all preconditions, and only then mutates.

use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::fault::{FaultInjector, FaultOp, FaultPolicy};
use crate::node::{Ino, Node, NodeKind};
use crate::payload::{Payload, ALLOC_UNIT};
use crate::resolve::{resolve, Lookup};
use crate::types::{
    Clock, Context, HandleId, Stat, SystemClock, Timespec, PERM_MASK, RESOURCE_FORK_XATTR,
    S_IFBLK, S_IFCHR, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, XATTR_CREATE, XATTR_REPLACE,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

/// Inode number of the root directory, matching the FUSE root id.
pub const ROOT_INO: u64 = 1;

/// Engine-wide counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsStats {
    pub nodes: usize,
    pub open_handles: usize,
    /// Bytes held by file payloads, counted at allocation granularity
    pub payload_bytes: u64,
}

struct FsState {
    nodes: HashMap<Ino, Node>,
    handles: HashMap<HandleId, Ino>,
    next_ino: Ino,
    faults: FaultInjector,
}

/// The main filesystem core implementation
pub struct FsCore {
    config: FsConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<FsState>,
}

impl FsState {
    fn lookup<'p>(&self, path: &'p str, ancestor: Option<Ino>) -> FsResult<Lookup<'p>> {
        resolve(&self.nodes, ROOT_INO, path, ancestor)
    }

    fn node(&self, ino: Ino) -> FsResult<&Node> {
        self.nodes.get(&ino).ok_or(FsError::NotFound)
    }

    fn node_mut(&mut self, ino: Ino) -> FsResult<&mut Node> {
        self.nodes.get_mut(&ino).ok_or(FsError::NotFound)
    }

    fn existing(&self, path: &str) -> FsResult<Ino> {
        self.lookup(path, None)?.node.ok_or(FsError::NotFound)
    }

    /// Node named by an open handle, or by `path` when `fh` is the sentinel.
    fn get_node(&self, path: &str, fh: HandleId) -> FsResult<Ino> {
        if fh.is_valid() {
            self.handles.get(&fh).copied().ok_or(FsError::NotFound)
        } else {
            self.existing(path)
        }
    }

    /// Directory the final component of `lookup` would be created in.
    fn parent_dir(&self, lookup: &Lookup<'_>) -> FsResult<Ino> {
        let parent = lookup.parent.ok_or(FsError::NotFound)?;
        if self.node(parent)?.is_dir() {
            Ok(parent)
        } else {
            Err(FsError::NotADirectory)
        }
    }

    fn allocate_ino(&mut self) -> Ino {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    fn link_child(&mut self, parent: Ino, name: &str, child: Ino, now: Timespec) {
        if let Some(dir) = self.nodes.get_mut(&parent) {
            if let Some(children) = dir.children_mut() {
                children.insert(name.to_string(), child);
            }
            dir.touch_modified(now);
        }
    }

    fn unlink_child(&mut self, parent: Ino, name: &str, now: Timespec) {
        if let Some(dir) = self.nodes.get_mut(&parent) {
            if let Some(children) = dir.children_mut() {
                children.remove(name);
            }
            dir.touch_modified(now);
        }
    }

    /// Drop one directory reference; frees the node once nothing refers to it.
    fn drop_link(&mut self, ino: Ino, now: Timespec) {
        let Some(node) = self.nodes.get_mut(&ino) else {
            return;
        };
        node.stat.nlink = node.stat.nlink.saturating_sub(1);
        node.touch_ctime(now);
        if node.stat.nlink == 0 && node.open_count == 0 {
            self.nodes.remove(&ino);
        }
    }

    fn make_node(
        &mut self,
        ctx: &Context,
        path: &str,
        mode: u32,
        dev: u64,
        target: Option<&str>,
        now: Timespec,
    ) -> FsResult<()> {
        let lookup = self.lookup(path, None)?;
        let parent = self.parent_dir(&lookup)?;
        if lookup.node.is_some() {
            return Err(FsError::AlreadyExists);
        }

        let ino = self.allocate_ino();
        let mut node = Node::new(dev, ino, mode, ctx.uid, ctx.gid, now);
        if matches!(mode & S_IFMT, S_IFCHR | S_IFBLK) {
            node.stat.rdev = dev;
        }
        if let Some(target) = target {
            node.stat.size = target.len() as u64;
            node.kind = NodeKind::Symlink {
                target: target.to_string(),
            };
        }
        let ctime = node.stat.ctime;
        self.nodes.insert(ino, node);
        self.link_child(parent, lookup.name, ino, ctime);
        Ok(())
    }

    fn remove_node(&mut self, path: &str, expect_dir: bool, now: Timespec) -> FsResult<()> {
        let lookup = self.lookup(path, None)?;
        let ino = lookup.node.ok_or(FsError::NotFound)?;
        let node = self.node(ino)?;
        if expect_dir && !node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if !expect_dir && node.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if ino == ROOT_INO {
            return Err(FsError::Busy);
        }
        if node.has_children() {
            return Err(FsError::NotEmpty);
        }
        let parent = lookup.parent.ok_or(FsError::NotFound)?;

        self.unlink_child(parent, lookup.name, now);
        self.drop_link(ino, now);
        Ok(())
    }

    fn open_node(&mut self, path: &str, expect_dir: bool) -> FsResult<HandleId> {
        let ino = self.existing(path)?;
        let node = self.node_mut(ino)?;
        if expect_dir && !node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if !expect_dir && node.is_dir() {
            return Err(FsError::IsADirectory);
        }
        node.open_count += 1;
        let fh = HandleId::new(ino);
        if node.open_count == 1 {
            self.handles.insert(fh, ino);
        }
        Ok(fh)
    }

    fn close_node(&mut self, fh: HandleId) {
        let Some(&ino) = self.handles.get(&fh) else {
            warn!(target: "memfs::ops", handle = fh.0, "release of unknown handle");
            return;
        };
        let Some(node) = self.nodes.get_mut(&ino) else {
            self.handles.remove(&fh);
            return;
        };
        node.open_count = node.open_count.saturating_sub(1);
        if node.open_count == 0 {
            self.handles.remove(&fh);
            if node.stat.nlink == 0 {
                debug!(target: "memfs::ops", ino, "freeing unlinked node on last close");
                self.nodes.remove(&ino);
            }
        }
    }
}

/// Split a node into its stat block and file payload, rejecting non-files.
fn file_parts(node: &mut Node) -> FsResult<(&mut Stat, &mut Payload)> {
    let Node { stat, kind, .. } = node;
    match kind {
        NodeKind::File { payload } => Ok((stat, payload)),
        NodeKind::Directory { .. } => Err(FsError::IsADirectory),
        NodeKind::Symlink { .. } | NodeKind::Special => Err(FsError::InvalidArgument),
    }
}

/// Resize a file payload, honouring injected faults. Leaves `stat` and
/// `payload` untouched on failure.
fn resize_file(
    faults: &mut FaultInjector,
    op: FaultOp,
    stat: &mut Stat,
    payload: &mut Payload,
    new_size: u64,
) -> FsResult<()> {
    let res = match faults.should_fault(op) {
        Some(err) => Err(err),
        None => payload.resize(stat.size, new_size, true),
    };
    if res.is_err() {
        warn!(
            target: "memfs::ops",
            ino = stat.ino,
            size = stat.size,
            new_size,
            "payload allocation failed"
        );
    }
    res?;
    stat.size = new_size;
    Ok(())
}

fn check_xattr_name(name: &str) -> FsResult<()> {
    if name == RESOURCE_FORK_XATTR {
        Err(FsError::Unsupported)
    } else {
        Ok(())
    }
}

fn log_result<T>(op: &'static str, ctx: &Context, path: &str, res: &FsResult<T>) {
    match res {
        Ok(_) => trace!(
            target: "memfs::ops",
            op,
            path,
            uid = ctx.uid,
            gid = ctx.gid,
            pid = ctx.pid,
            "ok"
        ),
        Err(e) => debug!(
            target: "memfs::ops",
            op,
            path,
            uid = ctx.uid,
            gid = ctx.gid,
            pid = ctx.pid,
            errno = e.errno(),
            error = %e,
            "failed"
        ),
    }
}

impl FsCore {
    pub fn new(config: FsConfig) -> FsResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: FsConfig, clock: Arc<dyn Clock>) -> FsResult<Self> {
        config.validate()?;

        let now = clock.now();
        let root = Node::new(
            config.device_id,
            ROOT_INO,
            S_IFDIR | config.root_mode,
            config.security.default_uid,
            config.security.default_gid,
            now,
        );

        let mut nodes = HashMap::new();
        nodes.insert(ROOT_INO, root);
        let state = FsState {
            nodes,
            handles: HashMap::new(),
            next_ino: ROOT_INO + 1,
            faults: FaultInjector::new(config.faults.clone()),
        };

        let root_mode = format!("{:o}", config.root_mode);
        info!(
            root_mode = %root_mode,
            uid = config.security.default_uid,
            gid = config.security.default_gid,
            faults = config.faults.is_active(),
            "memfs engine initialised"
        );

        Ok(Self {
            config,
            clock,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn readdir_plus_enabled(&self) -> bool {
        self.config.cache.enable_readdir_plus
    }

    fn lock_state(&self) -> MutexGuard<'_, FsState> {
        // A panic under the lock cannot leave a half-applied mutation behind:
        // every operation validates before it writes.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the engine lock with a single timestamp for the whole
    /// operation, then log the outcome.
    fn transact<T>(
        &self,
        op: &'static str,
        ctx: &Context,
        path: &str,
        f: impl FnOnce(&mut FsState, Timespec) -> FsResult<T>,
    ) -> FsResult<T> {
        let res = {
            let mut state = self.lock_state();
            let now = self.clock.now();
            f(&mut state, now)
        };
        log_result(op, ctx, path, &res);
        res
    }

    // Namespace mutations

    /// Create a node of any type. A mode without type bits makes a regular file.
    pub fn mknod(&self, ctx: &Context, path: &str, mode: u32, dev: u64) -> FsResult<()> {
        let mode = if mode & S_IFMT == 0 { mode | S_IFREG } else { mode };
        self.transact("mknod", ctx, path, |st, now| {
            st.make_node(ctx, path, mode, dev, None, now)
        })
    }

    pub fn mkdir(&self, ctx: &Context, path: &str, mode: u32) -> FsResult<()> {
        self.transact("mkdir", ctx, path, |st, now| {
            st.make_node(ctx, path, S_IFDIR | (mode & PERM_MASK), 0, None, now)
        })
    }

    pub fn unlink(&self, ctx: &Context, path: &str) -> FsResult<()> {
        self.transact("unlink", ctx, path, |st, now| st.remove_node(path, false, now))
    }

    pub fn rmdir(&self, ctx: &Context, path: &str) -> FsResult<()> {
        self.transact("rmdir", ctx, path, |st, now| st.remove_node(path, true, now))
    }

    /// Create a symlink at `newpath` pointing at `target`.
    pub fn symlink(&self, ctx: &Context, target: &str, newpath: &str) -> FsResult<()> {
        self.transact("symlink", ctx, newpath, |st, now| {
            st.make_node(ctx, newpath, S_IFLNK | 0o777, 0, Some(target), now)
        })
    }

    /// Add a hard link to a non-directory.
    pub fn link(&self, ctx: &Context, oldpath: &str, newpath: &str) -> FsResult<()> {
        self.transact("link", ctx, oldpath, |st, now| {
            let ino = st.existing(oldpath)?;
            if st.node(ino)?.is_dir() {
                return Err(FsError::NotPermitted);
            }
            let new = st.lookup(newpath, None)?;
            let parent = st.parent_dir(&new)?;
            if new.node.is_some() {
                return Err(FsError::AlreadyExists);
            }

            let node = st.node_mut(ino)?;
            node.stat.nlink += 1;
            node.touch_ctime(now);
            st.link_child(parent, new.name, ino, now);
            Ok(())
        })
    }

    /// Move `oldpath` to `newpath`, replacing a compatible target.
    pub fn rename(&self, ctx: &Context, oldpath: &str, newpath: &str) -> FsResult<()> {
        self.transact("rename", ctx, oldpath, |st, now| {
            let old = st.lookup(oldpath, None)?;
            let ino = old.node.ok_or(FsError::NotFound)?;
            if ino == ROOT_INO {
                return Err(FsError::InvalidArgument);
            }
            let old_parent = old.parent.ok_or(FsError::NotFound)?;

            let new = st.lookup(newpath, Some(ino))?;
            let new_parent = st.parent_dir(&new)?;
            if new.name.is_empty() {
                return Err(FsError::InvalidArgument);
            }
            // Same slot, or another hard link to the same node.
            if new.node == Some(ino) {
                return Ok(());
            }

            if let Some(target) = new.node {
                let moving_dir = st.node(ino)?.is_dir();
                let target_node = st.node(target)?;
                match (moving_dir, target_node.is_dir()) {
                    (false, true) => return Err(FsError::IsADirectory),
                    (true, false) => return Err(FsError::NotADirectory),
                    _ => {}
                }
                if target_node.has_children() {
                    return Err(FsError::NotEmpty);
                }
                st.unlink_child(new_parent, new.name, now);
                st.drop_link(target, now);
            }

            st.unlink_child(old_parent, old.name, now);
            st.link_child(new_parent, new.name, ino, now);
            st.node_mut(ino)?.touch_ctime(now);
            Ok(())
        })
    }

    pub fn readlink(&self, ctx: &Context, path: &str) -> FsResult<String> {
        self.transact("readlink", ctx, path, |st, _| {
            match &st.node(st.existing(path)?)?.kind {
                NodeKind::Symlink { target } => Ok(target.clone()),
                _ => Err(FsError::InvalidArgument),
            }
        })
    }

    // Metadata

    /// Replace the permission bits; the type bits never change.
    pub fn chmod(&self, ctx: &Context, path: &str, mode: u32) -> FsResult<()> {
        self.transact("chmod", ctx, path, |st, now| {
            let ino = st.existing(path)?;
            let node = st.node_mut(ino)?;
            node.stat.mode = (node.stat.mode & S_IFMT) | (mode & PERM_MASK);
            node.touch_ctime(now);
            Ok(())
        })
    }

    /// `u32::MAX` for either id leaves it unchanged.
    pub fn chown(&self, ctx: &Context, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.transact("chown", ctx, path, |st, now| {
            let ino = st.existing(path)?;
            let node = st.node_mut(ino)?;
            if uid != u32::MAX {
                node.stat.uid = uid;
            }
            if gid != u32::MAX {
                node.stat.gid = gid;
            }
            node.touch_ctime(now);
            Ok(())
        })
    }

    /// Set `[atime, mtime]`, or both to now when `times` is `None`.
    pub fn utimens(&self, ctx: &Context, path: &str, times: Option<[Timespec; 2]>) -> FsResult<()> {
        self.transact("utimens", ctx, path, |st, now| {
            let ino = st.existing(path)?;
            let node = st.node_mut(ino)?;
            node.touch_ctime(now);
            let [atime, mtime] = times.unwrap_or([now, now]);
            node.stat.atime = atime;
            node.stat.mtime = mtime;
            Ok(())
        })
    }

    pub fn chflags(&self, ctx: &Context, path: &str, flags: u32) -> FsResult<()> {
        self.transact("chflags", ctx, path, |st, now| {
            let ino = st.existing(path)?;
            let node = st.node_mut(ino)?;
            node.stat.flags = flags;
            node.touch_ctime(now);
            Ok(())
        })
    }

    pub fn setcrtime(&self, ctx: &Context, path: &str, birthtime: Timespec) -> FsResult<()> {
        self.transact("setcrtime", ctx, path, |st, now| {
            let ino = st.existing(path)?;
            let node = st.node_mut(ino)?;
            node.stat.birthtime = birthtime;
            node.touch_ctime(now);
            Ok(())
        })
    }

    pub fn setchgtime(&self, ctx: &Context, path: &str, ctime: Timespec) -> FsResult<()> {
        self.transact("setchgtime", ctx, path, |st, _| {
            let ino = st.existing(path)?;
            st.node_mut(ino)?.stat.ctime = ctime;
            Ok(())
        })
    }

    pub fn getattr(&self, ctx: &Context, path: &str, fh: HandleId) -> FsResult<Stat> {
        self.transact("getattr", ctx, path, |st, _| {
            let ino = st.get_node(path, fh)?;
            Ok(st.node(ino)?.stat)
        })
    }

    pub fn truncate(&self, ctx: &Context, path: &str, size: u64, fh: HandleId) -> FsResult<()> {
        self.transact("truncate", ctx, path, |st, now| {
            let ino = st.get_node(path, fh)?;
            let FsState { nodes, faults, .. } = st;
            let node = nodes.get_mut(&ino).ok_or(FsError::NotFound)?;
            let (stat, payload) = file_parts(node)?;
            resize_file(faults, FaultOp::Truncate, stat, payload, size)?;
            node.touch_modified(now);
            Ok(())
        })
    }

    // Handles and I/O

    /// Open a non-directory. The handle is the node's inode number; `flags`
    /// are accepted for the host's benefit and not interpreted.
    pub fn open(&self, ctx: &Context, path: &str, _flags: i32) -> FsResult<HandleId> {
        self.transact("open", ctx, path, |st, _| st.open_node(path, false))
    }

    pub fn opendir(&self, ctx: &Context, path: &str) -> FsResult<HandleId> {
        self.transact("opendir", ctx, path, |st, _| st.open_node(path, true))
    }

    pub fn release(&self, ctx: &Context, path: &str, fh: HandleId) -> FsResult<()> {
        self.transact("release", ctx, path, |st, _| {
            st.close_node(fh);
            Ok(())
        })
    }

    pub fn releasedir(&self, ctx: &Context, path: &str, fh: HandleId) -> FsResult<()> {
        self.transact("releasedir", ctx, path, |st, _| {
            st.close_node(fh);
            Ok(())
        })
    }

    /// Copy up to `buf.len()` bytes starting at `offset`; returns the count.
    pub fn read(
        &self,
        ctx: &Context,
        path: &str,
        buf: &mut [u8],
        offset: u64,
        fh: HandleId,
    ) -> FsResult<usize> {
        self.transact("read", ctx, path, |st, now| {
            let ino = st.get_node(path, fh)?;
            let (stat, payload) = file_parts(st.node_mut(ino)?)?;
            let end = offset.saturating_add(buf.len() as u64).min(stat.size);
            if end <= offset {
                return Ok(0);
            }
            let n = (end - offset) as usize;
            buf[..n].copy_from_slice(payload.bytes(offset as usize, end as usize));
            stat.atime = now;
            Ok(n)
        })
    }

    /// Write `data` at `offset`, growing the file (zero-filling any gap) as needed.
    pub fn write(
        &self,
        ctx: &Context,
        path: &str,
        data: &[u8],
        offset: u64,
        fh: HandleId,
    ) -> FsResult<usize> {
        self.transact("write", ctx, path, |st, now| {
            let ino = st.get_node(path, fh)?;
            let end = offset.checked_add(data.len() as u64).ok_or(FsError::NoSpace)?;
            let FsState { nodes, faults, .. } = st;
            let node = nodes.get_mut(&ino).ok_or(FsError::NotFound)?;
            let (stat, payload) = file_parts(node)?;
            if end > stat.size {
                resize_file(faults, FaultOp::Write, stat, payload, end)?;
            }
            payload.write_at(offset as usize, data);
            node.touch_modified(now);
            Ok(data.len())
        })
    }

    /// Enumerate `.`, `..` and every child through `fill` until it returns
    /// false. Enumeration always starts at the beginning; `fill` receives
    /// offset 0 for every entry.
    pub fn readdir<F>(
        &self,
        ctx: &Context,
        path: &str,
        mut fill: F,
        _offset: i64,
        fh: HandleId,
    ) -> FsResult<()>
    where
        F: FnMut(&str, Option<&Stat>, i64) -> bool,
    {
        self.transact("readdir", ctx, path, |st, _| {
            let dir = st.node(st.get_node(path, fh)?)?;
            let children = dir.children().ok_or(FsError::NotADirectory)?;
            if !fill(".", Some(&dir.stat), 0) || !fill("..", None, 0) {
                return Ok(());
            }
            for (name, child) in children {
                let Some(child) = st.nodes.get(child) else {
                    continue;
                };
                if !fill(name, Some(&child.stat), 0) {
                    break;
                }
            }
            Ok(())
        })
    }

    // Extended attributes

    pub fn setxattr(
        &self,
        ctx: &Context,
        path: &str,
        name: &str,
        value: &[u8],
        flags: i32,
    ) -> FsResult<()> {
        self.transact("setxattr", ctx, path, |st, _| {
            let ino = st.existing(path)?;
            check_xattr_name(name)?;
            let create = flags & XATTR_CREATE != 0;
            let replace = flags & XATTR_REPLACE != 0;
            if create && replace {
                return Err(FsError::InvalidArgument);
            }

            let node = st.node_mut(ino)?;
            let exists = node.xattrs.as_ref().is_some_and(|x| x.contains_key(name));
            if create && exists {
                return Err(FsError::AlreadyExists);
            }
            if replace && !exists {
                return Err(FsError::NoAttribute);
            }
            node.xattrs
                .get_or_insert_with(BTreeMap::new)
                .insert(name.to_string(), value.to_vec());
            Ok(())
        })
    }

    pub fn getxattr(&self, ctx: &Context, path: &str, name: &str) -> FsResult<Vec<u8>> {
        self.transact("getxattr", ctx, path, |st, _| {
            let ino = st.existing(path)?;
            check_xattr_name(name)?;
            st.node(ino)?
                .xattrs
                .as_ref()
                .and_then(|x| x.get(name))
                .cloned()
                .ok_or(FsError::NoAttribute)
        })
    }

    pub fn removexattr(&self, ctx: &Context, path: &str, name: &str) -> FsResult<()> {
        self.transact("removexattr", ctx, path, |st, _| {
            let ino = st.existing(path)?;
            check_xattr_name(name)?;
            st.node_mut(ino)?
                .xattrs
                .as_mut()
                .and_then(|x| x.remove(name))
                .map(|_| ())
                .ok_or(FsError::NoAttribute)
        })
    }

    /// Pass every attribute name to `fill`; `Range` if `fill` runs out of room.
    pub fn listxattr<F>(&self, ctx: &Context, path: &str, mut fill: F) -> FsResult<()>
    where
        F: FnMut(&str) -> bool,
    {
        self.transact("listxattr", ctx, path, |st, _| {
            let node = st.node(st.existing(path)?)?;
            for name in node.xattrs.iter().flat_map(|x| x.keys()) {
                if !fill(name) {
                    return Err(FsError::Range);
                }
            }
            Ok(())
        })
    }

    // Administration

    /// Replace the fault-injection policy and reset its counters.
    pub fn set_fault_policy(&self, policy: FaultPolicy) {
        info!(enabled = policy.enabled, rules = policy.rules.len(), "fault policy updated");
        self.lock_state().faults = FaultInjector::new(policy);
    }

    pub fn fault_policy(&self) -> FaultPolicy {
        self.lock_state().faults.policy().clone()
    }

    pub fn stats(&self) -> FsStats {
        let st = self.lock_state();
        let payload_bytes = st
            .nodes
            .values()
            .map(|n| match &n.kind {
                NodeKind::File { payload } => payload.capacity() as u64,
                _ => 0,
            })
            .sum();
        FsStats {
            nodes: st.nodes.len(),
            open_handles: st.handles.len(),
            payload_bytes,
        }
    }

    /// Walk the whole graph and describe every broken structural invariant.
    /// An empty result means the engine is consistent.
    pub fn consistency_violations(&self) -> Vec<String> {
        let st = self.lock_state();
        let mut problems = Vec::new();
        let mut refs: HashMap<Ino, u32> = HashMap::new();
        let mut reachable = HashSet::from([ROOT_INO]);
        let mut pending = vec![ROOT_INO];

        match st.nodes.get(&ROOT_INO) {
            Some(root) if root.is_dir() => {}
            _ => problems.push("root is missing or not a directory".to_string()),
        }

        while let Some(ino) = pending.pop() {
            let Some(children) = st.nodes.get(&ino).and_then(Node::children) else {
                continue;
            };
            for (name, child) in children {
                *refs.entry(*child).or_default() += 1;
                if !st.nodes.contains_key(child) {
                    problems.push(format!("entry {name:?} in {ino} points at missing node {child}"));
                } else if reachable.insert(*child) {
                    pending.push(*child);
                }
            }
        }

        for (ino, node) in &st.nodes {
            if node.ino() != *ino {
                problems.push(format!("node keyed {ino} reports inode {}", node.ino()));
            }
            if *ino != ROOT_INO && reachable.contains(ino) {
                let expected = refs.get(ino).copied().unwrap_or(0);
                if node.stat.nlink != expected {
                    problems.push(format!("{ino}: nlink {} but {expected} entries", node.stat.nlink));
                }
            }
            if !reachable.contains(ino) && (node.stat.nlink != 0 || node.open_count == 0) {
                problems.push(format!("{ino}: unreachable but still alive"));
            }
            let type_matches = match &node.kind {
                NodeKind::Directory { .. } => node.stat.file_type() == S_IFDIR,
                NodeKind::File { .. } => node.stat.file_type() == S_IFREG,
                NodeKind::Symlink { .. } => node.stat.file_type() == S_IFLNK,
                NodeKind::Special => !matches!(node.stat.file_type(), S_IFDIR | S_IFREG | S_IFLNK),
            };
            if !type_matches {
                problems.push(format!("{ino}: mode {:o} disagrees with content kind", node.stat.mode));
            }
            if let NodeKind::File { payload } = &node.kind {
                let cap = payload.capacity();
                if (cap as u64) < node.stat.size || cap % ALLOC_UNIT != 0 {
                    problems.push(format!("{ino}: size {} with capacity {cap}", node.stat.size));
                }
            }
            let in_table = st.handles.get(&HandleId::new(*ino)) == Some(ino);
            if (node.open_count > 0) != in_table {
                problems.push(format!("{ino}: open count {} vs handle table", node.open_count));
            }
        }
        for (fh, ino) in &st.handles {
            if !st.nodes.contains_key(ino) {
                problems.push(format!("handle {} refers to freed node {ino}", fh.0));
            }
        }
        problems
    }
}
