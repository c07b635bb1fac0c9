// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem nodes and the node factory

use crate::payload::Payload;
use crate::types::{Stat, Timespec, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use std::collections::BTreeMap;

/// Inode number; doubles as the node's key in the node table.
pub(crate) type Ino = u64;

/// Node content, selected by the type bits of the mode at creation
#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    /// Children are ordered by name so enumeration is stable between calls.
    Directory { children: BTreeMap<String, Ino> },
    File { payload: Payload },
    Symlink { target: String },
    /// FIFOs, sockets and device nodes carry no content.
    Special,
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub stat: Stat,
    pub kind: NodeKind,
    /// Allocated on first use.
    pub xattrs: Option<BTreeMap<String, Vec<u8>>>,
    pub open_count: u32,
}

impl Node {
    /// Build a fresh node. Every timestamp is `now`, `nlink` is 1.
    pub(crate) fn new(dev: u64, ino: Ino, mode: u32, uid: u32, gid: u32, now: Timespec) -> Self {
        let kind = match mode & S_IFMT {
            S_IFDIR => NodeKind::Directory {
                children: BTreeMap::new(),
            },
            S_IFREG => NodeKind::File {
                payload: Payload::default(),
            },
            S_IFLNK => NodeKind::Symlink {
                target: String::new(),
            },
            _ => NodeKind::Special,
        };
        Self {
            stat: Stat {
                dev,
                ino,
                mode,
                nlink: 1,
                uid,
                gid,
                rdev: 0,
                size: 0,
                atime: now,
                mtime: now,
                ctime: now,
                birthtime: now,
                flags: 0,
            },
            kind,
            xattrs: None,
            open_count: 0,
        }
    }

    pub(crate) fn ino(&self) -> Ino {
        self.stat.ino
    }

    pub(crate) fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub(crate) fn children(&self) -> Option<&BTreeMap<String, Ino>> {
        match &self.kind {
            NodeKind::Directory { children } => Some(children),
            _ => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Ino>> {
        match &mut self.kind {
            NodeKind::Directory { children } => Some(children),
            _ => None,
        }
    }

    pub(crate) fn has_children(&self) -> bool {
        self.children().is_some_and(|c| !c.is_empty())
    }

    pub(crate) fn touch_ctime(&mut self, now: Timespec) {
        self.stat.ctime = now;
    }

    pub(crate) fn touch_modified(&mut self, now: Timespec) {
        self.stat.ctime = now;
        self.stat.mtime = now;
    }
}
