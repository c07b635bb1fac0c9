// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for memfs

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// libc exposes these as `mode_t`, which is u16 on some BSDs.
pub const S_IFMT: u32 = libc::S_IFMT as u32;
pub const S_IFREG: u32 = libc::S_IFREG as u32;
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;
pub const S_IFLNK: u32 = libc::S_IFLNK as u32;
pub const S_IFCHR: u32 = libc::S_IFCHR as u32;
pub const S_IFBLK: u32 = libc::S_IFBLK as u32;
pub const S_IFIFO: u32 = libc::S_IFIFO as u32;
pub const S_IFSOCK: u32 = libc::S_IFSOCK as u32;

/// Permission bits (including setuid, setgid and sticky).
pub const PERM_MASK: u32 = 0o7777;

/// Longest accepted path component, in bytes.
pub const NAME_MAX: usize = 255;

pub const XATTR_CREATE: i32 = libc::XATTR_CREATE;
pub const XATTR_REPLACE: i32 = libc::XATTR_REPLACE;

/// Attribute name reserved by macOS for resource forks; never stored.
pub const RESOURCE_FORK_XATTR: &str = "com.apple.ResourceFork";

/// Seconds and nanoseconds since the Unix epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub fn to_system_time(self) -> SystemTime {
        if self.sec >= 0 {
            UNIX_EPOCH + Duration::new(self.sec as u64, self.nsec)
        } else {
            UNIX_EPOCH - Duration::from_secs(self.sec.unsigned_abs()) + Duration::from_nanos(self.nsec as u64)
        }
    }
}

impl From<SystemTime> for Timespec {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                let d = e.duration();
                if d.subsec_nanos() == 0 {
                    Self::new(-(d.as_secs() as i64), 0)
                } else {
                    Self::new(-(d.as_secs() as i64) - 1, 1_000_000_000 - d.subsec_nanos())
                }
            }
        }
    }
}

/// POSIX-like metadata record of a node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub birthtime: Timespec,
    /// BSD-style flags (UF_*/SF_*)
    pub flags: u32,
}

impl Stat {
    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.mode & PERM_MASK
    }

    /// Number of 512-byte blocks backing `size`.
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }
}

/// Opaque handle identifier
///
/// Handles are the inode number of the opened node; concurrent opens of the
/// same node share a handle and are reference counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl HandleId {
    /// "No handle": operations that accept one fall back to path lookup.
    pub const INVALID: HandleId = HandleId(u64::MAX);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Identity of the caller issuing an operation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

impl Context {
    pub fn new(uid: u32, gid: u32, pid: u32) -> Self {
        Self { uid, gid, pid }
    }
}

/// Source of "now" for timestamp bookkeeping
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> Timespec;
}

/// Wall-clock time from the operating system
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timespec {
        Timespec::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespec_system_time_round_trip() {
        let ts = Timespec::new(1_700_000_000, 123_456_789);
        assert_eq!(Timespec::from(ts.to_system_time()), ts);

        let before_epoch = Timespec::new(-2, 500_000_000);
        assert_eq!(Timespec::from(before_epoch.to_system_time()), before_epoch);
    }

    #[test]
    fn test_stat_type_helpers() {
        let stat = Stat {
            mode: S_IFDIR | 0o755,
            size: 1025,
            ..Default::default()
        };
        assert!(stat.is_dir());
        assert!(!stat.is_file());
        assert_eq!(stat.perm(), 0o755);
        assert_eq!(stat.blocks(), 3);
    }

    #[test]
    fn test_invalid_handle_sentinel() {
        assert_eq!(HandleId::INVALID.0, u64::MAX);
        assert!(!HandleId::INVALID.is_valid());
        assert!(HandleId::new(1).is_valid());
    }
}
