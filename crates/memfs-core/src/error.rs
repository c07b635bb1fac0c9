// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the memfs engine
//!
//! Every engine operation returns [`FsResult`]. The host binding turns an
//! [`FsError`] into the negated POSIX errno the kernel expects, so the mapping
//! in [`FsError::errno`] is exhaustive on purpose: adding a variant forces a
//! decision about its errno.

use libc::c_int;

/// Errno reported for a missing extended attribute.
///
/// BSD-derived systems have a dedicated `ENOATTR`; Linux reports the same
/// condition as `ENODATA`.
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub const ENOATTR: c_int = libc::ENOATTR;
#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
pub const ENOATTR: c_int = libc::ENODATA;

/// Core filesystem error type
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("file name too long")]
    NameTooLong,
    #[error("unsupported")]
    Unsupported,
    #[error("no such attribute")]
    NoAttribute,
    #[error("result too large for buffer")]
    Range,
    #[error("no space left")]
    NoSpace,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("busy")]
    Busy,
}

impl FsError {
    /// Positive POSIX errno for this error.
    pub fn errno(self) -> c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::Unsupported => libc::ENOTSUP,
            FsError::NoAttribute => ENOATTR,
            FsError::Range => libc::ERANGE,
            FsError::NoSpace => libc::ENOSPC,
            FsError::NotPermitted => libc::EPERM,
            FsError::Busy => libc::EBUSY,
        }
    }

    /// The errno negated, as returned across the host binding.
    pub fn neg_errno(self) -> c_int {
        -self.errno()
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::NameTooLong.errno(), libc::ENAMETOOLONG);
        assert_eq!(FsError::NoAttribute.errno(), ENOATTR);
        assert_eq!(FsError::NoSpace.neg_errno(), -libc::ENOSPC);
        assert_eq!(FsError::NotPermitted.neg_errno(), -libc::EPERM);
    }

    #[test]
    fn test_errno_values_are_positive() {
        let all = [
            FsError::NotFound,
            FsError::AlreadyExists,
            FsError::InvalidArgument,
            FsError::IsADirectory,
            FsError::NotADirectory,
            FsError::NotEmpty,
            FsError::NameTooLong,
            FsError::Unsupported,
            FsError::NoAttribute,
            FsError::Range,
            FsError::NoSpace,
            FsError::NotPermitted,
            FsError::Busy,
        ];
        for err in all {
            assert!(err.errno() > 0, "{err} should map to a positive errno");
        }
    }
}
