// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Growable byte buffer backing regular files
//!
//! The buffer is always exactly `capacity` bytes long, where capacity is the
//! file size rounded up to [`ALLOC_UNIT`]. The file's logical size lives in the
//! node's stat block; bytes past it are never exposed.

use crate::error::{FsError, FsResult};

/// Allocation granularity for file payloads.
pub const ALLOC_UNIT: usize = 64 * 1024;

#[derive(Clone, Debug, Default)]
pub(crate) struct Payload {
    buf: Vec<u8>,
}

/// Capacity for a payload of `size` bytes, or `None` if it cannot be addressed.
pub(crate) fn capacity_for(size: u64) -> Option<usize> {
    let size = usize::try_from(size).ok()?;
    let rounded = size.checked_add(ALLOC_UNIT - 1)? / ALLOC_UNIT * ALLOC_UNIT;
    // Vec refuses anything above isize::MAX bytes.
    (rounded <= isize::MAX as usize).then_some(rounded)
}

impl Payload {
    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes `[offset, end)`; callers clamp to the logical size first.
    pub(crate) fn bytes(&self, offset: usize, end: usize) -> &[u8] {
        &self.buf[offset..end]
    }

    pub(crate) fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.buf[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Resize from `old_size` to `new_size` logical bytes.
    ///
    /// On failure the buffer is left untouched and `NoSpace` is returned.
    pub(crate) fn resize(&mut self, old_size: u64, new_size: u64, zeroinit: bool) -> FsResult<()> {
        let capacity = capacity_for(new_size).ok_or(FsError::NoSpace)?;
        // old_size always fits: it is bounded by the current capacity.
        let old_size = (old_size as usize).min(self.buf.len());
        let new_size = new_size as usize;

        if capacity != self.buf.len() {
            let mut buf = Vec::new();
            buf.try_reserve_exact(capacity).map_err(|_| FsError::NoSpace)?;
            buf.extend_from_slice(&self.buf[..old_size.min(new_size)]);
            buf.resize(capacity, 0);
            self.buf = buf;
        } else if zeroinit && new_size > old_size {
            self.buf[old_size..new_size].fill(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_alloc_unit() {
        assert_eq!(capacity_for(0), Some(0));
        assert_eq!(capacity_for(1), Some(ALLOC_UNIT));
        assert_eq!(capacity_for(ALLOC_UNIT as u64), Some(ALLOC_UNIT));
        assert_eq!(capacity_for(ALLOC_UNIT as u64 + 1), Some(2 * ALLOC_UNIT));
        assert_eq!(capacity_for(u64::MAX), None);
    }

    #[test]
    fn test_grow_preserves_content_and_zero_fills() {
        let mut payload = Payload::default();
        payload.resize(0, 5, true).expect("grow");
        payload.write_at(0, b"hello");
        assert_eq!(payload.capacity(), ALLOC_UNIT);

        payload.resize(5, ALLOC_UNIT as u64 + 10, true).expect("grow past unit");
        assert_eq!(payload.capacity(), 2 * ALLOC_UNIT);
        assert_eq!(payload.bytes(0, 5), b"hello");
        assert!(payload.bytes(5, ALLOC_UNIT + 10).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_regrow_within_capacity_zeroes_stale_tail() {
        let mut payload = Payload::default();
        payload.resize(0, 8, true).expect("grow");
        payload.write_at(0, b"abcdefgh");

        // Shrink keeps the capacity, so stale bytes stay in the buffer...
        payload.resize(8, 2, true).expect("shrink");
        assert_eq!(payload.capacity(), ALLOC_UNIT);

        // ...and must be cleared when the file grows over them again.
        payload.resize(2, 8, true).expect("regrow");
        assert_eq!(payload.bytes(0, 8), b"ab\0\0\0\0\0\0");
    }

    #[test]
    fn test_shrink_to_zero_releases_buffer() {
        let mut payload = Payload::default();
        payload.resize(0, 100, true).expect("grow");
        payload.resize(100, 0, true).expect("shrink");
        assert_eq!(payload.capacity(), 0);
    }

    #[test]
    fn test_unaddressable_size_is_no_space() {
        let mut payload = Payload::default();
        payload.resize(0, 3, true).expect("grow");
        payload.write_at(0, b"xyz");

        assert_eq!(payload.resize(3, u64::MAX - 1, true), Err(FsError::NoSpace));
        assert_eq!(payload.capacity(), ALLOC_UNIT);
        assert_eq!(payload.bytes(0, 3), b"xyz");
    }
}
