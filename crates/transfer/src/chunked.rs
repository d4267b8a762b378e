//! Payload splitting.
//!
//! Chunks are `Bytes` views into the caller's buffers whenever a chunk lies
//! inside one slice; only a chunk that straddles two slices is copied.

use bytes::{Bytes, BytesMut};

use crate::DEFAULT_CHUNK_SIZE;

fn effective_max(max: usize) -> usize {
    if max == 0 { DEFAULT_CHUNK_SIZE } else { max }
}

/// Splits `payload` into chunks of at most `max` bytes.
///
/// If `max` is 0, [`DEFAULT_CHUNK_SIZE`] (256 KiB) is used.
pub fn split(payload: &Bytes, max: usize) -> Chunks<'static> {
    Chunks {
        slices: &[],
        current: payload.clone(),
        max: effective_max(max),
    }
}

/// Splits a payload held as consecutive slices.
///
/// Concatenating the yielded chunks equals concatenating `slices`. Empty
/// slices are skipped.
pub fn split_slices(slices: &[Bytes], max: usize) -> Chunks<'_> {
    Chunks {
        slices,
        current: Bytes::new(),
        max: effective_max(max),
    }
}

/// Number of chunks a payload of `len` bytes splits into.
pub fn chunk_count(len: u64, max: usize) -> u64 {
    len.div_ceil(effective_max(max) as u64)
}

/// Ordered, restartable chunk sequence. Clone it to iterate again.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    slices: &'a [Bytes],
    current: Bytes,
    max: usize,
}

impl Chunks<'_> {
    /// Bytes not yet yielded.
    pub fn remaining(&self) -> u64 {
        let rest: usize = self.slices.iter().map(Bytes::len).sum();
        (self.current.len() + rest) as u64
    }

    fn refill(&mut self) -> bool {
        while self.current.is_empty() {
            let Some((head, rest)) = self.slices.split_first() else {
                return false;
            };
            self.current = head.clone();
            self.slices = rest;
        }
        true
    }
}

impl Iterator for Chunks<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if !self.refill() {
            return None;
        }

        if self.current.len() >= self.max || self.slices.iter().all(Bytes::is_empty) {
            let take = self.current.len().min(self.max);
            return Some(self.current.split_to(take));
        }

        let mut chunk = BytesMut::with_capacity(self.max);
        while chunk.len() < self.max && self.refill() {
            let take = self.current.len().min(self.max - chunk.len());
            chunk.extend_from_slice(&self.current.split_to(take));
        }
        Some(chunk.freeze())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = chunk_count(self.remaining(), self.max) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks<'_> {}
