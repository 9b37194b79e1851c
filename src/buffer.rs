//! The growable receive buffer (§3): `buf_cap` bytes of storage plus one
//! trailing NUL-sentinel byte, a fill watermark `buf_off`, and on-demand
//! growth keyed off the advertised `size_total` once a header is visible.
//! Grounded in `crm_remote_recv_once`'s `2 * read_len` reallocation policy.

use bytesize::ByteSize;

use crate::error::{Error, Result};
use crate::header::{Header, HEADER_LEN, MAX_FRAME_SIZE};

pub struct RecvBuffer {
    storage: Vec<u8>,
    off: usize,
}

impl RecvBuffer {
    pub fn with_capacity(initial_cap: usize) -> Self {
        RecvBuffer {
            storage: vec![0u8; initial_cap + 1],
            off: 0,
        }
    }

    /// Capacity available for frame bytes (excludes the trailing sentinel).
    pub fn capacity(&self) -> usize {
        self.storage.len() - 1
    }

    pub fn filled(&self) -> usize {
        self.off
    }

    /// The writable window `buf[buf_off .. buf_cap]`.
    pub fn write_window(&mut self) -> &mut [u8] {
        let cap = self.capacity();
        &mut self.storage[self.off..cap]
    }

    /// Bytes filled so far, `buf[0 .. buf_off]`.
    pub fn filled_slice(&self) -> &[u8] {
        &self.storage[..self.off]
    }

    pub fn filled_slice_mut(&mut self) -> &mut [u8] {
        let off = self.off;
        &mut self.storage[..off]
    }

    /// Advances the watermark after a successful read of `n` bytes and
    /// writes the trailing NUL sentinel (`buf[buf_off] = 0`).
    pub fn advance(&mut self, n: usize) {
        self.off += n;
        self.storage[self.off] = 0;
    }

    /// Resets the watermark to 0 for the next frame (single-frame-at-a-time
    /// consumption, per §4.3).
    pub fn reset(&mut self) {
        self.off = 0;
    }

    /// Drops the first `consumed` bytes (one fully-parsed frame's
    /// `size_total`) and shifts whatever trails it — a second frame's bytes
    /// that already arrived in the same read — down to the front, instead
    /// of discarding them the way [`reset`](Self::reset) does. `consumed`
    /// must not exceed the current fill level.
    pub fn consume_frame(&mut self, consumed: usize) {
        debug_assert!(consumed <= self.off);
        let remaining = self.off - consumed;
        self.storage.copy_within(consumed..self.off, 0);
        self.off = remaining;
        self.storage[self.off] = 0;
    }

    /// If a complete header is present and advertises a `size_total` larger
    /// than the current capacity, grow storage to `2 * size_total + 1` (the
    /// `+1` reserves the sentinel slot), preserving already-read bytes. If
    /// the window has run dry before a full header has even arrived (an
    /// initial capacity smaller than `HEADER_LEN`), grow enough to fit one
    /// rather than stalling forever with nowhere left to read into. Rejects
    /// a `size_total` beyond [`MAX_FRAME_SIZE`] rather than honoring it —
    /// an unvalidated header field is attacker-controlled.
    pub fn grow_for_advertised_size(&mut self) -> Result<()> {
        if self.off >= self.capacity() {
            let new_cap = match self.peek_size_total() {
                Some(size_total) => 2 * Self::checked_frame_size(size_total)?,
                None => (self.capacity() * 2).max(HEADER_LEN),
            };
            self.grow_to(new_cap);
            return Ok(());
        }

        let Some(size_total) = self.peek_size_total() else {
            return Ok(());
        };
        let size_total = Self::checked_frame_size(size_total)?;
        if size_total <= self.capacity() {
            return Ok(());
        }
        self.grow_to(2 * size_total);
        Ok(())
    }

    fn checked_frame_size(size_total: u32) -> Result<usize> {
        if size_total > MAX_FRAME_SIZE {
            return Err(Error::InvalidFrame(
                "advertised frame size exceeds maximum",
            ));
        }
        Ok(size_total as usize)
    }

    fn grow_to(&mut self, new_cap: usize) {
        if new_cap <= self.capacity() {
            return;
        }
        trace!(
            "growing receive buffer from {} to {}",
            ByteSize(self.capacity() as u64).to_string_as(true),
            ByteSize(new_cap as u64).to_string_as(true)
        );
        let mut grown = vec![0u8; new_cap + 1];
        grown[..self.off].copy_from_slice(&self.storage[..self.off]);
        self.storage = grown;
    }

    fn peek_size_total(&self) -> Option<u32> {
        if self.off < HEADER_LEN {
            return None;
        }
        let mut scratch = self.storage[..HEADER_LEN].to_vec();
        Header::read(&mut scratch).ok().flatten().map(|h| h.size_total)
    }

    /// Replaces the backing storage wholesale (used after in-place
    /// decompression replaces the session buffer per §4.3). The watermark
    /// moves to the end of `data` so `filled_slice`/`filled` reflect the
    /// decompressed content, not the stale pre-decompression fill level.
    pub fn replace_with(&mut self, data: Vec<u8>) {
        self.off = data.len();
        let mut storage = data;
        storage.push(0); // sentinel slot
        self.storage = storage;
    }
}
