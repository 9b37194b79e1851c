//! `RemoteSession`, the Frame Assembler (§4.3), and the Send Path (§4.4).
//! Ported from `crm_remote_recv`/`crm_remote_parse_buffer` and
//! `crm_remote_send`/`crm_remote_sendv`'s build-then-gather-send sequence.

use std::marker::PhantomData;
use std::time::{Duration, Instant};

use bzip2::Decompress;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::buffer::RecvBuffer;
use crate::error::{Error, Result};
use crate::header::{Header, HEADER_LEN};
use crate::message::{MessageCodec, MessageTree};
use crate::transport::Transport;

const DEFAULT_RECV_CAPACITY: usize = 4096;

/// One peer connection: an owned [`Transport`], its [`RecvBuffer`], and a
/// monotonic per-session send counter. `C` selects the payload codec at
/// compile time rather than via a trait object, since one session only ever
/// talks one document format.
pub struct RemoteSession<C: MessageCodec> {
    transport: Transport,
    buf: RecvBuffer,
    send_id: u64,
    _codec: PhantomData<C>,
}

impl<C: MessageCodec> RemoteSession<C> {
    pub fn new(transport: Transport) -> Result<Self> {
        transport.set_nonblocking(true)?;
        Ok(RemoteSession {
            transport,
            buf: RecvBuffer::with_capacity(DEFAULT_RECV_CAPACITY),
            send_id: 0,
            _codec: PhantomData,
        })
    }

    /// The most recently assigned `id` (§3); 0 before the first send.
    pub fn send_id(&self) -> u64 {
        self.send_id
    }

    /// §4.4 `send_message`: serialize, build the header, gather-send both as
    /// two sequential `send_bytes` calls.
    pub fn send_message(&mut self, tree: &MessageTree) -> Result<()> {
        let payload = C::serialize(tree);
        self.send_id += 1;
        let header = Header::for_send(self.send_id, payload.len() as u32);

        let mut wire = [0u8; HEADER_LEN];
        header.encode(&mut wire);
        self.transport.send_bytes(&wire)?;
        self.transport.send_bytes(&payload)?;
        Ok(())
    }

    /// §4.3 `wait_for_frame`: drive `recv` until a complete frame is
    /// present, recomputing the remaining budget from wall-clock elapsed
    /// each iteration. `total_timeout_ms == 0` substitutes 10 s; negative
    /// substitutes 60 s. Each iteration blocks on the transport's readiness
    /// (via `mio::Poll`, the same mechanism `connect.rs`'s `is_writable` and
    /// `scheduler.rs`'s `PollScheduler` use) for up to the remaining budget,
    /// rather than sleeping a fixed interval.
    pub fn wait_for_frame(&mut self, total_timeout_ms: i64) -> (bool, bool) {
        let timeout = if total_timeout_ms == 0 {
            Duration::from_millis(10_000)
        } else if total_timeout_ms < 0 {
            Duration::from_millis(60_000)
        } else {
            Duration::from_millis(total_timeout_ms as u64)
        };
        let start = Instant::now();

        loop {
            if self.frame_ready() {
                return (true, false);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return (false, false);
            }
            let remaining = timeout - elapsed;

            if self.buf.grow_for_advertised_size().is_err() {
                // Advertised size fails validation (too large, or would
                // require growing past any sane target); treat as a
                // malformed/unrecoverable frame rather than spin.
                return (false, true);
            }
            let window_len = self.buf.write_window().len();
            if window_len == 0 {
                return (false, false);
            }

            // Try a non-blocking recv before polling raw-socket readiness:
            // a TLS transport can already have plaintext buffered from a
            // prior read_tls() call (the peer's write landed in one TCP
            // segment that decrypted to more bytes than the last write_window
            // could hold), in which case the fd may never become readable
            // again even though there is more to drain.
            match self.transport.recv_nonblocking(self.buf.write_window()) {
                Ok(0) => {
                    if !self.poll_readable(remaining) {
                        // Timed out (or the poll itself failed) waiting for
                        // readiness; loop back so the elapsed check above
                        // reports the timeout once the budget is spent.
                        continue;
                    }
                }
                Ok(n) => self.buf.advance(n),
                Err(Error::Disconnected) => return (false, true),
                Err(_) => return (false, true),
            }
        }
    }

    /// Blocks until the transport's socket is readable or `timeout` elapses,
    /// mirroring `connect.rs`'s `is_writable` zero/bounded-timeout poll but
    /// for reads and with a caller-supplied budget instead of zero.
    fn poll_readable(&self, timeout: Duration) -> bool {
        let Ok(mut poll) = Poll::new() else {
            // No poll facility available; fall back to an immediate recv
            // attempt rather than blocking the caller indefinitely.
            return true;
        };
        let mut events = Events::with_capacity(1);
        let raw_fd = self.transport.as_raw_fd();
        let mut source = SourceFd(&raw_fd);
        if poll.registry().register(&mut source, Token(0), Interest::READABLE).is_err() {
            return true;
        }
        let ready = poll.poll(&mut events, Some(timeout)).is_ok() && !events.is_empty();
        let _ = poll.registry().deregister(&mut source);
        ready
    }

    fn frame_ready(&self) -> bool {
        let filled = self.buf.filled_slice();
        if filled.len() < HEADER_LEN {
            return false;
        }
        let mut scratch = filled[..HEADER_LEN].to_vec();
        matches!(Header::read(&mut scratch), Ok(Some(h)) if filled.len() >= h.size_total as usize)
    }

    /// §4.3 `extract_message`: decompress if needed, hand the payload to
    /// `C::parse`, then reset the buffer for the next frame.
    pub fn extract_message(&mut self) -> Result<Option<MessageTree>> {
        let header = {
            let header_region = &mut self.buf.filled_slice_mut()[..HEADER_LEN];
            Header::read(header_region)?.ok_or(Error::InvalidFrame("frame incomplete at extract"))?
        };

        let payload_offset = header.payload_offset as usize;
        let mut compressed = false;

        if header.payload_compressed > 0 {
            compressed = true;
            match self.decompress_in_place(&header) {
                Ok(()) => {}
                Err(e) if header.version > 1 => {
                    log::warn!(
                        "ignoring undecodable compressed payload from protocol version {} ({e})",
                        header.version
                    );
                    // decompress_in_place failed before replace_with ran, so
                    // the buffer is still in its pre-decompression layout;
                    // consume only this frame's bytes rather than wiping a
                    // second, already-coalesced frame behind it.
                    self.buf.consume_frame(header.size_total as usize);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        // Bound the payload by the header's own declared length rather than
        // reading to the end of the filled buffer: a second frame's bytes
        // may already have arrived in the same read (frame_ready only
        // requires the *first* frame's bytes to be present), and a
        // malformed or hostile header could otherwise index past the end of
        // what was actually received.
        let filled_len = self.buf.filled_slice().len();
        let payload_end = payload_offset
            .checked_add(header.payload_uncompressed as usize)
            .filter(|end| *end <= filled_len && payload_offset <= filled_len)
            .ok_or(Error::InvalidFrame("payload_uncompressed exceeds received frame bytes"))?;

        let payload = &self.buf.filled_slice()[payload_offset..payload_end];
        let tree = C::parse(payload);

        if compressed {
            // decompress_in_place already replaced the buffer with exactly
            // this frame's header + decompressed payload (any trailing,
            // already-coalesced frame was dropped at that point); nothing
            // remains to preserve.
            self.buf.reset();
        } else {
            self.buf.consume_frame(header.size_total as usize);
        }

        if tree.is_none() && header.version > 1 {
            log::warn!(
                "ignoring unparseable payload from protocol version {}",
                header.version
            );
        }
        Ok(tree)
    }

    fn decompress_in_place(&mut self, header: &Header) -> Result<()> {
        let payload_offset = header.payload_offset as usize;
        let compressed_len = header.payload_compressed as usize;
        let uncompressed_len = header.payload_uncompressed as usize;

        // payload_uncompressed drives the allocation below and is otherwise
        // unrelated to size_total (a tiny compressed frame can claim an
        // enormous uncompressed size), so it needs its own ceiling rather
        // than inheriting the one grow_for_advertised_size already applied
        // to size_total.
        if header.payload_uncompressed > crate::header::MAX_FRAME_SIZE {
            return Err(Error::Decompression(
                "payload_uncompressed exceeds maximum frame size".to_string(),
            ));
        }

        let filled_len = self.buf.filled_slice().len();
        let compressed_end = payload_offset
            .checked_add(compressed_len)
            .filter(|end| *end <= filled_len && payload_offset <= filled_len)
            .ok_or_else(|| {
                Error::Decompression("payload_compressed exceeds received frame bytes".to_string())
            })?;

        let compressed = self.buf.filled_slice()[payload_offset..compressed_end].to_vec();
        let mut out = vec![0u8; uncompressed_len];

        let mut decompress = Decompress::new(false);
        decompress
            .decompress(&compressed, &mut out)
            .map_err(|e| Error::Decompression(e.to_string()))?;

        if decompress.total_out() as usize != uncompressed_len {
            return Err(Error::Decompression(format!(
                "decompressed {} bytes, expected {uncompressed_len}",
                decompress.total_out()
            )));
        }

        let mut grown = Vec::with_capacity(payload_offset + uncompressed_len);
        grown.extend_from_slice(&self.buf.filled_slice()[..payload_offset]);
        grown.extend_from_slice(&out);
        self.buf.replace_with(grown);
        Ok(())
    }
}
