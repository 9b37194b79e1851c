//! The fixed-layout frame header (§3, §4.1). Ported from `crm_remote_header_v0`
//! and its `__swab16/32/64` byte-reversal helpers in `lib/common/remote.c`.

use byteorder::{ByteOrder, NativeEndian};

use crate::error::{Error, Result};

/// Sender's view of the constant, placed in every outgoing header's `endian`
/// field. Its byte-swap differs from itself, which is exactly why it was
/// chosen: a receiver that sees neither this value nor its swap knows the
/// frame is corrupt rather than merely foreign-endian.
pub const LOCAL_MAGIC: u32 = 0xBADA_DBBD;

/// Current protocol version this crate understands.
pub const PROTOCOL_VERSION: u32 = 1;

/// `size_of::<Header>()` on the wire: 4 u32 + 2 u64 + 4 u32 = 40 bytes,
/// packed with no padding.
pub const HEADER_LEN: usize = 40;

/// Sanity ceiling on a frame's advertised `size_total`, so a malformed or
/// hostile header can't drive the receive buffer into an unbounded
/// allocation before a single payload byte has arrived. Mirrors the
/// teacher's `PROTOCOL_MAX_MESSAGE_SIZE` check in `read_expected_size`.
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// The fixed-layout record at offset 0 of every frame (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub endian: u32,
    pub version: u32,
    pub id: u64,
    pub flags: u64,
    pub size_total: u32,
    pub payload_offset: u32,
    pub payload_compressed: u32,
    pub payload_uncompressed: u32,
}

impl Header {
    /// Builds the header for an outgoing frame with `payload_len` bytes
    /// (the serialized, NUL-terminated payload).
    pub fn for_send(id: u64, payload_len: u32) -> Self {
        Header {
            endian: LOCAL_MAGIC,
            version: PROTOCOL_VERSION,
            id,
            flags: 0,
            size_total: HEADER_LEN as u32 + payload_len,
            payload_offset: HEADER_LEN as u32,
            payload_compressed: 0,
            payload_uncompressed: payload_len,
        }
    }

    /// Serializes the header to its on-wire, host-endian representation.
    pub fn encode(&self, out: &mut [u8; HEADER_LEN]) {
        NativeEndian::write_u32(&mut out[0..4], self.endian);
        NativeEndian::write_u32(&mut out[4..8], self.version);
        NativeEndian::write_u64(&mut out[8..16], self.id);
        NativeEndian::write_u64(&mut out[16..24], self.flags);
        NativeEndian::write_u32(&mut out[24..28], self.size_total);
        NativeEndian::write_u32(&mut out[28..32], self.payload_offset);
        NativeEndian::write_u32(&mut out[32..36], self.payload_compressed);
        NativeEndian::write_u32(&mut out[36..40], self.payload_uncompressed);
    }

    /// Reads the header out of `buf`, detecting and correcting for a
    /// foreign-endian sender (§4.1). Returns `Ok(None)` if `buf` does not yet
    /// hold a full header (caller should read more first). The swap, when
    /// needed, is performed **in place** on `buf` so a second call on the
    /// same bytes observes host order directly.
    pub fn read(buf: &mut [u8]) -> Result<Option<Header>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let raw_endian = NativeEndian::read_u32(&buf[0..4]);
        if raw_endian == LOCAL_MAGIC {
            return Ok(Some(Header::decode(buf)));
        }

        let swapped = raw_endian.swap_bytes();
        if swapped != LOCAL_MAGIC {
            return Err(Error::InvalidFrame(
                "endian field matches neither local magic nor its byte-swap",
            ));
        }

        swap_header_fields_in_place(buf);
        Ok(Some(Header::decode(buf)))
    }

    fn decode(buf: &[u8]) -> Header {
        Header {
            endian: NativeEndian::read_u32(&buf[0..4]),
            version: NativeEndian::read_u32(&buf[4..8]),
            id: NativeEndian::read_u64(&buf[8..16]),
            flags: NativeEndian::read_u64(&buf[16..24]),
            size_total: NativeEndian::read_u32(&buf[24..28]),
            payload_offset: NativeEndian::read_u32(&buf[28..32]),
            payload_compressed: NativeEndian::read_u32(&buf[32..36]),
            payload_uncompressed: NativeEndian::read_u32(&buf[36..40]),
        }
    }
}

/// Byte-swaps every multi-byte header field of `buf` in place, matching the
/// widths in §3: three `u32`s bracket a `u64` pair, then four more `u32`s.
fn swap_header_fields_in_place(buf: &mut [u8]) {
    swap_u32_field(buf, 0); // endian
    swap_u32_field(buf, 4); // version
    swap_u64_field(buf, 8); // id
    swap_u64_field(buf, 16); // flags
    swap_u32_field(buf, 24); // size_total
    swap_u32_field(buf, 28); // payload_offset
    swap_u32_field(buf, 32); // payload_compressed
    swap_u32_field(buf, 36); // payload_uncompressed
}

fn swap_u32_field(buf: &mut [u8], offset: usize) {
    let v = NativeEndian::read_u32(&buf[offset..offset + 4]).swap_bytes();
    NativeEndian::write_u32(&mut buf[offset..offset + 4], v);
}

fn swap_u64_field(buf: &mut [u8], offset: usize) {
    let v = NativeEndian::read_u64(&buf[offset..offset + 8]).swap_bytes();
    NativeEndian::write_u64(&mut buf[offset..offset + 8], v);
}
