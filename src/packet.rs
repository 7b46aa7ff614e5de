//! Segment codec.
//!
//! A [`Packet`] is one datagram on the wire: a fixed 32-byte [`Header`]
//! followed by up to [`MSS`](crate::config::MSS) payload bytes.  Encoding
//! seals the segment with its CRC; decoding refuses anything whose length or
//! CRC does not check out.  Pure data transformation, no I/O.
//!
//! # Layout
//!
//! Packed, all integers big-endian:
//!
//! ```text
//!  offset  size  field
//!  ──────  ────  ─────────────────────────────────────────────
//!       0     4  seq        handshake ISN, or stream offset a
//!                           data segment advances past
//!       4     2  control    SYN / ACK / FIN bits
//!       6     4  data_len   payload bytes that follow
//!      10     4  ack        next byte expected from the peer
//!      14     2  window     free receive-buffer space
//!      16    12  reserved   three zero words
//!      28     4  checksum   CRC-32 of header (this field zeroed)
//!                           followed by the payload
//!      32     …  payload
//! ```

use thiserror::Error;

use crate::checksum;

/// Bit-flag constants for the `control` header field.
///
/// FIN never travels alone: a closing segment is always `FIN | ACK`.
pub mod flags {
    /// Finish: sender has no more data to send.
    pub const FIN: u16 = 0b0000_0001;
    /// Opens a connection; carries the sender's ISN.
    pub const SYN: u16 = 0b0000_0010;
    /// The `ack` field is meaningful.  Set on everything after the first SYN.
    pub const ACK: u16 = 0b0000_1000;

    pub const SYN_ACK: u16 = SYN | ACK;
    pub const FIN_ACK: u16 = FIN | ACK;
}

/// Encoded header size.
pub const HEADER_LEN: usize = 32;

// Field offsets within the encoded header.
const OFF_SEQ: usize = 0;
const OFF_CONTROL: usize = 4;
const OFF_DATA_LEN: usize = 6;
const OFF_ACK: usize = 10;
const OFF_WINDOW: usize = 14;
const OFF_RESERVED: usize = 16;
pub(crate) const OFF_CHECKSUM: usize = 28;

/// Segment header.
///
/// Fields are in host byte order; [`Header::encode`] converts to big-endian
/// on the wire and [`Header::decode`] converts back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Handshake sequence number, or the stream offset a data segment
    /// advances past.
    pub seq: u32,
    /// Combination of [`flags`].
    pub control: u16,
    /// Number of payload bytes following the header.
    pub data_len: u32,
    /// Next sequence number expected from the peer.
    pub ack: u32,
    /// Advertised free receive-buffer space in bytes.
    pub window: u16,
    /// Must be zero.  Still covered by the checksum.
    pub reserved: [u32; 3],
    /// CRC-32 over the header (with this field zeroed) and the payload.
    pub checksum: u32,
}

impl Header {
    /// Build a header with zeroed reserved words and checksum.
    pub fn new(seq: u32, control: u16, data_len: u32, ack: u32, window: u16) -> Self {
        Self {
            seq,
            control,
            data_len,
            ack,
            window,
            reserved: [0; 3],
            checksum: 0,
        }
    }

    /// Serialise into network byte order.
    ///
    /// The checksum field is written as stored; sealing a segment is
    /// [`Packet::encode`]'s job.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_CONTROL..OFF_CONTROL + 2].copy_from_slice(&self.control.to_be_bytes());
        buf[OFF_DATA_LEN..OFF_DATA_LEN + 4].copy_from_slice(&self.data_len.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.window.to_be_bytes());
        for (i, word) in self.reserved.iter().enumerate() {
            let off = OFF_RESERVED + i * 4;
            buf[off..off + 4].copy_from_slice(&word.to_be_bytes());
        }
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    /// Parse the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Only byte-order normalisation happens here: the checksum is *not*
    /// verified, so nothing decoded by this function should be trusted on its
    /// own.  Use [`Packet::decode`] for inbound datagrams.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let buf = buf.get(..HEADER_LEN).ok_or(PacketError::BufferTooShort)?;
        let mut reserved = [0u32; 3];
        for (i, word) in reserved.iter_mut().enumerate() {
            *word = read_u32(buf, OFF_RESERVED + i * 4);
        }
        Ok(Self {
            seq: read_u32(buf, OFF_SEQ),
            control: read_u16(buf, OFF_CONTROL),
            data_len: read_u32(buf, OFF_DATA_LEN),
            ack: read_u32(buf, OFF_ACK),
            window: read_u16(buf, OFF_WINDOW),
            reserved,
            checksum: read_u32(buf, OFF_CHECKSUM),
        })
    }

    /// `true` when the control field is exactly `expected`.
    pub fn is(&self, expected: u16) -> bool {
        self.control == expected
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

/// Header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// A payload-less segment.
    pub fn control(seq: u32, control: u16, ack: u32, window: u16) -> Self {
        Self {
            header: Header::new(seq, control, 0, ack, window),
            payload: Vec::new(),
        }
    }

    /// Wire bytes for this segment.
    ///
    /// `data_len` and `checksum` are derived from the payload; whatever the
    /// header held for them is overwritten.
    pub fn encode(&self) -> Vec<u8> {
        let mut header = self.header;
        header.data_len = self.payload.len() as u32;
        header.checksum = 0;

        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&self.payload);
        checksum::seal(&mut buf);
        buf
    }

    /// Verify and parse one received datagram.
    ///
    /// The datagram must be exactly header plus `data_len` bytes, and its CRC
    /// must match.
    pub fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        let header = Header::decode(datagram)?;
        let payload = &datagram[HEADER_LEN..];
        if payload.len() != header.data_len as usize {
            return Err(PacketError::LengthMismatch);
        }
        if !checksum::verify(datagram) {
            return Err(PacketError::ChecksumFailed);
        }
        Ok(Self {
            header,
            payload: payload.to_vec(),
        })
    }

    /// The first stream byte this segment carries.
    ///
    /// Data segments are numbered by the offset they advance *past*, so the
    /// start is recovered by subtracting the payload length.
    pub fn start_seq(&self) -> u32 {
        self.header.seq.wrapping_sub(self.header.data_len)
    }
}

/// Reasons a datagram is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("datagram shorter than a segment header")]
    BufferTooShort,
    #[error("data_len disagrees with the datagram size")]
    LengthMismatch,
    #[error("CRC-32 mismatch")]
    ChecksumFailed,
}
