//! Frame model and wire codec.
//!
//! Wire layout:
//! - HEADER (3 bytes): `AA AA AA` synchronization pattern
//! - ID/CONTROL (1 byte): bit 7 set marks a reliable frame; `FF` is a
//!   cumulative acknowledgment, `FE` a transport reset; the identifier
//!   occupies the low 6 bits
//! - SEQ (1 byte, reliable/ack/reset only): sequence number, or the
//!   acknowledged sequence for acks
//! - LENGTH (1 byte): payload length (0–254)
//! - PAYLOAD (0–254 bytes)
//! - CRC32 (4 bytes, big-endian): checksum of ID/CONTROL, SEQ (if
//!   present), LENGTH and PAYLOAD, computed before stuffing
//! - EOF (1 byte): `55`
//!
//! Everything from ID/CONTROL through the last checksum byte is byte
//! stuffed: after two consecutive `AA` bytes on the wire, a `55` stuff
//! byte is inserted so the header pattern cannot reappear inside a frame.

use heapless::Vec;

use crate::crc::Crc32;

/// Frame synchronization byte; three in a row start a frame.
pub const HEADER_BYTE: u8 = 0xAA;

/// Stuff byte inserted after two consecutive header bytes in a frame body.
pub const STUFF_BYTE: u8 = 0x55;

/// End-of-frame byte.
pub const EOF_BYTE: u8 = 0x55;

/// Maximum payload size in bytes.
pub const MAX_PAYLOAD: usize = 254;

/// Largest frame identifier (identifiers occupy 6 bits).
pub const MAX_ID: u8 = 63;

/// Maximum encoded frame size: header, worst-case stuffed body (one stuff
/// byte per two body bytes), EOF.
pub const MAX_WIRE_SIZE: usize = 3 + (MAX_PAYLOAD + 7) + (MAX_PAYLOAD + 7) / 2 + 1;

// ID/CONTROL encoding.
const ID_MASK: u8 = 0x3F;
const RELIABLE_FLAG: u8 = 0x80;
const ACK: u8 = 0xFF;
const RESET: u8 = 0xFE;

/// Errors that can occur when constructing or encoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Payload exceeds [`MAX_PAYLOAD`]
    PayloadTooLarge,
    /// Identifier does not fit in 6 bits
    InvalidId,
    /// Destination buffer too small for the encoded frame
    BufferTooSmall,
}

/// What a frame is, as encoded in its ID/CONTROL and SEQ bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    /// Fire-and-forget application frame
    Plain { id: u8 },
    /// Sequenced application frame subject to acknowledgment and
    /// retransmission
    Reliable { id: u8, seq: u8 },
    /// Cumulative acknowledgment: every frame older than `rn` is received
    Ack { rn: u8 },
    /// Transport reset request
    Reset,
}

impl FrameKind {
    pub(crate) fn id_control(&self) -> u8 {
        match *self {
            FrameKind::Plain { id } => id & ID_MASK,
            FrameKind::Reliable { id, .. } => RELIABLE_FLAG | (id & ID_MASK),
            FrameKind::Ack { .. } => ACK,
            FrameKind::Reset => RESET,
        }
    }

    /// The SEQ byte, if this kind carries one on the wire.
    pub(crate) fn seq_byte(&self) -> Option<u8> {
        match *self {
            FrameKind::Plain { .. } => None,
            FrameKind::Reliable { seq, .. } => Some(seq),
            FrameKind::Ack { rn } => Some(rn),
            FrameKind::Reset => Some(0),
        }
    }

    /// Reconstruct the kind from received ID/CONTROL and SEQ bytes.
    pub(crate) fn from_wire(id_control: u8, seq: u8) -> Self {
        match id_control {
            ACK => FrameKind::Ack { rn: seq },
            RESET => FrameKind::Reset,
            ic if ic & RELIABLE_FLAG != 0 => FrameKind::Reliable {
                id: ic & ID_MASK,
                seq,
            },
            ic => FrameKind::Plain { id: ic & ID_MASK },
        }
    }

    /// True when the wire form carries a SEQ byte.
    pub(crate) fn has_seq(&self) -> bool {
        !matches!(self, FrameKind::Plain { .. })
    }
}

/// A parsed or constructed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

impl Frame {
    fn with_payload(kind: FrameKind, payload: &[u8]) -> Result<Self, FrameError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(payload)
            .map_err(|_| FrameError::PayloadTooLarge)?;
        Ok(Self { kind, payload: buf })
    }

    /// Create a fire-and-forget frame.
    pub fn plain(id: u8, payload: &[u8]) -> Result<Self, FrameError> {
        if id > MAX_ID {
            return Err(FrameError::InvalidId);
        }
        Self::with_payload(FrameKind::Plain { id }, payload)
    }

    /// Create a sequenced reliable frame.
    pub fn reliable(id: u8, seq: u8, payload: &[u8]) -> Result<Self, FrameError> {
        if id > MAX_ID {
            return Err(FrameError::InvalidId);
        }
        Self::with_payload(FrameKind::Reliable { id, seq }, payload)
    }

    /// Create a cumulative acknowledgment for every sequence older than `rn`.
    pub fn ack(rn: u8) -> Self {
        Self {
            kind: FrameKind::Ack { rn },
            payload: Vec::new(),
        }
    }

    /// Create a transport reset request.
    pub fn reset() -> Self {
        Self {
            kind: FrameKind::Reset,
            payload: Vec::new(),
        }
    }

    /// On-wire size before stuffing: header, ID/CONTROL, SEQ (if any),
    /// LENGTH, payload, checksum, EOF. Stuffing can add up to one byte per
    /// two body bytes on top of this.
    pub fn wire_size(&self) -> usize {
        3 + 1 + usize::from(self.kind.has_seq()) + 1 + self.payload.len() + 4 + 1
    }

    /// Encode this frame into a byte buffer.
    ///
    /// Returns the number of bytes written, including any stuff bytes.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let mut crc = Crc32::new();
        let mut out = StuffedWriter::new(buffer);

        for _ in 0..3 {
            out.raw(HEADER_BYTE)?;
        }

        let id_control = self.kind.id_control();
        out.stuffed(id_control)?;
        crc.step(id_control);

        if let Some(seq) = self.kind.seq_byte() {
            out.stuffed(seq)?;
            crc.step(seq);
        }

        let length = self.payload.len() as u8;
        out.stuffed(length)?;
        crc.step(length);

        for &byte in &self.payload {
            out.stuffed(byte)?;
            crc.step(byte);
        }

        for byte in crc.finalize().to_be_bytes() {
            out.stuffed(byte)?;
        }

        out.raw(EOF_BYTE)?;
        Ok(out.written())
    }

    /// Encode this frame into a heapless Vec.
    pub fn encode_to_vec(&self) -> Result<Vec<u8, MAX_WIRE_SIZE>, FrameError> {
        let mut buffer = [0u8; MAX_WIRE_SIZE];
        let len = self.encode(&mut buffer)?;
        let mut vec = Vec::new();
        vec.extend_from_slice(&buffer[..len])
            .map_err(|_| FrameError::BufferTooSmall)?;
        Ok(vec)
    }
}

/// Writer that inserts a stuff byte after two consecutive header bytes.
struct StuffedWriter<'a> {
    out: &'a mut [u8],
    pos: usize,
    header_run: u8,
}

impl<'a> StuffedWriter<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        Self {
            out,
            pos: 0,
            header_run: 0,
        }
    }

    /// Write a byte outside the stuffed region (header, EOF).
    fn raw(&mut self, byte: u8) -> Result<(), FrameError> {
        if self.pos >= self.out.len() {
            return Err(FrameError::BufferTooSmall);
        }
        self.out[self.pos] = byte;
        self.pos += 1;
        Ok(())
    }

    /// Write a body byte, inserting a stuff byte after two header bytes.
    fn stuffed(&mut self, byte: u8) -> Result<(), FrameError> {
        self.raw(byte)?;
        if byte == HEADER_BYTE {
            self.header_run += 1;
            if self.header_run == 2 {
                self.raw(STUFF_BYTE)?;
                self.header_run = 0;
            }
        } else {
            self.header_run = 0;
        }
        Ok(())
    }

    fn written(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_plain_frame() {
        let frame = Frame::plain(42, &[9, 9]).unwrap();
        let mut buffer = [0u8; MAX_WIRE_SIZE];
        let len = frame.encode(&mut buffer).unwrap();

        // CRC32 over [2A, 02, 09, 09] is 0x455147C5, no stuffing triggered.
        assert_eq!(
            &buffer[..len],
            &[0xAA, 0xAA, 0xAA, 0x2A, 0x02, 0x09, 0x09, 0x45, 0x51, 0x47, 0xC5, 0x55]
        );
    }

    #[test]
    fn test_encode_ack_frame() {
        let frame = Frame::ack(1);
        let encoded = frame.encode_to_vec().unwrap();

        // CRC32 over [FF, 01, 00] is 0x58C2DCBE.
        assert_eq!(
            &encoded[..],
            &[0xAA, 0xAA, 0xAA, 0xFF, 0x01, 0x00, 0x58, 0xC2, 0xDC, 0xBE, 0x55]
        );
    }

    #[test]
    fn test_encode_reliable_frame() {
        let frame = Frame::reliable(7, 0, &[1, 2, 3]).unwrap();
        let encoded = frame.encode_to_vec().unwrap();

        assert_eq!(
            &encoded[..],
            &[0xAA, 0xAA, 0xAA, 0x87, 0x00, 0x03, 0x01, 0x02, 0x03, 0x0A, 0x3F, 0x73, 0x22, 0x55]
        );
    }

    #[test]
    fn test_header_pattern_in_payload_is_stuffed() {
        let frame = Frame::plain(1, &[0xAA, 0xAA, 0xAA, 0xAA]).unwrap();
        let encoded = frame.encode_to_vec().unwrap();

        // A stuff byte lands after each AA pair in the body; the checksum
        // bytes for this frame are 1B CC EB 84.
        assert_eq!(
            &encoded[..],
            &[
                0xAA, 0xAA, 0xAA, 0x01, 0x04, 0xAA, 0xAA, 0x55, 0xAA, 0xAA, 0x55, 0x1B, 0xCC,
                0xEB, 0x84, 0x55
            ]
        );
    }

    #[test]
    fn test_wire_size() {
        assert_eq!(Frame::plain(1, &[0; 10]).unwrap().wire_size(), 3 + 2 + 10 + 4 + 1);
        assert_eq!(
            Frame::reliable(1, 0, &[0; 10]).unwrap().wire_size(),
            3 + 3 + 10 + 4 + 1
        );
        assert_eq!(Frame::ack(0).wire_size(), 3 + 3 + 4 + 1);
    }

    #[test]
    fn test_payload_too_large() {
        let oversized = [0u8; MAX_PAYLOAD + 1];
        assert_eq!(Frame::plain(1, &oversized), Err(FrameError::PayloadTooLarge));
        assert_eq!(
            Frame::reliable(1, 0, &oversized),
            Err(FrameError::PayloadTooLarge)
        );
    }

    #[test]
    fn test_invalid_id() {
        assert_eq!(Frame::plain(64, &[]), Err(FrameError::InvalidId));
        assert_eq!(Frame::reliable(255, 0, &[]), Err(FrameError::InvalidId));
    }

    #[test]
    fn test_buffer_too_small() {
        let frame = Frame::plain(1, &[1, 2, 3]).unwrap();
        let mut buffer = [0u8; 4];
        assert_eq!(frame.encode(&mut buffer), Err(FrameError::BufferTooSmall));
    }

    #[test]
    fn test_kind_wire_roundtrip() {
        let kinds = [
            FrameKind::Plain { id: 17 },
            FrameKind::Reliable { id: 63, seq: 200 },
            FrameKind::Ack { rn: 5 },
            FrameKind::Reset,
        ];
        for kind in kinds {
            let seq = kind.seq_byte().unwrap_or(0);
            assert_eq!(FrameKind::from_wire(kind.id_control(), seq), kind);
        }
    }
}
