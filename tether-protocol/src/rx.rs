//! Byte-at-a-time receiver state machine.
//!
//! Consumes an arbitrary incoming byte stream, recovers frame boundaries
//! via the three-byte header pattern, removes stuff bytes, and emits only
//! checksum-verified frames. Corruption is expected on the wire: every
//! validation failure silently abandons the frame in progress, bumps the
//! `dropped_frames` counter and resumes scanning for the next header.

use heapless::Vec;

use crate::crc::Crc32;
use crate::frame::{Frame, FrameKind, EOF_BYTE, HEADER_BYTE, MAX_PAYLOAD, STUFF_BYTE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Waiting for the header pattern
    SeekingHeader,
    /// Header seen, waiting for ID/CONTROL
    IdControl,
    /// Reliable frame, waiting for SEQ
    Seq,
    /// Waiting for LENGTH
    Length,
    /// Reading payload bytes
    Payload,
    /// Reading the four checksum bytes, most significant first
    Checksum { remaining: u8 },
    /// Checksum verified, waiting for EOF
    Eof,
}

/// Receiver context for one serial link.
///
/// Each protocol instance owns its own receiver; no parse state is shared,
/// so any number of links can run independently.
#[derive(Debug, Clone)]
pub struct Receiver {
    state: RxState,
    /// Consecutive header bytes seen; two in a row mean the next byte is
    /// either a third header byte (frame restart) or a stuff byte.
    header_seen: u8,
    id_control: u8,
    seq: u8,
    frame_length: u8,
    payload: Vec<u8, MAX_PAYLOAD>,
    crc: Crc32,
    wire_checksum: u32,
    dropped_frames: u32,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    pub fn new() -> Self {
        Self {
            state: RxState::SeekingHeader,
            header_seen: 0,
            id_control: 0,
            seq: 0,
            frame_length: 0,
            payload: Vec::new(),
            crc: Crc32::new(),
            wire_checksum: 0,
            dropped_frames: 0,
        }
    }

    /// Frames abandoned due to corruption: bad length, checksum mismatch,
    /// missing EOF, or a header pattern interrupting a frame in progress.
    pub fn dropped_frames(&self) -> u32 {
        self.dropped_frames
    }

    #[cfg(not(feature = "transport"))]
    pub(crate) fn count_dropped(&mut self) {
        self.dropped_frames += 1;
    }

    /// Feed one received byte. Returns a frame only when a complete,
    /// checksum-valid frame has been assembled.
    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        // Two header bytes in a row put the next byte under escape rules:
        // a third header byte is a genuine frame start (even mid-frame), a
        // stuff byte is discarded, anything else is a framing error.
        if self.header_seen == 2 {
            self.header_seen = 0;
            match byte {
                HEADER_BYTE => {
                    self.restart_frame();
                    return None;
                }
                STUFF_BYTE => return None,
                _ => {
                    self.abandon();
                    return None;
                }
            }
        }

        if byte == HEADER_BYTE {
            self.header_seen += 1;
        } else {
            self.header_seen = 0;
        }

        match self.state {
            // Only the header pattern above can start a frame.
            RxState::SeekingHeader => None,
            RxState::IdControl => {
                self.id_control = byte;
                self.crc.step(byte);
                self.state = if byte & 0x80 != 0 {
                    RxState::Seq
                } else {
                    RxState::Length
                };
                None
            }
            RxState::Seq => {
                self.seq = byte;
                self.crc.step(byte);
                self.state = RxState::Length;
                None
            }
            RxState::Length => {
                self.crc.step(byte);
                if usize::from(byte) > MAX_PAYLOAD {
                    self.abandon();
                    return None;
                }
                self.frame_length = byte;
                self.state = if byte == 0 {
                    RxState::Checksum { remaining: 4 }
                } else {
                    RxState::Payload
                };
                None
            }
            RxState::Payload => {
                self.crc.step(byte);
                // Cannot overflow: frame_length is bounded by MAX_PAYLOAD.
                let _ = self.payload.push(byte);
                if self.payload.len() == usize::from(self.frame_length) {
                    self.state = RxState::Checksum { remaining: 4 };
                }
                None
            }
            RxState::Checksum { remaining } => {
                self.wire_checksum = (self.wire_checksum << 8) | u32::from(byte);
                if remaining > 1 {
                    self.state = RxState::Checksum {
                        remaining: remaining - 1,
                    };
                } else if self.wire_checksum == self.crc.finalize() {
                    self.state = RxState::Eof;
                } else {
                    self.abandon();
                }
                None
            }
            RxState::Eof => {
                let frame = if byte == EOF_BYTE {
                    Some(Frame {
                        kind: FrameKind::from_wire(self.id_control, self.seq),
                        payload: self.payload.clone(),
                    })
                } else {
                    self.dropped_frames += 1;
                    None
                };
                self.state = RxState::SeekingHeader;
                frame
            }
        }
    }

    /// Begin assembling a frame after the header pattern. A frame already
    /// in progress is abandoned and counted.
    fn restart_frame(&mut self) {
        if self.state != RxState::SeekingHeader {
            self.dropped_frames += 1;
        }
        self.state = RxState::IdControl;
        self.payload.clear();
        self.crc.init();
        self.wire_checksum = 0;
    }

    /// Drop the frame in progress and resume scanning for a header.
    fn abandon(&mut self) {
        if self.state != RxState::SeekingHeader {
            self.dropped_frames += 1;
        }
        self.state = RxState::SeekingHeader;
    }
}

/// Decode a single frame from a byte slice.
///
/// Convenience wrapper over [`Receiver`] for one-shot use; returns the
/// first valid frame found, or `None` if the bytes contain no complete,
/// checksum-valid frame.
pub fn decode(bytes: &[u8]) -> Option<Frame> {
    let mut rx = Receiver::new();
    for &byte in bytes {
        if let Some(frame) = rx.feed(byte) {
            return Some(frame);
        }
    }
    None
}
