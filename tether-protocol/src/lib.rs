//! Tether serial link protocol
//!
//! This crate moves application frames across an unreliable byte stream (a
//! UART, a UART-USB converter, any serial pipe) between two peers. It is
//! built for constrained devices: all state lives in fixed-capacity buffers
//! owned by a single [`Link`] instance, and nothing allocates.
//!
//! # Frame format
//!
//! All frames share one binary layout:
//! ```text
//! ┌──────────┬────────────┬───────┬────────┬──────────┬───────┬─────┐
//! │ HEADER   │ ID/CONTROL │ [SEQ] │ LENGTH │ PAYLOAD  │ CRC32 │ EOF │
//! │ AA AA AA │ 1B         │ 0–1B  │ 1B     │ 0–254B   │ 4B    │ 55  │
//! └──────────┴────────────┴───────┴────────┴──────────┴───────┴─────┘
//! ```
//!
//! Every byte from ID/CONTROL through the last checksum byte is passed
//! through a byte-stuffing transform: after two consecutive `AA` bytes on
//! the wire a `55` stuff byte is inserted, so the three-byte header pattern
//! can only ever appear at a genuine frame boundary. The receiver uses this
//! to resynchronize after corruption or a mid-stream attach.
//!
//! # Plain and reliable frames
//!
//! *Plain* frames (identifier 0–63) are fire-and-forget: sent once, dropped
//! if the line is noisy. *Reliable* frames carry a sequence number and are
//! retransmitted by the sliding-window transport layer (the `transport`
//! feature, on by default) until the peer acknowledges them; delivery is
//! in-order, at-least-once on the wire, exactly-once to the application.
//! Builds without `transport` drop any reliable frame a peer sends.
//!
//! The core is poll-driven: it starts no tasks and owns no timers. Call
//! [`Link::poll`] with whatever bytes have arrived (possibly none) at least
//! as often as the shortest configured timeout.

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

pub mod frame;
pub mod link;
pub mod rx;
pub mod traits;

mod crc;
#[cfg(feature = "transport")]
mod fifo;
#[cfg(feature = "transport")]
mod ring;

pub use frame::{
    Frame, FrameError, FrameKind, EOF_BYTE, HEADER_BYTE, MAX_ID, MAX_PAYLOAD, MAX_WIRE_SIZE,
    STUFF_BYTE,
};
#[cfg(feature = "transport")]
pub use fifo::QueueError;
#[cfg(feature = "transport")]
pub use link::{Config, RetransmitPolicy};
pub use link::{Link, LinkStats};
pub use rx::{decode, Receiver};
pub use traits::{ByteSink, Clock, FrameHandler};
