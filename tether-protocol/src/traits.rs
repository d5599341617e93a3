//! Collaborator contracts.
//!
//! The protocol core drives a serial transmitter, reads a clock, and hands
//! received frames to the application, but owns none of that machinery.
//! These traits define the seams; implementations are injected at
//! [`Link`](crate::Link) construction, which keeps the core deterministic
//! under test (fake clocks, capturing sinks).
//!
//! All methods are synchronous and must not block: the core is polled
//! cooperatively and never waits.

/// Outgoing byte stream, typically a UART transmit driver.
pub trait ByteSink {
    /// Number of bytes the send buffer can currently accept. The core
    /// only starts a frame it can hand over whole, which avoids doomed
    /// partial transmissions on a congested line.
    fn tx_space(&mut self) -> u16;

    /// Send one byte.
    fn tx_byte(&mut self, byte: u8);

    /// Called before the first byte of a frame. Useful for batching bytes
    /// into a single driver call.
    fn tx_start(&mut self) {}

    /// Called after the last byte of a frame.
    fn tx_finished(&mut self) {}
}

/// Monotonic millisecond clock.
pub trait Clock {
    /// Current time in milliseconds. Must be non-decreasing; wrapping at
    /// u32::MAX is fine, all timeout arithmetic is wrap-safe.
    fn now_ms(&mut self) -> u32;
}

/// Application-side consumer of received frames.
pub trait FrameHandler {
    /// A validated frame arrived. Reliable frames are delivered in order,
    /// exactly once; plain frames whenever they survive the wire. Called
    /// synchronously from within [`Link::poll`](crate::Link::poll).
    fn on_frame(&mut self, id: u8, payload: &[u8]);
}
