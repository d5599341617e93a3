//! Protocol instance: sliding-window transport and the poll loop.
//!
//! A [`Link`] ties together the receiver state machine, the outgoing
//! frame FIFO and the window counters for one serial connection. It is
//! entirely poll-driven: the owner calls [`Link::poll`] with freshly
//! received bytes (or none), and the link advances retransmission and
//! acknowledgment timers from the injected [`Clock`]. There are no
//! background tasks; poll at least as often as the shortest timeout in
//! [`Config`].
//!
//! Multiple links (one per serial port) share no state and can run
//! side by side.

#[cfg(feature = "transport")]
use crate::fifo::{QueueError, TransportFifo};
use crate::frame::{Frame, FrameKind, MAX_WIRE_SIZE};
#[cfg(feature = "transport")]
use crate::frame::{MAX_ID, MAX_PAYLOAD};
use crate::rx::Receiver;
use crate::traits::{ByteSink, Clock, FrameHandler};

/// Which frames to resend when the retransmission timeout fires.
#[cfg(feature = "transport")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetransmitPolicy {
    /// Resend only the oldest unacknowledged frame per timeout. Bounds
    /// retransmission bursts on slow links.
    Oldest,
    /// Resend every unacknowledged frame, oldest first, as far as the
    /// send buffer allows (classic go-back-N).
    WholeWindow,
}

/// Transport timing and retransmission tunables.
#[cfg(feature = "transport")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Resend an unacknowledged frame after this long without an ack.
    pub retransmit_timeout_ms: u32,
    /// Re-send the current acknowledgment at this interval while the
    /// peer is active, in case the last one was lost.
    pub ack_interval_ms: u32,
    /// After this long without receiving anything the peer is considered
    /// gone and retransmission pauses until it speaks again.
    pub idle_timeout_ms: u32,
    pub retransmit_policy: RetransmitPolicy,
}

#[cfg(feature = "transport")]
impl Default for Config {
    fn default() -> Self {
        Self {
            retransmit_timeout_ms: 50,
            ack_interval_ms: 25,
            idle_timeout_ms: 1000,
            retransmit_policy: RetransmitPolicy::Oldest,
        }
    }
}

/// Diagnostic counters. Observability only; none of these feed back into
/// protocol decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    /// Frames abandoned by the receiver (corruption, bad length, missing
    /// EOF), plus reliable frames dropped when the transport layer is
    /// compiled out.
    pub dropped_frames: u32,
    /// Acks that did not advance the window.
    #[cfg(feature = "transport")]
    pub spurious_acks: u32,
    /// Reliable frames that arrived with an unexpected sequence number.
    #[cfg(feature = "transport")]
    pub sequence_mismatch_drops: u32,
    /// Reset requests received from the peer.
    #[cfg(feature = "transport")]
    pub resets_received: u32,
    /// Most FIFO slots ever occupied at once.
    #[cfg(feature = "transport")]
    pub max_queued_frames: u8,
    /// Most payload ring bytes ever occupied at once.
    #[cfg(feature = "transport")]
    pub max_queued_bytes: u16,
}

#[cfg(feature = "transport")]
#[derive(Debug)]
struct Transport<const SLOTS: usize, const BYTES: usize> {
    fifo: TransportFifo<SLOTS, BYTES>,
    /// Sequence number of the oldest unacknowledged frame (window floor).
    sn_min: u8,
    /// Next sequence number to assign to a newly queued frame.
    sn_max: u8,
    /// Next sequence number expected from the peer.
    rn: u8,
    /// Frames from the head already transmitted at least once; everything
    /// beyond is queued but has never been on the wire.
    sent_frames: u8,
    last_received_anything_ms: u32,
    last_received_frame_ms: u32,
    last_sent_ack_ms: u32,
    spurious_acks: u32,
    sequence_mismatch_drops: u32,
    resets_received: u32,
    config: Config,
}

#[cfg(feature = "transport")]
impl<const SLOTS: usize, const BYTES: usize> Transport<SLOTS, BYTES> {
    fn new(now: u32, config: Config) -> Self {
        Self {
            fifo: TransportFifo::new(),
            sn_min: 0,
            sn_max: 0,
            rn: 0,
            sent_frames: 0,
            last_received_anything_ms: now,
            last_received_frame_ms: now,
            last_sent_ack_ms: now,
            spurious_acks: 0,
            sequence_mismatch_drops: 0,
            resets_received: 0,
            config,
        }
    }
}

/// One serial link's protocol state, plus the collaborators driving it.
///
/// `SLOTS` bounds the number of reliable frames in flight and `BYTES`
/// their total payload; both must be powers of two. The defaults match a
/// 16-frame window over 1 KiB of payload storage.
pub struct Link<S, C, H, const SLOTS: usize = 16, const BYTES: usize = 1024>
where
    S: ByteSink,
    C: Clock,
    H: FrameHandler,
{
    sink: S,
    clock: C,
    handler: H,
    rx: Receiver,
    #[cfg(feature = "transport")]
    transport: Transport<SLOTS, BYTES>,
}

impl<S, C, H, const SLOTS: usize, const BYTES: usize> Link<S, C, H, SLOTS, BYTES>
where
    S: ByteSink,
    C: Clock,
    H: FrameHandler,
{
    /// Create a link with default transport tuning.
    pub fn new(sink: S, clock: C, handler: H) -> Self {
        #[cfg(feature = "transport")]
        return Self::with_config(sink, clock, handler, Config::default());

        #[cfg(not(feature = "transport"))]
        Self {
            sink,
            clock,
            handler,
            rx: Receiver::new(),
        }
    }

    /// Create a link with explicit transport tuning.
    #[cfg(feature = "transport")]
    pub fn with_config(sink: S, mut clock: C, handler: H, config: Config) -> Self {
        let now = clock.now_ms();
        Self {
            sink,
            clock,
            handler,
            rx: Receiver::new(),
            transport: Transport::new(now, config),
        }
    }

    /// Feed received bytes (possibly none) and run the transport state
    /// machine: deliver verified frames, transmit queued frames as send
    /// buffer space allows, evaluate retransmission and ack timers.
    ///
    /// Calling this with an empty slice is the only way timeouts are ever
    /// detected, so call it regularly even when the line is quiet.
    pub fn poll(&mut self, rx_bytes: &[u8]) {
        #[cfg(feature = "transport")]
        if !rx_bytes.is_empty() {
            self.transport.last_received_anything_ms = self.clock.now_ms();
        }

        for &byte in rx_bytes {
            if let Some(frame) = self.rx.feed(byte) {
                self.dispatch(frame);
            }
        }

        #[cfg(feature = "transport")]
        self.poll_transport();
    }

    /// Send a fire-and-forget frame. Returns `true` if the frame was
    /// handed to the sink; `false` means it was dropped (no room, or the
    /// frame was malformed) and will not be retried.
    pub fn send_plain(&mut self, id: u8, payload: &[u8]) -> bool {
        match Frame::plain(id, payload) {
            Ok(frame) => self.try_send(&frame),
            Err(_) => false,
        }
    }

    /// Queue a frame for guaranteed in-order delivery. The frame is
    /// assigned the next window sequence number and stays in the FIFO
    /// until the peer acknowledges it.
    ///
    /// Rejection is backpressure: retry after acks arrive or frames drain.
    #[cfg(feature = "transport")]
    pub fn queue_reliable(&mut self, id: u8, payload: &[u8]) -> Result<(), QueueError> {
        if id > MAX_ID {
            return Err(QueueError::InvalidId);
        }
        let seq = self.transport.sn_max;
        self.transport.fifo.push(id, seq, payload)?;
        self.transport.sn_max = self.transport.sn_max.wrapping_add(1);
        Ok(())
    }

    /// Whether a reliable frame with `payload_len` bytes would currently
    /// be accepted by [`queue_reliable`](Self::queue_reliable).
    #[cfg(feature = "transport")]
    pub fn has_space_for(&self, payload_len: usize) -> bool {
        self.transport.fifo.has_space_for(payload_len)
    }

    /// Abandon all in-flight reliable frames and return the window to
    /// sequence 0. With `notify_peer`, a reset frame is sent first so the
    /// other side re-synchronizes too.
    #[cfg(feature = "transport")]
    pub fn reset(&mut self, notify_peer: bool) {
        if notify_peer {
            let _ = self.try_send(&Frame::reset());
        }
        self.reset_transport_state();
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            dropped_frames: self.rx.dropped_frames(),
            #[cfg(feature = "transport")]
            spurious_acks: self.transport.spurious_acks,
            #[cfg(feature = "transport")]
            sequence_mismatch_drops: self.transport.sequence_mismatch_drops,
            #[cfg(feature = "transport")]
            resets_received: self.transport.resets_received,
            #[cfg(feature = "transport")]
            max_queued_frames: self.transport.fifo.slots_high_water(),
            #[cfg(feature = "transport")]
            max_queued_bytes: self.transport.fifo.bytes_high_water(),
        }
    }

    /// Reliable frames currently queued (unacknowledged plus unsent).
    #[cfg(feature = "transport")]
    pub fn queued_frames(&self) -> usize {
        usize::from(self.transport.fifo.len())
    }

    /// Payload bytes currently held in the ring for queued frames.
    #[cfg(feature = "transport")]
    pub fn queued_bytes(&self) -> usize {
        usize::from(self.transport.fifo.used_bytes())
    }

    /// Window floor: sequence of the oldest unacknowledged frame.
    #[cfg(feature = "transport")]
    pub fn sn_min(&self) -> u8 {
        self.transport.sn_min
    }

    /// Window head: next sequence to assign.
    #[cfg(feature = "transport")]
    pub fn sn_max(&self) -> u8 {
        self.transport.sn_max
    }

    /// Next sequence expected from the peer.
    #[cfg(feature = "transport")]
    pub fn rn(&self) -> u8 {
        self.transport.rn
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Route one verified frame off the receiver.
    fn dispatch(&mut self, frame: Frame) {
        #[cfg(feature = "transport")]
        {
            self.transport.last_received_frame_ms = self.clock.now_ms();
        }

        match frame.kind {
            FrameKind::Plain { id } => self.handler.on_frame(id, &frame.payload),
            #[cfg(feature = "transport")]
            FrameKind::Reliable { id, seq } => {
                if seq == self.transport.rn {
                    self.handler.on_frame(id, &frame.payload);
                    self.transport.rn = self.transport.rn.wrapping_add(1);
                    self.send_ack();
                } else {
                    // Not the frame we are waiting for. The sender's
                    // retransmission will close the gap; out-of-order
                    // frames are never buffered.
                    self.transport.sequence_mismatch_drops += 1;
                }
            }
            #[cfg(feature = "transport")]
            FrameKind::Ack { rn } => self.handle_ack(rn),
            #[cfg(feature = "transport")]
            FrameKind::Reset => {
                self.transport.resets_received += 1;
                self.reset_transport_state();
            }
            #[cfg(not(feature = "transport"))]
            FrameKind::Reliable { .. } | FrameKind::Ack { .. } | FrameKind::Reset => {
                // Transport layer compiled out: peer transport frames are
                // dropped.
                self.rx.count_dropped();
            }
        }
    }

    /// Process a cumulative acknowledgment: every frame older than
    /// `acked` leaves the FIFO and the window floor moves up to it.
    #[cfg(feature = "transport")]
    fn handle_ack(&mut self, acked: u8) {
        let t = &mut self.transport;
        let num_acked = acked.wrapping_sub(t.sn_min);
        let num_in_window = t.sn_max.wrapping_sub(t.sn_min);
        if num_acked == 0 || num_acked > num_in_window {
            t.spurious_acks += 1;
            return;
        }
        for _ in 0..num_acked {
            t.fifo.pop_head();
        }
        t.sn_min = acked;
        t.sent_frames = t.sent_frames.saturating_sub(num_acked);
    }

    #[cfg(feature = "transport")]
    fn send_ack(&mut self) {
        let ack = Frame::ack(self.transport.rn);
        if self.try_send(&ack) {
            self.transport.last_sent_ack_ms = self.clock.now_ms();
        }
    }

    #[cfg(feature = "transport")]
    fn reset_transport_state(&mut self) {
        let now = self.clock.now_ms();
        let t = &mut self.transport;
        t.fifo.clear();
        t.sn_min = 0;
        t.sn_max = 0;
        t.rn = 0;
        t.sent_frames = 0;
        t.last_received_anything_ms = now;
        t.last_received_frame_ms = now;
        t.last_sent_ack_ms = now;
    }

    /// Time-driven half of the poll: transmit one new frame if one is
    /// waiting, otherwise consider retransmission, then refresh the ack.
    #[cfg(feature = "transport")]
    fn poll_transport(&mut self) {
        let now = self.clock.now_ms();
        let config = self.transport.config;
        let remote_connected =
            now.wrapping_sub(self.transport.last_received_anything_ms) < config.idle_timeout_ms;
        let remote_active =
            now.wrapping_sub(self.transport.last_received_frame_ms) < config.idle_timeout_ms;

        if self.transport.sent_frames < self.transport.fifo.len() {
            // Queued frames that have never been transmitted go out first.
            let next = self.transport.sent_frames;
            self.send_queued(next, now);
        } else if !self.transport.fifo.is_empty() && remote_connected {
            let head_last_sent = match self.transport.fifo.get(0) {
                Some(frame) => frame.last_sent_ms,
                None => now,
            };
            if now.wrapping_sub(head_last_sent) >= config.retransmit_timeout_ms {
                match config.retransmit_policy {
                    RetransmitPolicy::Oldest => {
                        self.send_queued(0, now);
                    }
                    RetransmitPolicy::WholeWindow => {
                        for n in 0..self.transport.sent_frames {
                            if !self.send_queued(n, now) {
                                break;
                            }
                        }
                    }
                }
            }
        }

        // Keep the peer's window moving even if an earlier ack was lost.
        if remote_active
            && now.wrapping_sub(self.transport.last_sent_ack_ms) >= config.ack_interval_ms
        {
            self.send_ack();
        }
    }

    /// Put the nth queued frame on the wire, stamping its send time.
    #[cfg(feature = "transport")]
    fn send_queued(&mut self, n: u8, now: u32) -> bool {
        let queued = match self.transport.fifo.get(n) {
            Some(frame) => *frame,
            None => return false,
        };
        let mut payload = [0u8; MAX_PAYLOAD];
        self.transport.fifo.read_payload(&queued, &mut payload);

        let frame = match Frame::reliable(
            queued.id,
            queued.seq,
            &payload[..usize::from(queued.payload_len)],
        ) {
            Ok(frame) => frame,
            Err(_) => return false,
        };
        if !self.try_send(&frame) {
            return false;
        }

        if let Some(slot) = self.transport.fifo.get_mut(n) {
            slot.last_sent_ms = now;
        }
        if n == self.transport.sent_frames {
            self.transport.sent_frames += 1;
        }
        true
    }

    /// Encode and hand a whole frame to the sink, or nothing at all:
    /// a frame is only started when the sink can take every byte of it.
    fn try_send(&mut self, frame: &Frame) -> bool {
        let mut buffer = [0u8; MAX_WIRE_SIZE];
        let len = match frame.encode(&mut buffer) {
            Ok(len) => len,
            Err(_) => return false,
        };
        if len > usize::from(self.sink.tx_space()) {
            return false;
        }

        self.sink.tx_start();
        for &byte in &buffer[..len] {
            self.sink.tx_byte(byte);
        }
        self.sink.tx_finished();
        true
    }
}


#[cfg(all(test, not(feature = "transport")))]
mod plain_only_tests {
    use super::*;
    use std::vec::Vec;

    struct TestSink {
        bytes: Vec<u8>,
        space: u16,
    }

    impl ByteSink for TestSink {
        fn tx_space(&mut self) -> u16 {
            self.space
        }

        fn tx_byte(&mut self, byte: u8) {
            self.bytes.push(byte);
        }
    }

    struct TestClock;

    impl Clock for TestClock {
        fn now_ms(&mut self) -> u32 {
            0
        }
    }

    #[derive(Default)]
    struct TestHandler {
        frames: Vec<(u8, Vec<u8>)>,
    }

    impl FrameHandler for TestHandler {
        fn on_frame(&mut self, id: u8, payload: &[u8]) {
            self.frames.push((id, payload.to_vec()));
        }
    }

    fn test_link() -> Link<TestSink, TestClock, TestHandler> {
        Link::new(
            TestSink {
                bytes: Vec::new(),
                space: 4096,
            },
            TestClock,
            TestHandler::default(),
        )
    }

    #[test]
    fn test_plain_frames_still_delivered() {
        let mut link = test_link();
        let frame = Frame::plain(42, &[9, 9]).unwrap();
        link.poll(&frame.encode_to_vec().unwrap());

        assert_eq!(link.handler().frames, [(42, Vec::from([9, 9]))]);
        assert!(link.send_plain(1, &[1]));
    }

    #[test]
    fn test_reliable_frames_dropped_without_transport() {
        let mut link = test_link();
        link.poll(&Frame::reliable(3, 0, &[7]).unwrap().encode_to_vec().unwrap());

        assert!(link.handler().frames.is_empty());
        assert_eq!(link.stats().dropped_frames, 1);
    }
}
