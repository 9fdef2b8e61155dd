//! Sliding send window, cumulative ACK processing, and per-segment RTO
//! retransmission, per spec §4.3.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::channel::DatagramChannel;
use crate::segment::Segment;

struct Buffered {
    bytes: Vec<u8>,
    timer_started_at: Instant,
}

pub struct ReliabilityLayer {
    send_base: u32,
    next_seq_num: u32,
    window_size: u32,
    timeout_interval: Duration,
    buffer: BTreeMap<u32, Buffered>,
}

impl ReliabilityLayer {
    pub fn new(initial_seq: u32, window_size: u32, timeout_interval: Duration) -> Self {
        ReliabilityLayer {
            send_base: initial_seq,
            next_seq_num: initial_seq,
            window_size: window_size.max(1),
            timeout_interval,
            buffer: BTreeMap::new(),
        }
    }

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    pub fn next_seq_num(&self) -> u32 {
        self.next_seq_num
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn can_send(&self) -> bool {
        (self.next_seq_num.wrapping_sub(self.send_base) as u64) < self.window_size as u64
    }

    /// Assigns `segment.seq_num`, transmits it, and buffers it for
    /// retransmission. Returns false without sending if the window is full.
    pub fn submit(&mut self, mut segment: Segment, channel: &DatagramChannel) -> bool {
        if !self.can_send() {
            return false;
        }

        segment.seq_num = self.next_seq_num;
        let bytes = segment.serialize();

        let _ = channel.send(&bytes);

        self.buffer.insert(
            self.next_seq_num,
            Buffered {
                bytes,
                timer_started_at: Instant::now(),
            },
        );
        self.next_seq_num = self.next_seq_num.wrapping_add(1);
        true
    }

    /// Processes a cumulative ACK. Returns the number of segments newly
    /// acknowledged (0 for a stale/duplicate/regressing ACK).
    pub fn on_ack(&mut self, ack_num: u32) -> u32 {
        if !wrapping_gt(ack_num, self.send_base) {
            return 0;
        }

        let acked = ack_num.wrapping_sub(self.send_base);
        self.buffer.retain(|&seq, _| !in_range(self.send_base, ack_num, seq));
        self.send_base = ack_num;
        acked
    }

    /// Retransmits any segment whose timer has exceeded `timeout_interval`.
    /// Returns true iff at least one retransmission occurred.
    pub fn tick(&mut self, channel: &DatagramChannel) -> bool {
        let now = Instant::now();
        let mut fired = false;

        for buffered in self.buffer.values_mut() {
            if now.duration_since(buffered.timer_started_at) > self.timeout_interval {
                let _ = channel.send(&buffered.bytes);
                buffered.timer_started_at = now;
                fired = true;
            }
        }

        fired
    }

    /// Retransmits a specific buffered segment (fast retransmit). A silent
    /// no-op if `seq` is not currently buffered.
    pub fn retransmit(&mut self, seq: u32, channel: &DatagramChannel) {
        if let Some(buffered) = self.buffer.get_mut(&seq) {
            let _ = channel.send(&buffered.bytes);
            buffered.timer_started_at = Instant::now();
        }
    }

    pub fn set_window_size(&mut self, size: u32) {
        self.window_size = size.max(1);
    }
}

fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs) > (1 << 31)
}

fn wrapping_gt(lhs: u32, rhs: u32) -> bool {
    wrapping_lt(rhs, lhs)
}

/// True iff `x` lies in the half-open, wraparound-aware range `[start, end)`.
fn in_range(start: u32, end: u32, x: u32) -> bool {
    x.wrapping_sub(start) < end.wrapping_sub(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    fn test_channel() -> DatagramChannel {
        let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
        let mut ch =
            DatagramChannel::bind(addr, None, crate::channel::SimParams::default()).unwrap();
        ch.set_peer(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 1));
        ch.disable_handshake_guard();
        ch
    }

    #[test]
    fn can_send_respects_window_size() {
        let mut rel = ReliabilityLayer::new(1, 2, Duration::from_secs(1));
        let ch = test_channel();

        assert!(rel.can_send());
        rel.submit(Segment::new(0, 0, 0, 1024, vec![1]), &ch);
        assert!(rel.can_send());
        rel.submit(Segment::new(0, 0, 0, 1024, vec![2]), &ch);
        assert!(!rel.can_send());
    }

    #[test]
    fn on_ack_advances_send_base_and_drains_buffer() {
        let mut rel = ReliabilityLayer::new(1, 10, Duration::from_secs(1));
        let ch = test_channel();

        for i in 0..5u8 {
            rel.submit(Segment::new(0, 0, 0, 1024, vec![i]), &ch);
        }
        assert_eq!(rel.next_seq_num(), 6);

        let acked = rel.on_ack(4);
        assert_eq!(acked, 3);
        assert_eq!(rel.send_base(), 4);
        assert!(!rel.is_empty());
    }

    #[test]
    fn duplicate_ack_is_idempotent_noop() {
        let mut rel = ReliabilityLayer::new(1, 10, Duration::from_secs(1));
        let ch = test_channel();
        rel.submit(Segment::new(0, 0, 0, 1024, vec![1]), &ch);
        rel.submit(Segment::new(0, 0, 0, 1024, vec![2]), &ch);

        assert_eq!(rel.on_ack(2), 1);
        assert_eq!(rel.on_ack(2), 0);
        assert_eq!(rel.on_ack(1), 0);
        assert_eq!(rel.send_base(), 2);
    }

    #[test]
    fn tick_retransmits_only_after_timeout_elapses() {
        let mut rel = ReliabilityLayer::new(1, 10, Duration::from_millis(10));
        let ch = test_channel();
        rel.submit(Segment::new(0, 0, 0, 1024, vec![1]), &ch);

        assert!(!rel.tick(&ch));
        std::thread::sleep(Duration::from_millis(20));
        assert!(rel.tick(&ch));
    }

    #[test]
    fn retransmit_of_unbuffered_seq_is_silent_noop() {
        let mut rel = ReliabilityLayer::new(1, 10, Duration::from_secs(1));
        let ch = test_channel();
        rel.retransmit(999, &ch); // must not panic
    }

    #[test]
    fn buffer_key_set_matches_send_base_to_next_seq_invariant() {
        let mut rel = ReliabilityLayer::new(1, 10, Duration::from_secs(1));
        let ch = test_channel();
        for i in 0..4u8 {
            rel.submit(Segment::new(0, 0, 0, 1024, vec![i]), &ch);
        }
        rel.on_ack(3);

        let expected: Vec<u32> = (rel.send_base()..rel.next_seq_num()).collect();
        let actual: Vec<u32> = rel.buffer.keys().copied().collect();
        assert_eq!(expected, actual);
    }
}
