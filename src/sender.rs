//! Sender connection state machine: handshake, file streaming under the
//! combined send/congestion window, and four-way teardown. Per spec §4.5.

use std::io::Read;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::channel::{DatagramChannel, SimParams};
use crate::congestion::CongestionController;
use crate::error::{Result, TransportError};
use crate::reliability::ReliabilityLayer;
use crate::segment::{Flags, Segment, MAX_PAYLOAD_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Closed,
    SynSent,
    Established,
    FinWait1,
    FinWait2,
    TimeWait,
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub rto: Duration,
    pub ack_poll_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_handshake_attempts: u32,
    pub teardown_timeout: Duration,
    pub max_teardown_attempts: u32,
    pub drain_budget: Duration,
    pub mss: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            rto: Duration::from_secs(1),
            ack_poll_timeout: Duration::from_millis(10),
            handshake_timeout: Duration::from_secs(5),
            max_handshake_attempts: 5,
            teardown_timeout: Duration::from_secs(1),
            max_teardown_attempts: 5,
            drain_budget: Duration::from_secs(20),
            mss: MAX_PAYLOAD_LEN,
        }
    }
}

pub struct Sender<R: Read> {
    channel: DatagramChannel,
    state: SenderState,
    reliability: Option<ReliabilityLayer>,
    congestion: CongestionController,
    source: R,
    config: SenderConfig,
}

impl<R: Read> Sender<R> {
    pub fn new(
        local_addr: SocketAddr,
        sim: SimParams,
        source: R,
        config: SenderConfig,
    ) -> Result<Self> {
        let channel = DatagramChannel::bind(local_addr, None, sim)?;
        Ok(Sender {
            channel,
            state: SenderState::Closed,
            reliability: None,
            congestion: CongestionController::new(),
            source,
            config,
        })
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Runs the connection to completion: handshake, transfer, teardown.
    pub fn run(&mut self, remote: SocketAddr) -> Result<()> {
        self.handshake(remote)?;
        self.transfer()?;
        self.teardown()?;
        Ok(())
    }

    fn handshake(&mut self, remote: SocketAddr) -> Result<()> {
        self.channel.set_peer(remote);
        self.state = SenderState::SynSent;

        let syn = Segment::new(0, 0, Flags::SYN, 0, Vec::new());

        for attempt in 1..=self.config.max_handshake_attempts {
            log::info!("sending SYN to {remote} (attempt {attempt})");
            self.channel.send(&syn.serialize())?;

            match self.channel.receive(self.config.handshake_timeout) {
                Ok((bytes, from)) => match Segment::deserialize(&bytes) {
                    Ok(seg) if seg.flags.syn() && seg.flags.ack() && seg.ack_num == 1 => {
                        self.channel.set_peer(from);

                        let ack = Segment::new(1, seg.seq_num.wrapping_add(1), Flags::ACK, 0, Vec::new());
                        self.channel.send(&ack.serialize())?;

                        self.reliability = Some(ReliabilityLayer::new(1, 1, self.config.rto));
                        self.channel.disable_handshake_guard();
                        self.state = SenderState::Established;
                        log::info!("handshake established with {from}");
                        return Ok(());
                    }
                    _ => {
                        log::debug!("ignoring malformed/unexpected handshake reply");
                        continue;
                    }
                },
                Err(TransportError::TimedOut) => continue,
                Err(e) => return Err(e),
            }
        }

        self.state = SenderState::Closed;
        Err(TransportError::MalformedHandshake {
            peer: remote,
            detail: "no SYN-ACK received within handshake budget".into(),
        })
    }

    fn transfer(&mut self) -> Result<()> {
        let reliability = self
            .reliability
            .as_mut()
            .expect("transfer called before handshake completed");

        let mut buf = vec![0u8; self.config.mss];
        let mut eof = false;
        let mut last_progress_at = Instant::now();

        while !(eof && reliability.is_empty()) {
            reliability.set_window_size(self.congestion.window());

            while !eof && reliability.can_send() {
                let n = self.source.read(&mut buf)?;
                if n == 0 {
                    eof = true;
                    break;
                }

                let segment = Segment::new(0, 0, Flags::ACK, 0, buf[..n].to_vec());
                reliability.submit(segment, &self.channel);
            }

            match self.channel.receive(self.config.ack_poll_timeout) {
                Ok((bytes, _)) => {
                    if let Ok(seg) = Segment::deserialize(&bytes) {
                        if seg.flags.rst() {
                            log::warn!("peer reset the connection mid-transfer");
                            return Err(TransportError::PeerReset);
                        }
                        if seg.flags.ack() {
                            let acked = reliability.on_ack(seg.ack_num);
                            if acked > 0 {
                                last_progress_at = Instant::now();
                            }

                            if self.congestion.on_ack(seg.ack_num) {
                                log::debug!("fast-retransmitting seq {}", reliability.send_base());
                                reliability.retransmit(reliability.send_base(), &self.channel);
                            }
                        }
                    }
                }
                Err(TransportError::TimedOut) => {}
                Err(e) => return Err(e),
            }

            if reliability.tick(&self.channel) {
                log::debug!("RTO fired, notifying congestion controller");
                self.congestion.on_timeout();
            }

            if !reliability.is_empty() && last_progress_at.elapsed() > self.config.drain_budget {
                return Err(TransportError::DrainBudgetExceeded);
            }
        }

        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        let fin_seq = self
            .reliability
            .as_ref()
            .expect("teardown called before handshake completed")
            .next_seq_num();

        self.state = SenderState::FinWait1;
        self.channel.enable_handshake_guard();

        let fin = Segment::new(fin_seq, 0, Flags::FIN, 0, Vec::new());
        let mut fin_acked = false;

        for attempt in 1..=self.config.max_teardown_attempts {
            log::info!("sending FIN (attempt {attempt}/{})", self.config.max_teardown_attempts);
            self.channel.send(&fin.serialize())?;

            match self.channel.receive(self.config.teardown_timeout) {
                Ok((bytes, _)) => {
                    if let Ok(seg) = Segment::deserialize(&bytes) {
                        if seg.flags.rst() {
                            log::warn!("peer reset the connection during teardown");
                            return Err(TransportError::PeerReset);
                        }
                        if seg.flags.ack() && seg.ack_num == fin_seq.wrapping_add(1) {
                            fin_acked = true;
                            break;
                        }
                    }
                }
                Err(TransportError::TimedOut) => continue,
                Err(e) => return Err(e),
            }
        }

        if !fin_acked {
            log::warn!("teardown timed out after {} attempts, force-closing", self.config.max_teardown_attempts);
            self.state = SenderState::Closed;
            return Ok(());
        }

        self.state = SenderState::FinWait2;

        match self.channel.receive(self.config.teardown_timeout) {
            Ok((bytes, _)) => {
                if let Ok(seg) = Segment::deserialize(&bytes) {
                    if seg.flags.rst() {
                        log::warn!("peer reset the connection during teardown");
                        return Err(TransportError::PeerReset);
                    }
                    if seg.flags.fin() {
                        let ack = Segment::new(
                            fin_seq.wrapping_add(1),
                            seg.seq_num.wrapping_add(1),
                            Flags::ACK,
                            0,
                            Vec::new(),
                        );
                        self.channel.send(&ack.serialize())?;
                    }
                }
            }
            Err(TransportError::TimedOut) => {
                log::warn!("no FIN from peer within teardown budget, closing anyway");
            }
            Err(e) => return Err(e),
        }

        self.state = SenderState::TimeWait;
        std::thread::sleep(Duration::from_secs(1));
        self.state = SenderState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
    }

    #[test]
    fn handshake_fails_cleanly_with_no_peer_listening() {
        let source = Cursor::new(Vec::new());
        let mut sender = Sender::new(
            loopback(0),
            SimParams::default(),
            source,
            SenderConfig {
                handshake_timeout: Duration::from_millis(20),
                max_handshake_attempts: 2,
                ..SenderConfig::default()
            },
        )
        .unwrap();

        let err = sender.handshake(loopback(0)).unwrap_err();
        assert!(matches!(err, TransportError::MalformedHandshake { .. }));
        assert_eq!(sender.state(), SenderState::Closed);
    }
}
