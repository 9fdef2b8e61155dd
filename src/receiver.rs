//! Receiver connection state machine: passive handshake, in-order segment
//! delivery (no reordering buffer — gaps cause discard, per spec §5), and
//! four-way teardown. Per spec §4.6.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use crate::channel::{DatagramChannel, SimParams};
use crate::error::{Result, TransportError};
use crate::reassembly::ReassemblyBuffer;
use crate::segment::{Flags, Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Listen,
    SynRcvd,
    Established,
    CloseWait,
    LastAck,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub poll_timeout: Duration,
    pub idle_budget: Duration,
    pub teardown_timeout: Duration,
    pub max_teardown_attempts: u32,
    pub window_size: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            poll_timeout: Duration::from_millis(100),
            idle_budget: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(1),
            max_teardown_attempts: 5,
            window_size: 64,
        }
    }
}

pub struct Receiver<W: Write> {
    channel: DatagramChannel,
    state: ReceiverState,
    reassembly: ReassemblyBuffer,
    sink: W,
    config: ReceiverConfig,
    peer: Option<SocketAddr>,
}

impl<W: Write> Receiver<W> {
    pub fn new(local_addr: SocketAddr, sim: SimParams, sink: W, config: ReceiverConfig) -> Result<Self> {
        let channel = DatagramChannel::bind(local_addr, None, sim)?;
        Ok(Receiver {
            channel,
            state: ReceiverState::Listen,
            reassembly: ReassemblyBuffer::new(1),
            sink,
            config,
            peer: None,
        })
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Blocks until a single connection has completed handshake, transfer,
    /// and teardown, then flushes all reassembled bytes to the sink.
    pub fn run(&mut self) -> Result<()> {
        self.accept()?;
        self.receive_loop()?;
        self.sink.flush()?;
        Ok(())
    }

    fn accept(&mut self) -> Result<()> {
        loop {
            let (bytes, from) = self.channel.receive(Duration::from_secs(3600))?;
            let seg = match Segment::deserialize(&bytes) {
                Ok(seg) => seg,
                Err(_) => {
                    log::trace!("dropping malformed segment while listening");
                    continue;
                }
            };

            if !seg.flags.syn() {
                log::trace!("dropping non-SYN segment while listening");
                continue;
            }

            self.channel.set_peer(from);
            self.state = ReceiverState::SynRcvd;

            let iss = 0u32;
            let syn_ack = Segment::new(
                iss,
                seg.seq_num.wrapping_add(1),
                Flags::SYN | Flags::ACK,
                self.config.window_size,
                Vec::new(),
            );
            self.channel.send(&syn_ack.serialize())?;

            match self.channel.receive(self.config.teardown_timeout) {
                Ok((bytes, from2)) if from2 == from => match Segment::deserialize(&bytes) {
                    Ok(ack) if ack.flags.rst() => {
                        log::debug!("peer reset during handshake, returning to listen");
                        self.state = ReceiverState::Listen;
                        continue;
                    }
                    Ok(ack) if ack.flags.ack() && ack.ack_num == iss.wrapping_add(1) => {
                        self.reassembly = ReassemblyBuffer::new(seg.seq_num.wrapping_add(1));
                        self.channel.disable_handshake_guard();
                        self.state = ReceiverState::Established;
                        self.peer = Some(from);
                        log::info!("handshake established with {from}");
                        return Ok(());
                    }
                    _ => {
                        log::debug!("malformed final ACK, returning to listen");
                        self.state = ReceiverState::Listen;
                        continue;
                    }
                },
                Ok(_) => continue,
                Err(TransportError::TimedOut) => {
                    log::debug!("no final ACK, returning to listen");
                    self.state = ReceiverState::Listen;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn receive_loop(&mut self) -> Result<()> {
        let mut last_progress_at = std::time::Instant::now();

        loop {
            match self.channel.receive(self.config.poll_timeout) {
                Ok((bytes, from)) => {
                    if Some(from) != self.peer {
                        continue;
                    }

                    let seg = match Segment::deserialize(&bytes) {
                        Ok(seg) => seg,
                        Err(reason) => {
                            log::trace!("dropping malformed segment: {reason:?}");
                            continue;
                        }
                    };

                    last_progress_at = std::time::Instant::now();

                    if seg.flags.rst() {
                        log::warn!("peer reset the connection mid-transfer");
                        self.state = ReceiverState::Closed;
                        return Err(TransportError::PeerReset);
                    }

                    if seg.flags.fin() {
                        self.handle_fin(&seg)?;
                        return Ok(());
                    }

                    if !seg.payload.is_empty() {
                        self.reassembly.insert(seg.seq_num, seg.payload);
                    }

                    let ack = Segment::new(
                        0,
                        self.reassembly.next_expected(),
                        Flags::ACK,
                        self.config.window_size,
                        Vec::new(),
                    );
                    self.channel.send(&ack.serialize())?;
                }
                Err(TransportError::TimedOut) => {
                    if last_progress_at.elapsed() > self.config.idle_budget {
                        return Err(TransportError::DrainBudgetExceeded);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_fin(&mut self, fin: &Segment) -> Result<()> {
        self.state = ReceiverState::CloseWait;
        self.channel.enable_handshake_guard();

        let ack = Segment::new(
            0,
            fin.seq_num.wrapping_add(1),
            Flags::ACK,
            self.config.window_size,
            Vec::new(),
        );
        self.channel.send(&ack.serialize())?;
        self.sink.write_all(&self.reassembly.drain_contiguous())?;

        self.state = ReceiverState::LastAck;
        let our_fin = Segment::new(fin.ack_num, fin.seq_num.wrapping_add(1), Flags::FIN, 0, Vec::new());

        for attempt in 1..=self.config.max_teardown_attempts {
            log::info!("sending FIN (attempt {attempt}/{})", self.config.max_teardown_attempts);
            self.channel.send(&our_fin.serialize())?;

            match self.channel.receive(self.config.teardown_timeout) {
                Ok((bytes, _)) => {
                    if let Ok(seg) = Segment::deserialize(&bytes) {
                        if seg.flags.rst() {
                            log::warn!("peer reset the connection during teardown");
                            self.state = ReceiverState::Closed;
                            return Err(TransportError::PeerReset);
                        }
                        if seg.flags.ack() && seg.ack_num == our_fin.seq_num.wrapping_add(1) {
                            self.state = ReceiverState::Closed;
                            return Ok(());
                        }
                    }
                }
                Err(TransportError::TimedOut) => continue,
                Err(e) => return Err(e),
            }
        }

        log::warn!("teardown timed out after {} attempts, force-closing", self.config.max_teardown_attempts);
        self.state = ReceiverState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
    }

    #[test]
    fn starts_in_listen_state() {
        let sink = Vec::new();
        let recv = Receiver::new(loopback(0), SimParams::default(), sink, ReceiverConfig::default()).unwrap();
        assert_eq!(recv.state(), ReceiverState::Listen);
    }
}
