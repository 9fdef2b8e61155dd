//! A UDP datagram channel with an optional lossy/corrupting/delaying link
//! simulator layered on top, per spec §4.1.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use rand::Rng;

use crate::error::{Result, TransportError};
use crate::segment::MAX_SEGMENT_LEN;

pub const RECV_BUFFER_LEN: usize = 2048;

#[derive(Debug, Clone, Copy)]
pub struct SimParams {
    pub loss_rate: f64,
    pub corruption_rate: f64,
    pub delay_range: (f64, f64),
}

impl Default for SimParams {
    fn default() -> Self {
        SimParams {
            loss_rate: 0.0,
            corruption_rate: 0.0,
            delay_range: (0.0, 0.0),
        }
    }
}

/// Fixed-peer UDP channel. The handshake guard disables loss/corruption
/// simulation while SYN/ACK/FIN control segments are in flight; it is a
/// plain field (not an `Arc<AtomicBool>`) because the event loop that owns
/// this channel is single-threaded (spec §5).
pub struct DatagramChannel {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    sim: SimParams,
    handshake_guard: bool,
}

impl DatagramChannel {
    pub fn bind(local_addr: SocketAddr, peer: Option<SocketAddr>, sim: SimParams) -> Result<Self> {
        let socket = UdpSocket::bind(local_addr)?;
        Ok(DatagramChannel {
            socket,
            peer,
            sim,
            handshake_guard: true,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    /// Disable loss/corruption/delay simulation for subsequent sends. Called
    /// once the connection reaches ESTABLISHED.
    pub fn disable_handshake_guard(&mut self) {
        self.handshake_guard = false;
    }

    /// Re-enable the guard for teardown, per spec §4.5.
    pub fn enable_handshake_guard(&mut self) {
        self.handshake_guard = true;
    }

    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let peer = self
            .peer
            .expect("send called before a peer address was known");

        if !self.handshake_guard {
            if rand::thread_rng().gen_bool(self.sim.loss_rate.clamp(0.0, 1.0)) {
                log::trace!("simulated loss: dropping segment to {peer}");
                return Ok(());
            }
        }

        let (min_delay, max_delay) = self.sim.delay_range;
        if max_delay > 0.0 {
            let delay = rand::thread_rng().gen_range(min_delay.min(max_delay)..=max_delay);
            std::thread::sleep(Duration::from_secs_f64(delay));
        }

        let mut out = bytes.to_vec();
        if !self.handshake_guard
            && rand::thread_rng().gen_bool(self.sim.corruption_rate.clamp(0.0, 1.0))
            && !out.is_empty()
        {
            let mut rng = rand::thread_rng();
            let byte_idx = rng.gen_range(0..out.len());
            let bit_idx = rng.gen_range(0u32..8);
            out[byte_idx] ^= 1 << bit_idx;
            log::trace!("simulated corruption: flipped bit {bit_idx} of byte {byte_idx}");
        }

        self.socket.send_to(&out, peer)?;
        Ok(())
    }

    /// Blocks up to `timeout`, returning the datagram and its source
    /// address, or `TransportError::TimedOut`.
    pub fn receive(&self, timeout: Duration) -> Result<(Vec<u8>, SocketAddr)> {
        self.socket.set_read_timeout(Some(timeout))?;

        let mut buf = [0u8; RECV_BUFFER_LEN];
        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => Ok((buf[..n].to_vec(), from)),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(TransportError::TimedOut)
            }
            Err(e) => Err(e.into()),
        }
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
    fn clean_channel_round_trips_a_datagram() {
        let a = DatagramChannel::bind(loopback(0), None, SimParams::default()).unwrap();
        let mut b = DatagramChannel::bind(loopback(0), None, SimParams::default()).unwrap();

        let a_addr = a.local_addr().unwrap();
        b.set_peer(a_addr);
        b.disable_handshake_guard();

        b.send(b"hello").unwrap();

        let (bytes, from) = a.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(from, b.local_addr().unwrap());
    }

    #[test]
    fn receive_times_out_with_no_traffic() {
        let a = DatagramChannel::bind(loopback(0), None, SimParams::default()).unwrap();
        let err = a.receive(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransportError::TimedOut));
    }

    #[test]
    fn handshake_guard_suppresses_total_loss() {
        let a = DatagramChannel::bind(loopback(0), None, SimParams::default()).unwrap();
        let mut b = DatagramChannel::bind(
            loopback(0),
            None,
            SimParams {
                loss_rate: 1.0,
                ..SimParams::default()
            },
        )
        .unwrap();

        b.set_peer(a.local_addr().unwrap());
        // handshake_guard starts true: loss_rate=1.0 must not apply.
        b.send(b"syn").unwrap();
        let (bytes, _) = a.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(bytes, b"syn");
    }

    #[test]
    fn max_segment_fits_in_recv_buffer() {
        assert!(MAX_SEGMENT_LEN < RECV_BUFFER_LEN);
    }
}
