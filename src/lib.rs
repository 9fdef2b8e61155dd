//! A reliable, ordered byte-stream transport over a simulated lossy UDP
//! link: fixed-header segments, sliding-window cumulative ACKs, per-segment
//! RTO retransmission, and Reno congestion control.

pub mod channel;
pub mod congestion;
pub mod error;
pub mod reassembly;
pub mod receiver;
pub mod reliability;
pub mod segment;
pub mod sender;

pub use channel::{DatagramChannel, SimParams};
pub use congestion::{CongestionController, Phase};
pub use error::{Result, TransportError};
pub use receiver::{Receiver, ReceiverConfig, ReceiverState};
pub use reliability::ReliabilityLayer;
pub use segment::{Flags, Segment};
pub use sender::{Sender, SenderConfig, SenderState};
