//! Fixed-header binary framing for the transport's wire segments.
//!
//! Header layout (18 bytes, big-endian), RFC9293-flavored but not
//! TCP-compatible: seq_num(4) ack_num(4) flags(2) window_size(2)
//! checksum(4) payload_len(2), followed by `payload_len` payload bytes.

use md5::{Digest, Md5};

pub const HEADER_LEN: usize = 18;
pub const MAX_PAYLOAD_LEN: usize = 1024;
pub const MAX_SEGMENT_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags(pub u16);

impl Flags {
    pub const SYN: u16 = 0x0001;
    pub const ACK: u16 = 0x0002;
    pub const FIN: u16 = 0x0004;
    pub const RST: u16 = 0x0008;

    pub fn new(bits: u16) -> Self {
        Flags(bits)
    }

    pub fn has(&self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn syn(&self) -> bool {
        self.has(Self::SYN)
    }

    pub fn ack(&self) -> bool {
        self.has(Self::ACK)
    }

    pub fn fin(&self) -> bool {
        self.has(Self::FIN)
    }

    pub fn rst(&self) -> bool {
        self.has(Self::RST)
    }
}

/// Reason a segment was dropped at deserialization, tracked only for
/// diagnostics (the protocol treats all three identically, per spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TooShort,
    PayloadOverflow,
    ChecksumMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: Flags,
    pub window_size: u16,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(seq_num: u32, ack_num: u32, flags: u16, window_size: u16, payload: Vec<u8>) -> Self {
        Segment {
            seq_num,
            ack_num,
            flags: Flags::new(flags),
            window_size,
            payload,
        }
    }

    fn checksum(&self) -> u32 {
        let mut hasher = Md5::new();
        hasher.update(self.seq_num.to_be_bytes());
        hasher.update(self.ack_num.to_be_bytes());
        hasher.update(self.flags.0.to_be_bytes());
        hasher.update(self.window_size.to_be_bytes());
        hasher.update(&self.payload);
        let digest = hasher.finalize();
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    pub fn serialize(&self) -> Vec<u8> {
        let checksum = self.checksum();

        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.seq_num.to_be_bytes());
        out.extend_from_slice(&self.ack_num.to_be_bytes());
        out.extend_from_slice(&self.flags.0.to_be_bytes());
        out.extend_from_slice(&self.window_size.to_be_bytes());
        out.extend_from_slice(&checksum.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Segment, DropReason> {
        if bytes.len() < HEADER_LEN {
            return Err(DropReason::TooShort);
        }

        let seq_num = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let ack_num = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let flags = u16::from_be_bytes(bytes[8..10].try_into().unwrap());
        let window_size = u16::from_be_bytes(bytes[10..12].try_into().unwrap());
        let stored_checksum = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
        let payload_len = u16::from_be_bytes(bytes[16..18].try_into().unwrap()) as usize;

        if bytes.len() - HEADER_LEN < payload_len {
            return Err(DropReason::PayloadOverflow);
        }

        let payload = bytes[HEADER_LEN..HEADER_LEN + payload_len].to_vec();

        let segment = Segment::new(seq_num, ack_num, flags, window_size, payload);

        if segment.checksum() != stored_checksum {
            return Err(DropReason::ChecksumMismatch);
        }

        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_data_segment() {
        let seg = Segment::new(1, 2, Flags::ACK, 1024, vec![1, 2, 3, 4, 5]);
        let bytes = seg.serialize();
        let decoded = Segment::deserialize(&bytes).unwrap();
        assert_eq!(seg, decoded);
    }

    #[test]
    fn round_trips_an_empty_control_segment() {
        let seg = Segment::new(0, 0, Flags::SYN, 1024, Vec::new());
        let bytes = seg.serialize();
        let decoded = Segment::deserialize(&bytes).unwrap();
        assert_eq!(seg, decoded);
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = vec![0u8; HEADER_LEN - 1];
        assert_eq!(Segment::deserialize(&bytes), Err(DropReason::TooShort));
    }

    #[test]
    fn rejects_payload_length_overflow() {
        let mut seg = Segment::new(0, 0, Flags::ACK, 1024, vec![9; 10]);
        let mut bytes = seg.serialize();
        // Lie about payload_len without providing the bytes.
        let lied_len: u16 = 500;
        bytes[16..18].copy_from_slice(&lied_len.to_be_bytes());
        bytes.truncate(HEADER_LEN + 10);
        assert_eq!(
            Segment::deserialize(&bytes),
            Err(DropReason::PayloadOverflow)
        );
        seg.payload.clear(); // silence unused warning in some configurations
    }

    #[test]
    fn detects_single_bit_corruption() {
        let seg = Segment::new(7, 9, Flags::ACK, 512, vec![0xAB; 64]);
        let mut bytes = seg.serialize();

        for bit_pos in 0..(bytes.len() * 8) {
            let mut corrupted = bytes.clone();
            let byte_idx = bit_pos / 8;
            let bit_idx = bit_pos % 8;
            corrupted[byte_idx] ^= 1 << bit_idx;
            assert!(
                Segment::deserialize(&corrupted).is_err(),
                "bit {bit_pos} flip was not detected"
            );
        }

        // sanity: the untouched bytes still decode fine
        assert!(Segment::deserialize(&bytes).is_ok());
        bytes.clear();
    }

    #[test]
    fn max_segment_len_matches_spec() {
        assert_eq!(MAX_SEGMENT_LEN, 1042);
    }
}
