//! Segment checksum.
//!
//! A CRC-32 (IEEE polynomial) over the encoded segment with the checksum
//! field zeroed.  The CRC is always taken over the big-endian wire bytes, so
//! both ends hash exactly the same byte layout regardless of host order; the
//! resulting `u32` is then stored big-endian in the header.

use crate::packet::{HEADER_LEN, OFF_CHECKSUM};

/// CRC-32/IEEE of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc::crc32::checksum_ieee(data)
}

/// CRC of an encoded segment as if its checksum slot held zeros.
///
/// Hashes the bytes around the slot in three chained passes, so the segment
/// is never copied.  `segment` must hold at least a full header.
fn segment_crc(segment: &[u8]) -> u32 {
    use crc::crc32::{update, IEEE_TABLE};

    let crc = update(0, &IEEE_TABLE, &segment[..OFF_CHECKSUM]);
    let crc = update(crc, &IEEE_TABLE, &[0; 4]);
    update(crc, &IEEE_TABLE, &segment[OFF_CHECKSUM + 4..])
}

/// Compute the CRC of an encoded segment and write it into the checksum slot.
///
/// Anything shorter than a header is left untouched.
pub(crate) fn seal(segment: &mut [u8]) {
    if segment.len() < HEADER_LEN {
        return;
    }
    let crc = segment_crc(segment);
    segment[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&crc.to_be_bytes());
}

/// `true` when the stored checksum matches the recomputed one.
pub fn verify(segment: &[u8]) -> bool {
    if segment.len() < HEADER_LEN {
        return false;
    }
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&segment[OFF_CHECKSUM..OFF_CHECKSUM + 4]);
    segment_crc(segment) == u32::from_be_bytes(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_check_value() {
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn every_single_bit_flip_changes_crc() {
        let data: Vec<u8> = (0..64u8).map(|b| b.wrapping_mul(37)).collect();
        let reference = crc32(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc32(&flipped), reference, "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn seal_then_verify() {
        let mut segment = vec![0xa5u8; HEADER_LEN + 10];
        seal(&mut segment);
        assert!(verify(&segment));

        segment[HEADER_LEN + 3] ^= 0x40;
        assert!(!verify(&segment));
    }

    #[test]
    fn seal_ignores_previous_checksum_bytes() {
        let mut a = vec![1u8; HEADER_LEN];
        let mut b = a.clone();
        b[OFF_CHECKSUM] = 0xff;
        seal(&mut a);
        seal(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn chained_crc_matches_zeroed_copy() {
        let mut segment: Vec<u8> = (0..HEADER_LEN as u8 + 40).collect();
        let mut zeroed = segment.clone();
        zeroed[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&[0; 4]);
        seal(&mut segment);
        let stored = &segment[OFF_CHECKSUM..OFF_CHECKSUM + 4];
        assert_eq!(stored, crc32(&zeroed).to_be_bytes());
    }

    #[test]
    fn seal_leaves_short_input_alone() {
        let mut short = [7u8; HEADER_LEN - 1];
        seal(&mut short);
        assert_eq!(short, [7u8; HEADER_LEN - 1]);
    }

    #[test]
    fn short_segment_never_verifies() {
        assert!(!verify(&[0u8; HEADER_LEN - 1]));
    }
}
