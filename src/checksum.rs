//! CRC-16 used to validate every packet.
//!
//! CRC-16/CCITT-FALSE: polynomial `0x1021`, initial value `0xFFFF`, no
//! reflection, no final XOR.  Both ends of a link must agree on this.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use ::crc::{CRC_16_IBM_3740, Crc};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the checksum of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        // Standard check input for CRC catalogues
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn empty_input_is_init_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn every_single_bit_flip_changes_checksum() {
        let data = [0x09u8, 0x12, 0x01, 0x00, 0x00, 0x00, 0xDE, 0xAD];
        let good = crc16(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut bad = data;
                bad[byte] ^= 1 << bit;
                assert_ne!(crc16(&bad), good, "byte {byte} bit {bit}");
            }
        }
    }
}
