//! CRC-16/CCITT-FALSE, the checksum the LocalSense wire carries.
//!
//! Polynomial 0x1021, initial value 0xFFFF, no reflection, no final xor.
//! Computed over the type byte plus payload; the frame stores it big-endian
//! just before the tail marker.

/// Compute the checksum over `bytes`.
pub fn crc16_ccitt_false(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_check_value() {
        // The published check string for CRC-16/CCITT-FALSE.
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    }

    #[test]
    fn empty_input_is_init_value() {
        assert_eq!(crc16_ccitt_false(&[]), 0xFFFF);
    }

    #[test]
    fn single_bit_flip_changes_crc() {
        let clean = crc16_ccitt_false(&[0x81, 0x01, 0x00]);
        let dirty = crc16_ccitt_false(&[0x81, 0x01, 0x01]);
        assert_ne!(clean, dirty);
    }
}
