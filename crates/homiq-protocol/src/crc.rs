//! Homiq CRC-8
//!
//! Bit-serial, LSB-first CRC with polynomial `0x18` and initial value `0x00`,
//! computed over the code points of `CMD+VAL+SRC+DST+ID+TYPE` (no separators,
//! ID in plain decimal). Arithmetically this is the Dallas/Maxim 1-Wire CRC-8.

/// Feedback polynomial applied before the shift
pub const POLYNOMIAL: u8 = 0x18;

/// Compute the checksum over raw bytes
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| crc8_update(crc, byte))
}

/// Compute the checksum over a string, one byte per character
///
/// Each character contributes the low 8 bits of its code point.
pub fn crc8_str(data: &str) -> u8 {
    data.chars().fold(0u8, |crc, ch| crc8_update(crc, ch as u32 as u8))
}

/// Feed one byte through the shift register
fn crc8_update(mut crc: u8, mut byte: u8) -> u8 {
    for _ in 0..8 {
        let feedback = (crc ^ byte) & 0x01;
        if feedback == 1 {
            crc ^= POLYNOMIAL;
        }
        crc = (crc >> 1) & 0x7F;
        if feedback == 1 {
            crc |= 0x80;
        }
        byte >>= 1;
    }
    crc
}

/// Build the checksum input string from frame fields
pub fn crc_input(cmd: &str, val: &str, src: &str, dst: &str, id: u16, type_char: char) -> String {
    format!("{cmd}{val}{src}{dst}{id}{type_char}")
}

/// Compute the checksum for a set of frame fields
pub fn frame_crc(cmd: &str, val: &str, src: &str, dst: &str, id: u16, type_char: char) -> u8 {
    crc8_str(&crc_input(cmd, val, src, dst, id, type_char))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference implementation of CRC-8/MAXIM (reflected poly 0x8C)
    fn crc8_maxim(data: &[u8]) -> u8 {
        let mut crc = 0u8;
        for &b in data {
            crc ^= b;
            for _ in 0..8 {
                crc = if crc & 0x01 != 0 {
                    (crc >> 1) ^ 0x8C
                } else {
                    crc >> 1
                };
            }
        }
        crc
    }

    #[test]
    fn test_check_value() {
        assert_eq!(crc8(b"123456789"), 0xA1);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc8(b""), 0);
        assert_eq!(crc8_str(""), 0);
    }

    #[test]
    fn test_golden_frames() {
        assert_eq!(frame_crc("HB", "1", "0", "0", 1, 's'), 1);
        assert_eq!(frame_crc("HB", "1", "0", "0", 1, 'a'), 32);
        assert_eq!(frame_crc("I.3", "1", "0", "01", 42, 's'), 90);
        assert_eq!(frame_crc("ID.0", "1", "03", "1", 42, 's'), 190);
        assert_eq!(frame_crc("PG", "1", "0", "03", 1, 's'), 182);
    }

    #[test]
    fn test_crc_input_layout() {
        assert_eq!(crc_input("O.0", "1", "0", "05", 17, 's'), "O.0100517s");
        assert_eq!(crc_input("GI", "", "0", "02", 511, 'a'), "GI002511a");
    }

    #[test]
    fn test_stable_under_recomputation() {
        let first = crc8_str("T.021.5040007s");
        let second = crc8_str("T.021.5040007s");
        assert_eq!(first, second);
    }

    #[test]
    fn test_matches_maxim_reference() {
        for input in [&b"HB1001s"[..], b"a", b"O.01010017s", b"\x00\xFF\x7F"] {
            assert_eq!(crc8(input), crc8_maxim(input));
        }
    }
}
