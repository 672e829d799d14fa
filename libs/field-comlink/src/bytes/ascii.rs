//! ASCII framing helpers
//!
//! Control characters, additive block check characters and fixed-width
//! hex/decimal fields used by the ASCII relay and controller protocols.

use crate::error::{LinkError, Result, ValidationError};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const EOT: u8 = 0x04;
pub const ENQ: u8 = 0x05;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CR: u8 = 0x0D;
pub const LF: u8 = 0x0A;

/// Space separated hex dump for log lines
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Additive checksum: byte sum truncated to 8 bits
#[inline]
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Render a checksum as two uppercase hex characters
#[inline]
pub fn bcc_chars(bcc: u8) -> [u8; 2] {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    [DIGITS[(bcc >> 4) as usize], DIGITS[(bcc & 0x0F) as usize]]
}

/// Append `value` as exactly `width` uppercase hex digits
pub fn push_hex(buf: &mut Vec<u8>, value: u32, width: usize) {
    let s = format!("{:0width$X}", value, width = width);
    buf.extend_from_slice(&s.as_bytes()[s.len() - width..]);
}

/// Append `value` as exactly `width` decimal digits
pub fn push_dec(buf: &mut Vec<u8>, value: u32, width: usize) {
    let s = format!("{:0width$}", value, width = width);
    buf.extend_from_slice(&s.as_bytes()[s.len() - width..]);
}

/// Parse a fixed-width hex field
pub fn parse_hex(field: &[u8]) -> Result<u32> {
    let text = std::str::from_utf8(field)
        .map_err(|_| LinkError::malformed("non-ASCII hex field"))?;
    u32::from_str_radix(text, 16)
        .map_err(|_| LinkError::malformed(format!("invalid hex field '{}'", text)))
}

/// Compare a received two-character checksum against `sum8(covered)`
pub fn verify_bcc(covered: &[u8], received: &[u8]) -> Result<()> {
    let expected = sum8(covered);
    let actual = parse_hex(received)? as u8;
    if expected != actual {
        return Err(ValidationError::Checksum { expected, actual }.into());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x05, 0x30, 0xFF]), "05 30 FF");
    }

    #[test]
    #[allow(arithmetic_overflow)]
    fn test_sum8_wraps() {
        assert_eq!(sum8(&[0xFF, 0x02]), 0x01);
        assert_eq!(sum8(b"\x0500RSS"), 0x05 + 0x30 + 0x30 + 0x52 + 0x53 + 0x53);
    }

    #[test]
    fn test_bcc_chars() {
        assert_eq!(&bcc_chars(0x0A), b"0A");
        assert_eq!(&bcc_chars(0xF3), b"F3");
    }

    #[test]
    fn test_push_fixed_width_fields() {
        let mut buf = Vec::new();
        push_hex(&mut buf, 0x1F, 2);
        push_dec(&mut buf, 7, 4);
        push_hex(&mut buf, 0x12345, 4);
        assert_eq!(buf, b"1F00072345");
    }

    #[test]
    fn test_parse_fields() {
        assert_eq!(parse_hex(b"00FF").unwrap(), 255);
        assert!(parse_hex(b"G0").is_err());
    }

    #[test]
    fn test_verify_bcc_detects_single_byte_corruption() {
        let frame = b"\x0500RSS0106%MW100\x04".to_vec();
        let bcc = bcc_chars(sum8(&frame));
        assert!(verify_bcc(&frame, &bcc).is_ok());

        for i in 0..frame.len() {
            let mut corrupted = frame.clone();
            corrupted[i] = corrupted[i].wrapping_add(1);
            let err = verify_bcc(&corrupted, &bcc).unwrap_err();
            assert!(matches!(
                err,
                LinkError::Validation(ValidationError::Checksum { .. })
            ));
        }
    }
}
