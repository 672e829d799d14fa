//! Bit-level operations for field protocol data
//!
//! Common use cases:
//! - Melsec bit-unit payloads (two bits per byte, nibble packed)
//! - Register file bit views over 16-bit words
//! - Master-K bit values

/// Extract single bit from u16 value
#[inline]
pub fn extract_bit_u16(value: u16, bit_index: u8) -> bool {
    debug_assert!(bit_index < 16, "Bit index out of range: {}", bit_index);
    (value & (1 << bit_index)) != 0
}

/// Return `value` with a single bit set or cleared
#[inline]
pub fn with_bit_u16(value: u16, bit_index: u8, on: bool) -> u16 {
    debug_assert!(bit_index < 16, "Bit index out of range: {}", bit_index);
    if on {
        value | (1 << bit_index)
    } else {
        value & !(1 << bit_index)
    }
}

/// Unpack nibble-packed bits
///
/// Each byte carries two points: the high nibble is the even index, the low
/// nibble the odd index. Any nonzero nibble reads as `true`. Decoding stops
/// after `count` points even if the last byte carries a padding nibble.
pub fn unpack_nibble_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    let mut bits = Vec::with_capacity(count);
    for byte in bytes {
        if bits.len() < count {
            bits.push(byte >> 4 != 0);
        }
        if bits.len() < count {
            bits.push(byte & 0x0F != 0);
        }
    }
    bits
}

/// Pack bits two per byte, high nibble first (`true` → `1`)
pub fn pack_nibble_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(2)
        .map(|pair| {
            let high = if pair[0] { 0x10 } else { 0x00 };
            let low = match pair.get(1) {
                Some(true) => 0x01,
                _ => 0x00,
            };
            high | low
        })
        .collect()
}

/// Unpack LSB-first bits from a word array
pub fn unpack_word_bits(words: &[u16], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| {
            words
                .get(i / 16)
                .map(|w| extract_bit_u16(*w, (i % 16) as u8))
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bit_u16() {
        let value = 0b1010_1100u16;
        assert!(!extract_bit_u16(value, 0));
        assert!(extract_bit_u16(value, 2));
        assert!(extract_bit_u16(value, 3));
    }

    #[test]
    fn test_with_bit_u16() {
        assert_eq!(with_bit_u16(0, 3, true), 0b1000);
        assert_eq!(with_bit_u16(0xFFFF, 15, false), 0x7FFF);
        assert_eq!(with_bit_u16(0b1000, 3, true), 0b1000);
    }

    #[test]
    fn test_unpack_nibble_bits() {
        // ON OFF | OFF ON | ON (padding)
        let bytes = [0x10, 0x01, 0x10];
        assert_eq!(
            unpack_nibble_bits(&bytes, 5),
            vec![true, false, false, true, true]
        );
    }

    #[test]
    fn test_unpack_nibble_bits_any_nonzero_is_true() {
        assert_eq!(unpack_nibble_bits(&[0xF2], 2), vec![true, true]);
        assert_eq!(unpack_nibble_bits(&[0x00], 2), vec![false, false]);
    }

    #[test]
    fn test_pack_nibble_bits_odd_count() {
        assert_eq!(pack_nibble_bits(&[true, false, true]), vec![0x10, 0x10]);
        assert_eq!(pack_nibble_bits(&[false, true]), vec![0x01]);
        assert!(pack_nibble_bits(&[]).is_empty());
    }

    #[test]
    fn test_unpack_word_bits() {
        let words = [0x8001u16, 0x0002];
        let bits = unpack_word_bits(&words, 18);
        assert!(bits[0]);
        assert!(bits[15]);
        assert!(!bits[16]);
        assert!(bits[17]);
    }
}
