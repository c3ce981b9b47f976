//! Float to register-pair encoding.
//!
//! A 32-bit measurement occupies two consecutive 16-bit registers. The four
//! IEEE-754 bytes are taken in little-endian order and split into a low word
//! and a high word, each itself little-endian. The pair is stored and
//! transmitted in that order: `[low, high]`.

use serde::{Deserialize, Serialize};

/// Two register words holding one `f32`, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodedPair {
    /// First register (bytes 0 and 1 of the float).
    pub low: u16,
    /// Second register (bytes 2 and 3 of the float).
    pub high: u16,
}

impl EncodedPair {
    /// Build a pair from exactly two words; `None` for any other length.
    pub fn from_words(words: &[u16]) -> Option<Self> {
        match words {
            [low, high] => Some(Self {
                low: *low,
                high: *high,
            }),
            _ => None,
        }
    }

    /// The words in register order.
    pub fn words(&self) -> [u16; 2] {
        [self.low, self.high]
    }
}

/// Encode a float into its register pair.
pub fn encode(value: f32) -> EncodedPair {
    let [b0, b1, b2, b3] = value.to_le_bytes();
    EncodedPair {
        low: u16::from_le_bytes([b0, b1]),
        high: u16::from_le_bytes([b2, b3]),
    }
}

/// Decode a register pair back into a float.
pub fn decode(pair: EncodedPair) -> f32 {
    let [b0, b1] = pair.low.to_le_bytes();
    let [b2, b3] = pair.high.to_le_bytes();
    f32::from_le_bytes([b0, b1, b2, b3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_values() {
        // 3.5 = 0x40600000
        assert_eq!(encode(3.5), EncodedPair { low: 0, high: 0x4060 });
        // 1.0 = 0x3F800000
        assert_eq!(encode(1.0).words(), [0x0000, 0x3F80]);
        // 123.456 = 0x42F6E979
        assert_eq!(encode(123.456).words(), [0xE979, 0x42F6]);
    }

    #[test]
    fn test_roundtrip_bit_exact() {
        let values = [
            0.0f32,
            -0.0,
            1.0,
            -1.0,
            3.5,
            124.0,
            f32::MIN_POSITIVE,
            f32::from_bits(0x0000_0001), // smallest subnormal
            f32::from_bits(0x007F_FFFF), // largest subnormal
            f32::MAX,
            f32::MIN,
            f32::INFINITY,
            f32::NEG_INFINITY,
            f32::NAN,
            f32::from_bits(0x7FC0_1234), // quiet NaN with payload
            f32::from_bits(0xFF80_0001), // negative signalling NaN
        ];

        for value in values {
            let decoded = decode(encode(value));
            assert_eq!(
                decoded.to_bits(),
                value.to_bits(),
                "roundtrip changed bits of {:#010x}",
                value.to_bits()
            );
        }
    }

    #[test]
    fn test_negative_zero_keeps_sign() {
        let pair = encode(-0.0);
        assert_eq!(pair.words(), [0x0000, 0x8000]);
        assert!(decode(pair).is_sign_negative());
    }

    #[test]
    fn test_from_words() {
        assert_eq!(
            EncodedPair::from_words(&[1, 2]),
            Some(EncodedPair { low: 1, high: 2 })
        );
        assert_eq!(EncodedPair::from_words(&[1]), None);
        assert_eq!(EncodedPair::from_words(&[1, 2, 3]), None);
    }
}
