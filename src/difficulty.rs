use super::*;

/// Proof-of-work limit of the proxied chain: the full 256-bit hash space, so
/// a difficulty-1 share target admits every possible header hash.
pub static POW_LIMIT: LazyLock<BigUint> =
    LazyLock::new(|| (BigUint::one() << 256u32) - BigUint::one());

const TARGET_SIZE: usize = 32;

#[derive(Debug, Snafu)]
pub enum CodecError {
    #[snafu(display("difficulty must be positive"))]
    InvalidDifficulty,
    #[snafu(display("malformed hex: {source}"))]
    MalformedHex { source: hex::FromHexError },
}

/// `POW_LIMIT / difficulty`. Inverse of `difficulty_from_le_target` up to
/// integer-division truncation.
pub fn target_from_difficulty(difficulty: &BigUint) -> Result<BigUint, CodecError> {
    if difficulty.is_zero() {
        return Err(CodecError::InvalidDifficulty);
    }

    Ok(&*POW_LIMIT / difficulty)
}

/// Decodes a little-endian getwork target string back into a difficulty.
/// Malformed input and the all-zero target yield the zero-difficulty
/// sentinel rather than an error; callers treat zero as unusable.
pub fn difficulty_from_le_target(target_hex: &str) -> BigUint {
    let Ok(bytes) = hex::decode(target_hex) else {
        return BigUint::zero();
    };

    if bytes.len() != TARGET_SIZE {
        return BigUint::zero();
    }

    let target = BigUint::from_bytes_le(&bytes);

    if target.is_zero() {
        return target;
    }

    &*POW_LIMIT / target
}

/// Serializes a target as an unsigned 256-bit little-endian hex string,
/// always 64 characters. Values wider than 256 bits are truncated from the
/// most-significant end.
pub fn target_to_le_hex(target: &BigUint) -> String {
    let bytes = target.to_bytes_be();
    let mut buf = [0u8; TARGET_SIZE];

    if bytes.len() <= TARGET_SIZE {
        buf[TARGET_SIZE - bytes.len()..].copy_from_slice(&bytes);
    } else {
        buf.copy_from_slice(&bytes[bytes.len() - TARGET_SIZE..]);
    }

    buf.reverse();

    hex::encode(buf)
}

/// Parses a big-endian hex target, as produced by compact decoding.
pub fn target_from_be_hex(target_hex: &str) -> Result<BigUint, CodecError> {
    let bytes = snafu::ResultExt::context(hex::decode(target_hex), MalformedHexSnafu)?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Expands the chain-protocol compact representation found in header bits
/// fields. The sign bit never appears in bits fields and is ignored.
pub fn compact_to_big(compact: u32) -> BigUint {
    let mantissa = compact & 0x007f_ffff;
    let exponent = compact >> 24;

    if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    }
}

/// Proof-of-work difficulty as a multiple of the minimum difficulty, from a
/// header bits field. Fixed to 8 decimal digits of integer precision before
/// the float conversion. Diagnostic only.
pub fn difficulty_ratio(bits: u32) -> f64 {
    const PRECISION: u64 = 100_000_000;

    let target = compact_to_big(bits);

    if target.is_zero() {
        return 0.0;
    }

    let scaled = &*POW_LIMIT * BigUint::from(PRECISION) / target;

    scaled.to_f64().unwrap_or(0.0) / PRECISION as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_one_target_is_pow_limit() {
        assert_eq!(
            target_from_difficulty(&BigUint::one()).unwrap(),
            *POW_LIMIT
        );
    }

    #[test]
    fn zero_difficulty_is_rejected() {
        assert!(matches!(
            target_from_difficulty(&BigUint::zero()),
            Err(CodecError::InvalidDifficulty)
        ));
    }

    #[test]
    fn difficulty_round_trips_through_le_target() {
        for difficulty in [1u64, 8, 1000, 1 << 60] {
            let difficulty = BigUint::from(difficulty);
            let target = target_from_difficulty(&difficulty).unwrap();
            let recovered = difficulty_from_le_target(&target_to_le_hex(&target));
            assert_eq!(recovered, difficulty);
        }
    }

    #[test]
    fn le_target_is_always_64_hex_chars() {
        for target in [
            BigUint::zero(),
            BigUint::one(),
            POW_LIMIT.clone(),
            BigUint::one() << 300u32,
        ] {
            assert_eq!(target_to_le_hex(&target).len(), 64);
        }
    }

    #[test]
    fn le_encoding_is_self_inverse() {
        let target = BigUint::parse_bytes(b"deadbeef00000000cafebabe", 16).unwrap();
        let encoded = target_to_le_hex(&target);
        let decoded = BigUint::from_bytes_le(&hex::decode(&encoded).unwrap());
        assert_eq!(decoded, target);
    }

    #[test]
    fn oversized_target_truncates_most_significant_bits() {
        assert_eq!(
            target_to_le_hex(&(BigUint::one() << 256u32)),
            "0".repeat(64)
        );
    }

    #[test]
    fn be_hex_decodes() {
        assert_eq!(target_from_be_hex("00ff").unwrap(), BigUint::from(255u64));
    }

    #[test]
    fn malformed_be_hex_is_an_error() {
        assert!(matches!(
            target_from_be_hex("zz"),
            Err(CodecError::MalformedHex { .. })
        ));
    }

    #[test]
    fn le_target_sentinels() {
        assert_eq!(difficulty_from_le_target("zz"), BigUint::zero());
        assert_eq!(difficulty_from_le_target("00ff"), BigUint::zero());
        assert_eq!(
            difficulty_from_le_target(&"00".repeat(32)),
            BigUint::zero()
        );
    }

    #[test]
    fn compact_expansion() {
        assert_eq!(compact_to_big(0), BigUint::zero());
        assert_eq!(compact_to_big(0x0100_3456), BigUint::zero());
        assert_eq!(compact_to_big(0x0112_3456), BigUint::from(0x12u64));
        assert_eq!(compact_to_big(0x0200_8000), BigUint::from(0x80u64));
        assert_eq!(compact_to_big(0x0500_9234), BigUint::from(0x9234_0000u64));
        assert_eq!(compact_to_big(0x0300_03e8), BigUint::from(1000u64));
        assert_eq!(
            compact_to_big(0x2200_ffff),
            BigUint::from(0xffffu64) << 248u32
        );
    }

    #[test]
    fn ratio_of_zero_target_is_zero() {
        assert_eq!(difficulty_ratio(0), 0.0);
    }

    #[test]
    fn ratio_scales_with_target() {
        let thousand = difficulty_ratio(0x0300_03e8);
        let expected = POW_LIMIT.to_f64().unwrap() / 1000.0;
        assert!((thousand / expected - 1.0).abs() < 1e-6);
    }
}
