//! Sharder implementation.
use std::io::Cursor;

/// Maps an input deterministically onto `[0, 1)`.
pub trait Sharder {
    /// Position of `input` in `[0, 1)`.
    fn fraction(&self, input: &[u8]) -> f64;
}

/// The default (and only) sharder: 32-bit murmur3 with seed 0, read as unsigned and divided by
/// 2^32.
///
/// Every Prefab SDK buckets with this function, so a given config key and identity land in the
/// same variant whichever SDK evaluates them.
pub struct Murmur3Sharder;

impl Sharder for Murmur3Sharder {
    fn fraction(&self, input: &[u8]) -> f64 {
        // Reading from an in-memory cursor cannot fail.
        let hash = murmur3::murmur3_32(&mut Cursor::new(input), 0).unwrap_or(0);
        f64::from(hash) / 4_294_967_296.0
    }
}

#[cfg(test)]
mod tests {
    use super::{Murmur3Sharder, Sharder};

    #[test]
    fn matches_reference_murmur3_values() {
        assert_eq!(Murmur3Sharder.fraction(b""), 0.0);
        assert_eq!(
            Murmur3Sharder.fraction(b"hello"),
            f64::from(0x248b_fa47_u32) / 4_294_967_296.0
        );
        assert_eq!(
            Murmur3Sharder.fraction(b"The quick brown fox jumps over the lazy dog"),
            f64::from(0x2e4f_f723_u32) / 4_294_967_296.0
        );
    }

    #[test]
    fn fraction_is_in_unit_interval() {
        for i in 0..1_000 {
            let f = Murmur3Sharder.fraction(format!("key{i}").as_bytes());
            assert!((0.0..1.0).contains(&f));
        }
    }
}
