//! Deterministic bucketing for percentage rollouts.
//!
//! The transform must be identical in every SDK, so it is pinned here:
//!
//! 1. Each stickiness property is rendered as a string: strings verbatim, booleans as
//!    `true`/`false`, numbers with Rust's `f64` display (integral values have no fraction, so
//!    `42.0` renders as `42`).
//! 2. The strings are joined with `|`.
//! 3. The joined string is hashed with MD5.
//! 4. The first four bytes of the digest (the first eight characters of the uppercase hex digest)
//!    are read as a big-endian `u32`, and the bucket is that value modulo 100.
//!
//! Test vectors: `["user-7"]` → 21, `["user-3"]` → 6, `["ios", "42"]` → 68.
use std::borrow::Cow;

use crate::ContextValue;

/// Separator between stickiness property values.
pub const PROPERTY_DELIMITER: &str = "|";

/// Number of percentage buckets.
pub const TOTAL_BUCKETS: u32 = 100;

/// The default (and only) bucketer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Bucketer;

impl Md5Bucketer {
    /// Uppercase hex MD5 digest of `input`.
    pub fn digest_hex(&self, input: impl AsRef<[u8]>) -> String {
        format!("{:X}", md5::compute(input))
    }

    /// Map `input` into a bucket in `[0, 100)`.
    pub fn get_bucket(&self, input: impl AsRef<[u8]>) -> u32 {
        let hash = md5::compute(input);
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        value % TOTAL_BUCKETS
    }

    /// Bucket for a list of stickiness property values.
    ///
    /// Returns `None` if any of the values is null, as a missing stickiness property must never
    /// silently place the entity into a shared bucket.
    pub fn bucket_for_values<'a>(
        &self,
        values: impl IntoIterator<Item = &'a ContextValue>,
    ) -> Option<u32> {
        let key = stickiness_key(values)?;
        Some(self.get_bucket(key))
    }

    /// Map `seed` into `[0, 1)` the way the `isInPercentage` operators expect.
    ///
    /// Uses the little-endian `u32` of the first four digest bytes divided by `u32::MAX`.
    pub fn seed_fraction(&self, seed: &str) -> f64 {
        let hash = md5::compute(seed);
        let value = u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]);
        let fraction = f64::from(value) / f64::from(u32::MAX);
        if fraction >= 1.0 {
            0.0
        } else {
            fraction
        }
    }
}

/// Join the string representations of `values` with [`PROPERTY_DELIMITER`].
pub fn stickiness_key<'a>(values: impl IntoIterator<Item = &'a ContextValue>) -> Option<String> {
    let parts = values
        .into_iter()
        .map(render)
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join(PROPERTY_DELIMITER))
}

fn render(value: &ContextValue) -> Option<Cow<'_, str>> {
    match value {
        ContextValue::String(s) => Some(Cow::Borrowed(s)),
        ContextValue::Boolean(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
        ContextValue::Number(n) => Some(Cow::Owned(n.to_string())),
        ContextValue::Null => None,
    }
}
