//! Oblivious histogram classification.
//!
//! A submitted value is compared against every bucket boundary, producing one encrypted
//! membership bit per bucket. Every counter is then advanced by `select(bit, 1, 0)`, so
//! all five counters get a fresh ciphertext on every submission and nothing in the
//! sequence of operations depends on which bucket was hit.
//!
//! Intermediate comparisons, the mask and the constants are released once the new
//! counters exist; only the counters outlive a call to `record`.

use crate::algebra::FheAlgebra;
use crate::constants::NUM_BUCKETS;
use crate::error::FheError;
use crate::types::{handle_or_unset, Ebool, Euint32, Handle};
use serde::{Deserialize, Serialize};

/// Five global counters for one metric. Unset until the first submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSet {
    pub counters: [Option<Euint32>; NUM_BUCKETS],
}

impl BucketSet {
    pub fn handles(&self) -> [Handle; NUM_BUCKETS] {
        self.counters.map(handle_or_unset)
    }
}

/// One-hot membership mask: bucket `i` holds `lower[i] <= value < lower[i + 1]`, and the
/// last bucket is open-ended.
///
/// A value sitting exactly on a boundary belongs to the upper bucket.
pub fn classify<A: FheAlgebra>(
    fhe: &mut A,
    value: Euint32,
    lower: &[u32; NUM_BUCKETS],
) -> Result<[Ebool; NUM_BUCKETS], FheError> {
    let mut mask = Vec::with_capacity(NUM_BUCKETS);

    for i in 0..NUM_BUCKETS {
        let above = fhe.ge_scalar(value, lower[i])?;
        let bit = match lower.get(i + 1) {
            Some(upper) => {
                let below = fhe.lt_scalar(value, *upper)?;
                let bit = fhe.and(above, below)?;
                fhe.release(above.0);
                fhe.release(below.0);
                bit
            }
            None => above,
        };
        mask.push(bit);
    }

    mask.try_into()
        .map_err(|_| FheError::Encoding("bucket mask length".to_string()))
}

/// Advance every counter by its mask bit. Unset counters count as zero.
pub fn increment<A: FheAlgebra>(fhe: &mut A, set: &BucketSet, mask: &[Ebool; NUM_BUCKETS]) -> Result<BucketSet, FheError> {
    let one = fhe.trivial_u32(1)?;
    let zero = fhe.trivial_u32(0)?;

    let mut next = BucketSet::default();
    for (i, bit) in mask.iter().enumerate() {
        let step = fhe.select(*bit, one, zero)?;
        let counter = match set.counters[i] {
            Some(c) => {
                let sum = fhe.add(c, step)?;
                fhe.release(step.0);
                sum
            }
            None => step,
        };
        next.counters[i] = Some(counter);
    }

    fhe.release(one.0);
    fhe.release(zero.0);
    Ok(next)
}

/// Classify `value` and return the advanced bucket set.
pub fn record<A: FheAlgebra>(
    fhe: &mut A,
    set: &BucketSet,
    value: Euint32,
    lower: &[u32; NUM_BUCKETS],
) -> Result<BucketSet, FheError> {
    let mask = classify(fhe, value, lower)?;
    let next = increment(fhe, set, &mask)?;
    for bit in mask {
        fhe.release(bit.0);
    }
    Ok(next)
}
