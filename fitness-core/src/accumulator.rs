//! Per-user and global running sums.

use crate::algebra::FheAlgebra;
use crate::error::FheError;
use crate::types::{Euint32, MetricTriple};
use serde::{Deserialize, Serialize};

/// Process-wide running totals. `None` until the first submission ever.
pub type GlobalStats = Option<MetricTriple<Euint32>>;

/// Everything the engine keeps about one address.
///
/// A record only exists once its owner has submitted, so its encrypted fields are
/// always set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub cumulative: MetricTriple<Euint32>,
    pub latest: MetricTriple<Euint32>,
    /// Public metadata, not a secret.
    pub submission_count: u32,
}

/// Initialize-or-add: an unset total becomes `value`, otherwise `total + value`.
pub fn accumulate<A: FheAlgebra>(fhe: &mut A, total: Option<Euint32>, value: Euint32) -> Result<Euint32, FheError> {
    match total {
        Some(t) => fhe.add(t, value),
        None => Ok(value),
    }
}

pub fn accumulate_triple<A: FheAlgebra>(
    fhe: &mut A,
    totals: Option<&MetricTriple<Euint32>>,
    values: &MetricTriple<Euint32>,
) -> Result<MetricTriple<Euint32>, FheError> {
    values.try_map_with(|metric, v| accumulate(fhe, totals.map(|t| t[metric]), v))
}

/// Fold one submission into an existing (or absent) user record.
///
/// Returns the record to store; the caller commits it only once the whole submission
/// has succeeded.
pub fn apply_submission<A: FheAlgebra>(
    fhe: &mut A,
    record: Option<&UserRecord>,
    values: &MetricTriple<Euint32>,
) -> Result<UserRecord, FheError> {
    let submission_count = record
        .map_or(0, |r| r.submission_count)
        .checked_add(1)
        .ok_or(FheError::SubmissionLimit)?;
    let cumulative = accumulate_triple(fhe, record.map(|r| &r.cumulative), values)?;

    Ok(UserRecord {
        cumulative,
        latest: *values,
        submission_count,
    })
}
