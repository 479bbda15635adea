//! Achievement badges, evaluated over encrypted user state on every request.

use crate::accumulator::UserRecord;
use crate::algebra::FheAlgebra;
use crate::constants::{
    CALORIE_KING_CALORIES, CENTURION_MINUTES, COMMITTED_MINUTES, CONSISTENT_SUBMISSIONS, MARATHONER_STEPS,
    NUM_BADGES,
};
use crate::error::FheError;
use crate::types::Ebool;
use serde::{Deserialize, Serialize};

/// Badges in the order `evaluate` returns them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    /// Cumulative steps reach a marathon.
    Marathoner,
    /// One session of at least 100 minutes.
    Centurion,
    /// One session burning at least 1000 calories.
    CalorieKing,
    /// Cumulative minutes reach 500.
    Committed,
    /// Seven or more submissions.
    Consistent,
}

impl Badge {
    pub const ALL: [Badge; NUM_BADGES] = [
        Badge::Marathoner,
        Badge::Centurion,
        Badge::CalorieKing,
        Badge::Committed,
        Badge::Consistent,
    ];

    /// Threshold the badge's source value is compared against (`>=`).
    pub fn threshold(&self) -> u32 {
        match self {
            Badge::Marathoner => MARATHONER_STEPS,
            Badge::Centurion => CENTURION_MINUTES,
            Badge::CalorieKing => CALORIE_KING_CALORIES,
            Badge::Committed => COMMITTED_MINUTES,
            Badge::Consistent => CONSISTENT_SUBMISSIONS,
        }
    }

    fn evaluate_one<A: FheAlgebra>(&self, fhe: &mut A, record: &UserRecord) -> Result<Ebool, FheError> {
        let t = self.threshold();
        match self {
            Badge::Marathoner => fhe.ge_scalar(record.cumulative.steps, t),
            Badge::Centurion => fhe.ge_scalar(record.latest.minutes, t),
            Badge::CalorieKing => fhe.ge_scalar(record.latest.calories, t),
            Badge::Committed => fhe.ge_scalar(record.cumulative.minutes, t),
            // The count is public; the outcome is still a ciphertext like every other badge.
            Badge::Consistent => fhe.trivial_bool(record.submission_count >= t),
        }
    }
}

pub fn evaluate<A: FheAlgebra>(fhe: &mut A, record: &UserRecord) -> Result<[Ebool; NUM_BADGES], FheError> {
    let mut out = Vec::with_capacity(NUM_BADGES);
    for badge in Badge::ALL {
        out.push(badge.evaluate_one(fhe, record)?);
    }
    out.try_into()
        .map_err(|_| FheError::Encoding("badge vector length".to_string()))
}
