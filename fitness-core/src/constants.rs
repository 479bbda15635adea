//! Crate-wide constants: histogram boundaries, badge thresholds, and the Poseidon
//! parameters used by the mock coprocessor.

use crate::types::Metric;
use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{find_poseidon_ark_and_mds, PoseidonConfig};
use ark_ff::PrimeField;

/// Number of histogram buckets per metric.
pub const NUM_BUCKETS: usize = 5;

/// Inclusive lower bound of each step bucket. Each bucket ends (exclusive) where the
/// next begins; the last one is open-ended.
pub const STEP_BOUNDARIES: [u32; NUM_BUCKETS] = [0, 2_000, 5_000, 10_000, 20_000];

/// Lower bounds of the minute buckets.
pub const MINUTE_BOUNDARIES: [u32; NUM_BUCKETS] = [0, 30, 60, 90, 120];

/// Lower bounds of the calorie buckets.
pub const CALORIE_BOUNDARIES: [u32; NUM_BUCKETS] = [0, 200, 400, 600, 800];

pub fn bucket_boundaries(metric: Metric) -> &'static [u32; NUM_BUCKETS] {
    match metric {
        Metric::Steps => &STEP_BOUNDARIES,
        Metric::Minutes => &MINUTE_BOUNDARIES,
        Metric::Calories => &CALORIE_BOUNDARIES,
    }
}

/// Number of achievement badges.
pub const NUM_BADGES: usize = 5;

/// Cumulative steps for the marathoner badge (one marathon, in metres).
pub const MARATHONER_STEPS: u32 = 42_195;

/// Minutes in a single submission for the centurion badge.
pub const CENTURION_MINUTES: u32 = 100;

/// Calories in a single submission for the calorie king badge.
pub const CALORIE_KING_CALORIES: u32 = 1_000;

/// Cumulative minutes for the committed badge.
pub const COMMITTED_MINUTES: u32 = 500;

/// Number of submissions for the consistent badge.
pub const CONSISTENT_SUBMISSIONS: u32 = 7;

// Poseidon sponge configuration, width 3 (rate 2, capacity 1).
//
// Only the mock coprocessor uses this, to derive handles and input-proof commitments.
pub const POSEIDON_RATE: usize = 2;
pub const POSEIDON_CAPACITY: usize = 1;
pub const POSEIDON_FULL_ROUNDS: usize = 8;
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;
pub const POSEIDON_ALPHA: u64 = 5;

/// Deterministically derive Poseidon parameters for BN254::Fr.
///
/// Derivation is not free; callers should build this once and keep it.
pub fn poseidon_config() -> PoseidonConfig<Fr> {
    let prime_bits = Fr::MODULUS_BIT_SIZE as u64;

    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        prime_bits,
        POSEIDON_RATE,
        POSEIDON_FULL_ROUNDS as u64,
        POSEIDON_PARTIAL_ROUNDS as u64,
        0,
    );

    PoseidonConfig::new(
        POSEIDON_FULL_ROUNDS,
        POSEIDON_PARTIAL_ROUNDS,
        POSEIDON_ALPHA,
        mds,
        ark,
        POSEIDON_RATE,
        POSEIDON_CAPACITY,
    )
}
