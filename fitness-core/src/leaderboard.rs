//! The engine facade: one `submit` path and the read paths over shared state.
//!
//! The leaderboard owns no coprocessor; callers pass one in explicitly for every
//! operation. Whoever holds `&mut Leaderboard` is the single writer, so the enclosing
//! transaction boundary is the only synchronization the engine needs.

use crate::accumulator::{accumulate_triple, apply_submission, GlobalStats, UserRecord};
use crate::algebra::Coprocessor;
use crate::badges;
use crate::buckets::{self, BucketSet};
use crate::constants::{bucket_boundaries, NUM_BADGES, NUM_BUCKETS};
use crate::error::FheError;
use crate::gate::{disclose, retain, Disclosure};
use crate::types::{ActivitySubmission, Address, Handle, Metric, MetricTriple};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub user: Address,
    pub submission_count: u32,
}

/// Cumulative totals of one user; the count is plaintext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub steps: Handle,
    pub minutes: Handle,
    pub calories: Handle,
    pub submission_count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Leaderboard {
    address: Address,
    global: GlobalStats,
    users: HashMap<Address, UserRecord>,
    buckets: MetricTriple<BucketSet>,
    /// The most recent badge evaluation handed to each user.
    #[serde(default)]
    issued_badges: HashMap<Address, [Handle; NUM_BADGES]>,
}

impl Leaderboard {
    /// A freshly deployed engine: no users, every aggregate unset.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            global: None,
            users: HashMap::new(),
            buckets: MetricTriple::default(),
            issued_badges: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Total accepted submissions across all users.
    pub fn total_submissions(&self) -> u64 {
        self.users.values().map(|r| r.submission_count as u64).sum()
    }

    pub fn submission_count(&self, user: Address) -> u32 {
        self.users.get(&user).map_or(0, |r| r.submission_count)
    }

    /// Accept one encrypted activity from `user`.
    ///
    /// All-or-nothing: proofs are checked first, every new ciphertext is computed into
    /// locals, and state is only written once nothing else can fail.
    pub fn submit<C: Coprocessor>(
        &mut self,
        fhe: &mut C,
        user: Address,
        submission: &ActivitySubmission,
    ) -> Result<SubmissionReceipt, FheError> {
        let engine = self.address;

        let values = submission
            .as_ref()
            .try_map_with(|_, input| fhe.verify_input(input, user, engine))?;

        let global = accumulate_triple(fhe, self.global.as_ref(), &values)?;
        let record = apply_submission(fhe, self.users.get(&user), &values)?;
        let next_buckets = self
            .buckets
            .as_ref()
            .try_map_with(|metric, set| buckets::record(fhe, set, values[metric], bucket_boundaries(metric)))?;

        retain(fhe, &global.map(|v| v.0).to_array(), engine);
        retain(fhe, &record.cumulative.map(|v| v.0).to_array(), engine);
        retain(fhe, &record.latest.map(|v| v.0).to_array(), engine);
        for set in next_buckets.to_array() {
            retain(fhe, &set.handles(), engine);
        }

        let receipt = SubmissionReceipt {
            user,
            submission_count: record.submission_count,
        };

        let mut superseded = Vec::new();
        if let Some(old) = &self.global {
            superseded.extend(old.to_array().map(|v| v.0));
        }
        if let Some(old) = self.users.get(&user) {
            superseded.extend(old.cumulative.to_array().map(|v| v.0));
            superseded.extend(old.latest.to_array().map(|v| v.0));
        }
        for set in self.buckets.as_ref().to_array() {
            superseded.extend(set.handles());
        }

        self.global = Some(global);
        self.users.insert(user, record);
        self.buckets = next_buckets;
        self.release_unreferenced(fhe, superseded);

        info!(%user, submission_count = receipt.submission_count, "activity submitted");
        Ok(receipt)
    }

    /// Every handle the engine currently stores or has most recently issued.
    fn stored_handles(&self) -> HashSet<Handle> {
        let mut live = HashSet::new();
        if let Some(g) = &self.global {
            live.extend(g.to_array().map(|v| v.0));
        }
        for r in self.users.values() {
            live.extend(r.cumulative.to_array().map(|v| v.0));
            live.extend(r.latest.to_array().map(|v| v.0));
        }
        for set in self.buckets.as_ref().to_array() {
            live.extend(set.handles());
        }
        for issued in self.issued_badges.values() {
            live.extend(issued.iter().copied());
        }
        live
    }

    /// Free replaced ciphertexts that nothing stores and no one but the engine can read.
    ///
    /// Handles already disclosed to an account stay decryptable for it.
    fn release_unreferenced<C: Coprocessor>(&self, fhe: &mut C, candidates: Vec<Handle>) {
        let live = self.stored_handles();
        let mut released = 0usize;
        for h in candidates {
            if h.is_unset() || live.contains(&h) || fhe.has_other_readers(h, self.address) {
                continue;
            }
            fhe.release(h);
            released += 1;
        }
        debug!(released, "superseded ciphertexts released");
    }

    /// Global running totals, publicly decryptable. Unset before the first submission.
    pub fn global_stats<C: Coprocessor>(&self, fhe: &mut C, caller: Address) -> MetricTriple<Handle> {
        let handles = match &self.global {
            Some(g) => g.map(|v| v.0),
            None => MetricTriple::new(Handle::UNSET, Handle::UNSET, Handle::UNSET),
        };
        disclose(fhe, &handles.to_array(), Disclosure::Public { caller });
        handles
    }

    /// Cumulative totals of `user`, decryptable only by `user`.
    pub fn user_stats<C: Coprocessor>(&self, fhe: &mut C, user: Address) -> UserStats {
        let (totals, submission_count) = match self.users.get(&user) {
            Some(r) => (r.cumulative.map(|v| v.0), r.submission_count),
            None => (MetricTriple::new(Handle::UNSET, Handle::UNSET, Handle::UNSET), 0),
        };
        disclose(fhe, &totals.to_array(), Disclosure::Owner(user));

        UserStats {
            steps: totals.steps,
            minutes: totals.minutes,
            calories: totals.calories,
            submission_count,
        }
    }

    /// The most recent submission of `user`, decryptable only by `user`.
    pub fn user_latest<C: Coprocessor>(&self, fhe: &mut C, user: Address) -> MetricTriple<Handle> {
        let latest = match self.users.get(&user) {
            Some(r) => r.latest.map(|v| v.0),
            None => MetricTriple::new(Handle::UNSET, Handle::UNSET, Handle::UNSET),
        };
        disclose(fhe, &latest.to_array(), Disclosure::Owner(user));
        latest
    }

    /// Histogram counters for `metric`, publicly decryptable.
    pub fn buckets<C: Coprocessor>(&self, fhe: &mut C, caller: Address, metric: Metric) -> [Handle; NUM_BUCKETS] {
        let handles = self.buckets[metric].handles();
        disclose(fhe, &handles, Disclosure::Public { caller });
        handles
    }

    pub fn step_buckets<C: Coprocessor>(&self, fhe: &mut C, caller: Address) -> [Handle; NUM_BUCKETS] {
        self.buckets(fhe, caller, Metric::Steps)
    }

    pub fn minute_buckets<C: Coprocessor>(&self, fhe: &mut C, caller: Address) -> [Handle; NUM_BUCKETS] {
        self.buckets(fhe, caller, Metric::Minutes)
    }

    pub fn calorie_buckets<C: Coprocessor>(&self, fhe: &mut C, caller: Address) -> [Handle; NUM_BUCKETS] {
        self.buckets(fhe, caller, Metric::Calories)
    }

    /// Evaluate all badges of `user` from current state, in `Badge::ALL` order.
    ///
    /// An address that never submitted gets five unset handles. Badges are evaluated afresh
    /// on every call, and only the latest evaluation stays decryptable.
    pub fn user_badges<C: Coprocessor>(&mut self, fhe: &mut C, user: Address) -> Result<[Handle; NUM_BADGES], FheError> {
        let Some(record) = self.users.get(&user) else {
            debug!(%user, "badges requested for unknown user");
            return Ok([Handle::UNSET; NUM_BADGES]);
        };

        let handles = badges::evaluate(fhe, record)?.map(|b| b.0);
        disclose(fhe, &handles, Disclosure::Owner(user));

        if let Some(previous) = self.issued_badges.insert(user, handles) {
            for h in previous {
                fhe.release(h);
            }
        }
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCoprocessor;

    const ENGINE: Address = Address([0xC0; 20]);
    const ALICE: Address = Address([0xA1; 20]);
    const BOB: Address = Address([0xB0; 20]);

    fn encrypt(fhe: &mut MockCoprocessor, user: Address, s: u32, m: u32, c: u32) -> ActivitySubmission {
        let batch = fhe.encrypt_inputs(ENGINE, user, &[s, m, c]).unwrap();
        MetricTriple::new(batch.input(0).unwrap(), batch.input(1).unwrap(), batch.input(2).unwrap())
    }

    #[test]
    fn rejected_submission_leaves_state_untouched() {
        let mut fhe = MockCoprocessor::new(1);
        let mut board = Leaderboard::new(ENGINE);

        let good = encrypt(&mut fhe, ALICE, 100, 10, 10);
        board.submit(&mut fhe, ALICE, &good).unwrap();
        let before = serde_json::to_string(&board).unwrap();

        // Valid steps and minutes, but calories were encrypted for Bob.
        let mut mixed = encrypt(&mut fhe, ALICE, 1, 1, 1);
        mixed.calories = encrypt(&mut fhe, BOB, 1, 1, 1).calories;

        let err = board.submit(&mut fhe, ALICE, &mixed).unwrap_err();
        assert!(matches!(err, FheError::ProofInvalid(_)));
        assert_eq!(serde_json::to_string(&board).unwrap(), before);
        assert_eq!(board.submission_count(ALICE), 1);
    }

    #[test]
    fn per_user_reads_are_only_granted_to_the_owner() {
        let mut fhe = MockCoprocessor::new(2);
        let mut board = Leaderboard::new(ENGINE);
        let sub = encrypt(&mut fhe, ALICE, 3000, 20, 150);
        board.submit(&mut fhe, ALICE, &sub).unwrap();

        let stats = board.user_stats(&mut fhe, ALICE);
        assert_eq!(fhe.decrypt_u32(stats.steps, ALICE).unwrap(), 3000);
        assert!(matches!(fhe.decrypt_u32(stats.steps, BOB), Err(FheError::UnauthorizedDecryption(_))));

        let latest = board.user_latest(&mut fhe, ALICE);
        assert_eq!(fhe.decrypt_u32(latest.calories, ALICE).unwrap(), 150);
        assert!(fhe.decrypt_u32(latest.calories, BOB).is_err());
    }

    #[test]
    fn shared_aggregates_are_public() {
        let mut fhe = MockCoprocessor::new(3);
        let mut board = Leaderboard::new(ENGINE);
        let sub = encrypt(&mut fhe, ALICE, 3000, 20, 150);
        board.submit(&mut fhe, ALICE, &sub).unwrap();

        let global = board.global_stats(&mut fhe, ALICE);
        assert_eq!(fhe.decrypt_u32(global.minutes, BOB).unwrap(), 20);

        let calories = board.calorie_buckets(&mut fhe, ALICE);
        let counts: Vec<u32> = calories.iter().map(|h| fhe.decrypt_u32(*h, BOB).unwrap()).collect();
        assert_eq!(counts, vec![1, 0, 0, 0, 0]);
    }

    #[test]
    fn stored_handles_are_retained_by_the_engine() {
        let mut fhe = MockCoprocessor::new(4);
        let mut board = Leaderboard::new(ENGINE);
        let sub = encrypt(&mut fhe, ALICE, 1, 2, 3);
        board.submit(&mut fhe, ALICE, &sub).unwrap();

        let latest = board.user_latest(&mut fhe, ALICE);
        assert!(crate::algebra::AccessControl::is_allowed(&fhe, latest.steps, ENGINE));
    }

    #[test]
    fn unknown_users_read_as_unset() {
        let mut fhe = MockCoprocessor::new(5);
        let mut board = Leaderboard::new(ENGINE);

        let stats = board.user_stats(&mut fhe, BOB);
        assert_eq!(stats.submission_count, 0);
        assert!(stats.steps.is_unset());
        assert!(board.user_latest(&mut fhe, BOB).to_array().iter().all(Handle::is_unset));
        assert_eq!(board.user_badges(&mut fhe, BOB).unwrap(), [Handle::UNSET; NUM_BADGES]);
        assert_eq!(fhe.ciphertext_count(), 0);
    }

    #[test]
    fn ciphertext_table_stays_bounded() {
        let mut fhe = MockCoprocessor::new(6);
        let mut board = Leaderboard::new(ENGINE);

        let sub = encrypt(&mut fhe, ALICE, 6500, 45, 350);
        board.submit(&mut fhe, ALICE, &sub).unwrap();
        // Three inputs double as totals and latest; five counters per metric.
        assert_eq!(fhe.ciphertext_count(), 3 + 3 * NUM_BUCKETS);

        let first = board.user_badges(&mut fhe, ALICE).unwrap();
        for _ in 0..100 {
            board.user_badges(&mut fhe, ALICE).unwrap();
        }
        assert_eq!(fhe.ciphertext_count(), 3 + 3 * NUM_BUCKETS + NUM_BADGES);
        assert!(fhe.decrypt_bool(first[0], ALICE).is_err());

        let sub = encrypt(&mut fhe, ALICE, 100, 10, 10);
        board.submit(&mut fhe, ALICE, &sub).unwrap();
        // Fresh inputs, global and cumulative sums, counters, and the last badges.
        assert_eq!(fhe.ciphertext_count(), 3 * 3 + 3 * NUM_BUCKETS + NUM_BADGES);
    }

    #[test]
    fn disclosed_handles_survive_later_submissions() {
        let mut fhe = MockCoprocessor::new(7);
        let mut board = Leaderboard::new(ENGINE);

        let sub = encrypt(&mut fhe, ALICE, 500, 5, 50);
        board.submit(&mut fhe, ALICE, &sub).unwrap();
        let global = board.global_stats(&mut fhe, BOB);
        let stats = board.user_stats(&mut fhe, ALICE);

        let sub = encrypt(&mut fhe, BOB, 700, 7, 70);
        board.submit(&mut fhe, BOB, &sub).unwrap();
        let sub = encrypt(&mut fhe, ALICE, 100, 1, 10);
        board.submit(&mut fhe, ALICE, &sub).unwrap();

        assert_eq!(fhe.decrypt_u32(global.steps, BOB).unwrap(), 500);
        assert_eq!(fhe.decrypt_u32(stats.steps, ALICE).unwrap(), 500);
        let totals = board.global_stats(&mut fhe, BOB);
        assert_eq!(fhe.decrypt_u32(totals.steps, BOB).unwrap(), 1300);
    }

    #[test]
    fn first_submitters_inputs_outlive_the_shared_total() {
        let mut fhe = MockCoprocessor::new(8);
        let mut board = Leaderboard::new(ENGINE);

        let sub = encrypt(&mut fhe, ALICE, 42, 4, 2);
        board.submit(&mut fhe, ALICE, &sub).unwrap();
        let sub = encrypt(&mut fhe, BOB, 8, 1, 1);
        board.submit(&mut fhe, BOB, &sub).unwrap();

        let latest = board.user_latest(&mut fhe, ALICE);
        assert_eq!(fhe.decrypt_u32(latest.steps, ALICE).unwrap(), 42);
        let stats = board.user_stats(&mut fhe, ALICE);
        assert_eq!(fhe.decrypt_u32(stats.steps, ALICE).unwrap(), 42);
    }
}
