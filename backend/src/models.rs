use chrono::{DateTime, Utc};
use fitness_core::badges::Badge;
use fitness_core::constants::{NUM_BADGES, NUM_BUCKETS};
use fitness_core::mock::Plaintext;
use fitness_core::types::{Address, Handle, Metric, MetricTriple};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// An encrypted value as carried over HTTP: the proof is base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedInputDto {
    pub handle: Handle,
    pub proof_b64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitActivityRequest {
    pub steps: EncryptedInputDto,
    pub minutes: EncryptedInputDto,
    pub calories: EncryptedInputDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitActivityResponse {
    pub tx_id: Uuid,
    pub user: Address,
    pub submission_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub steps: Handle,
    pub minutes: Handle,
    pub calories: Handle,
}

impl From<MetricTriple<Handle>> for StatsResponse {
    fn from(t: MetricTriple<Handle>) -> Self {
        Self {
            steps: t.steps,
            minutes: t.minutes,
            calories: t.calories,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserStatsResponse {
    pub user: Address,
    pub steps: Handle,
    pub minutes: Handle,
    pub calories: Handle,
    /// Public metadata, returned in the clear.
    pub submission_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BucketsResponse {
    pub metric: Metric,
    /// Inclusive lower bound of each bucket; the last bucket is open-ended.
    pub lower_bounds: [u32; NUM_BUCKETS],
    pub counters: [Handle; NUM_BUCKETS],
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BadgeHandle {
    pub badge: Badge,
    pub handle: Handle,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BadgesResponse {
    pub user: Address,
    /// Always in the order marathoner, centurion, calorie king, committed, consistent.
    pub badges: Vec<BadgeHandle>,
}

impl BadgesResponse {
    pub fn new(user: Address, handles: [Handle; NUM_BADGES]) -> Self {
        Self {
            user,
            badges: Badge::ALL
                .into_iter()
                .zip(handles)
                .map(|(badge, handle)| BadgeHandle { badge, handle })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BucketTable {
    pub metric: Metric,
    pub lower_bounds: [u32; NUM_BUCKETS],
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BadgeRule {
    pub badge: Badge,
    pub threshold: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContractInfoResponse {
    pub address: Address,
    pub buckets: Vec<BucketTable>,
    pub badges: Vec<BadgeRule>,
    pub users: u64,
    pub total_submissions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    SubmitActivity,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::SubmitActivity => "submit_activity",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit_activity" => Ok(TransactionKind::SubmitActivity),
            other => Err(format!("unknown transaction kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Committed,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Committed => "committed",
            TransactionStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "committed" => Ok(TransactionStatus::Committed),
            "rejected" => Ok(TransactionStatus::Rejected),
            other => Err(format!("unknown transaction status '{other}'")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub seq: u64,
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub kind: TransactionKind,
    pub caller: Address,
    pub status: TransactionStatus,
    pub detail: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionListResponse {
    pub offset: u64,
    pub limit: u64,
    pub total: u64,
    pub transactions: Vec<TransactionRecord>,
}

/// Development-only: plaintext activity to encrypt for the caller.
#[derive(Debug, Serialize, Deserialize)]
pub struct MockEncryptRequest {
    pub steps: u32,
    pub minutes: u32,
    pub calories: u32,
}

/// Ready to be posted as-is to the submission endpoint.
pub type MockEncryptResponse = SubmitActivityRequest;

#[derive(Debug, Serialize, Deserialize)]
pub struct MockDecryptRequest {
    pub handles: Vec<Handle>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecryptedValue {
    pub handle: Handle,
    #[serde(flatten)]
    pub value: Plaintext,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MockDecryptResponse {
    pub values: Vec<DecryptedValue>,
}
