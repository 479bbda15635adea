use crate::config::Config;
use crate::db::Db;
use crate::errors::ApiError;
use fitness_core::types::Address;
use fitness_core::{FheError, Leaderboard, MockCoprocessor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// The engine together with the coprocessor it runs on.
///
/// Reads grant decryption rights, so any operation may mutate it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ledger {
    pub board: Leaderboard,
    pub fhe: MockCoprocessor,
}

impl Ledger {
    pub fn deploy(contract: Address, fhe: MockCoprocessor) -> Self {
        Self {
            board: Leaderboard::new(contract),
            fhe,
        }
    }

    /// Moves whenever the engine's ciphertexts or grants change.
    pub fn revision(&self) -> u64 {
        self.fhe.revision()
    }

    /// Restore the snapshot at `path`, or deploy a fresh engine if there is none.
    pub fn load_or_deploy(path: &Path, contract: Address) -> Result<Self, ApiError> {
        if !path.exists() {
            info!(%contract, "no snapshot found, deploying fresh engine");
            return Ok(Self::deploy(contract, MockCoprocessor::with_random_salt()));
        }

        let bytes = std::fs::read(path).map_err(|_| ApiError::Internal)?;
        let ledger: Ledger = serde_json::from_slice(&bytes).map_err(|e| {
            warn!(error = %e, path = %path.display(), "unreadable snapshot");
            ApiError::Internal
        })?;

        if ledger.board.address() != contract {
            return Err(ApiError::Config(format!(
                "snapshot belongs to {}, configured address is {contract}",
                ledger.board.address()
            )));
        }

        info!(
            %contract,
            users = ledger.board.user_count(),
            submissions = ledger.board.total_submissions(),
            "engine restored from snapshot"
        );
        Ok(ledger)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<Config>,
    ledger: Arc<Mutex<Ledger>>,
    snapshot_path: Option<PathBuf>,
}

impl AppState {
    /// `snapshot_path: None` keeps the ledger in memory only.
    pub fn new(db: Db, config: Config, ledger: Ledger, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            db,
            config: Arc::new(config),
            ledger: Arc::new(Mutex::new(ledger)),
            snapshot_path,
        }
    }

    /// Exclusive access to the ledger. Holding the guard is what serializes operations
    /// into a single total order.
    pub async fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().await
    }

    /// Run one operation under the ledger lock.
    ///
    /// The operation works on a copy. A copy that changed is persisted and only then
    /// replaces the live ledger; one that did not change is dropped without a write.
    pub async fn transact<T>(&self, op: impl FnOnce(&mut Ledger) -> Result<T, FheError>) -> Result<T, ApiError> {
        let mut current = self.lock_ledger().await;
        let mut next = current.clone();
        let out = op(&mut next)?;

        if next.revision() != current.revision() {
            self.persist(&next).await?;
            *current = next;
        }
        Ok(out)
    }

    /// Write a snapshot of the ledger. Callers must hold the lock.
    pub async fn persist(&self, ledger: &Ledger) -> Result<(), ApiError> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(ledger).map_err(|_| ApiError::Internal)?;

        tokio::task::spawn_blocking(move || {
            // Readers never observe a partially written snapshot.
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, &path)
        })
        .await
        .map_err(|_| ApiError::Internal)?
        .map_err(|e| {
            warn!(error = %e, "failed to write snapshot");
            ApiError::Internal
        })
    }
}
