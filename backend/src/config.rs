use crate::errors::ApiError;
use fitness_core::types::Address;
use std::path::PathBuf;

/// Address the engine is deployed at when `CONTRACT_ADDRESS` is not set.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x000000000000000000000000000000000000f175";

/// Process configuration, read once from the environment at start-up.
#[derive(Clone, Debug)]
pub struct Config {
    /// `BACKEND_ADDR`, default `127.0.0.1:8080`.
    pub addr: String,
    /// `DATA_DIR`, default `data`. Holds the journal database and the state snapshot.
    pub data_dir: PathBuf,
    /// `CONTRACT_ADDRESS`: the engine's own address, bound into every input proof.
    pub contract_address: Address,
    /// `API_KEY` guarding the development-only mock routes.
    pub api_key: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, ApiError> {
        let contract_address = env_or("CONTRACT_ADDRESS", DEFAULT_CONTRACT_ADDRESS)
            .parse::<Address>()
            .map_err(|e| ApiError::Config(format!("CONTRACT_ADDRESS: {e}")))?;

        Ok(Self {
            addr: env_or("BACKEND_ADDR", "127.0.0.1:8080"),
            data_dir: PathBuf::from(env_or("DATA_DIR", "data")),
            contract_address,
            // In production, this should be a strong secret from environment.
            api_key: env_or("API_KEY", "dev-secret-key"),
        })
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.data_dir.join("journal.sqlite").to_string_lossy())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }
}
