//! Encrypted aggregation and access-control engine for the fitness leaderboard.
//!
//! This crate contains:
//! - The ciphertext-algebra and access-control interfaces the engine is written against.
//! - The accumulator, bucket classifier, badge evaluator and authorization gate.
//! - The `Leaderboard` facade tying them into submit/read operations.
//! - A mock coprocessor implementing the interfaces in-process for tests and local development.

pub mod accumulator;
pub mod algebra;
pub mod badges;
pub mod buckets;
pub mod constants;
pub mod error;
pub mod gate;
pub mod leaderboard;
pub mod mock;
pub mod types;

pub use algebra::{AccessControl, Coprocessor, FheAlgebra};
pub use error::FheError;
pub use leaderboard::Leaderboard;
pub use mock::MockCoprocessor;
