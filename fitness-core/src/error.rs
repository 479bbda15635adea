use crate::types::Handle;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FheError {
    #[error("input proof does not verify for handle {0}")]
    ProofInvalid(Handle),

    #[error("input proof covers {got} handles, expected at least {expected}")]
    InputCount { expected: usize, got: usize },

    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(Handle),

    #[error("ciphertext {handle} is not of type {expected}")]
    TypeMismatch { handle: Handle, expected: &'static str },

    #[error("caller is not authorized to decrypt {0}")]
    UnauthorizedDecryption(Handle),

    #[error("submission count cannot grow past {}", u32::MAX)]
    SubmissionLimit,

    #[error("encoding error: {0}")]
    Encoding(String),
}
