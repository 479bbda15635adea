//! Interfaces to the external ciphertext runtime.
//!
//! Everything the engine computes is expressed through `FheAlgebra`, and every
//! decryption right it hands out goes through `AccessControl`. Neither trait exposes
//! a way to read a plaintext back; decryption belongs to the runtime's own service.

use crate::error::FheError;
use crate::types::{Address, Ebool, EncryptedInput, Euint32, Handle};

/// Homomorphic operations over encrypted 32-bit integers and booleans.
///
/// Arithmetic wraps modulo 2^32.
pub trait FheAlgebra {
    /// Check an input proof against `(user, contract)` and return the usable ciphertext.
    fn verify_input(&mut self, input: &EncryptedInput, user: Address, contract: Address) -> Result<Euint32, FheError>;

    /// Trivially encrypt a public constant.
    fn trivial_u32(&mut self, value: u32) -> Result<Euint32, FheError>;

    fn trivial_bool(&mut self, value: bool) -> Result<Ebool, FheError>;

    fn add(&mut self, lhs: Euint32, rhs: Euint32) -> Result<Euint32, FheError>;

    /// `lhs >= rhs` against a plaintext scalar.
    fn ge_scalar(&mut self, lhs: Euint32, rhs: u32) -> Result<Ebool, FheError>;

    /// `lhs < rhs` against a plaintext scalar.
    fn lt_scalar(&mut self, lhs: Euint32, rhs: u32) -> Result<Ebool, FheError>;

    fn and(&mut self, lhs: Ebool, rhs: Ebool) -> Result<Ebool, FheError>;

    /// Oblivious select: `cond ? if_true : if_false`, without revealing `cond`.
    fn select(&mut self, cond: Ebool, if_true: Euint32, if_false: Euint32) -> Result<Euint32, FheError>;

    /// Free a ciphertext nothing refers to any more, along with its grants.
    /// Unknown handles are ignored.
    fn release(&mut self, handle: Handle);
}

/// The access control directory: who may request decryption of which handle.
///
/// Grants are idempotent.
pub trait AccessControl {
    fn allow(&mut self, handle: Handle, account: Address);

    /// Mark a handle decryptable by anyone.
    fn allow_public(&mut self, handle: Handle);

    fn is_allowed(&self, handle: Handle, account: Address) -> bool;

    /// Whether anyone besides `account` may decrypt `handle`.
    fn has_other_readers(&self, handle: Handle, account: Address) -> bool;
}

/// A full ciphertext runtime: algebra plus its access control directory.
pub trait Coprocessor: FheAlgebra + AccessControl {}

impl<T: FheAlgebra + AccessControl> Coprocessor for T {}
