//! In-process stand-in for the ciphertext runtime.
//!
//! SECURITY NOTE: this is NOT encryption. Plaintexts live in a private table keyed by
//! handle, the way FHE "mock mode" runtimes work, so the engine can be driven end to end
//! in tests and local development. Handles are Poseidon digests of (salt, counter, op),
//! so they carry no information about the values behind them. Input proofs are Poseidon
//! commitments over (salt, contract, user, handles); only the holder of the salt can
//! mint them, which plays the role of the relayer signature in a real deployment.

use crate::algebra::{AccessControl, FheAlgebra};
use crate::constants::poseidon_config;
use crate::error::FheError;
use crate::types::{Address, Ebool, EncryptedInput, Euint32, Handle};
use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{PoseidonConfig, PoseidonSponge};
use ark_crypto_primitives::sponge::CryptographicSponge;
use ark_ff::PrimeField;
use ark_serialize::CanonicalSerialize;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Maximum number of values in one encrypted input batch.
pub const MAX_INPUT_BATCH: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Plaintext {
    U32(u32),
    Bool(bool),
}

#[derive(Clone, Copy)]
enum Op {
    Input = 1,
    TrivialU32,
    TrivialBool,
    Add,
    GeScalar,
    LtScalar,
    And,
    Select,
    ProofCommitment,
}

/// Handles produced by one client-side encryption, sharing a single proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBatch {
    pub handles: Vec<Handle>,
    pub proof: Vec<u8>,
}

impl InputBatch {
    pub fn input(&self, index: usize) -> Option<EncryptedInput> {
        self.handles.get(index).map(|handle| EncryptedInput {
            handle: *handle,
            proof: self.proof.clone(),
        })
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MockCoprocessor {
    salt: u64,
    counter: u64,
    values: HashMap<Handle, Plaintext>,
    acl: HashMap<Handle, BTreeSet<Address>>,
    public: HashSet<Handle>,
    /// Bumped on every change to the tables above. Not persisted.
    #[serde(skip)]
    revision: u64,
    #[serde(skip, default = "poseidon_config")]
    poseidon: PoseidonConfig<Fr>,
}

impl fmt::Debug for MockCoprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCoprocessor")
            .field("ciphertexts", &self.values.len())
            .field("granted_handles", &self.acl.len())
            .field("public_handles", &self.public.len())
            .finish()
    }
}

/// Injective field encoding of a handle: two 128-bit limbs.
fn handle_to_fr(handle: &Handle) -> [Fr; 2] {
    let mut lo = [0u8; 16];
    let mut hi = [0u8; 16];
    lo.copy_from_slice(&handle.0[..16]);
    hi.copy_from_slice(&handle.0[16..]);
    [Fr::from(u128::from_le_bytes(lo)), Fr::from(u128::from_le_bytes(hi))]
}

fn address_to_fr(address: &Address) -> Fr {
    Fr::from_le_bytes_mod_order(&address.0)
}

fn fr_to_bytes(x: Fr) -> Result<[u8; 32], FheError> {
    let mut bytes = Vec::with_capacity(32);
    x.serialize_compressed(&mut bytes)
        .map_err(|e| FheError::Encoding(format!("{e}")))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| FheError::Encoding(format!("field element encoded to {} bytes", b.len())))
}

impl MockCoprocessor {
    pub fn new(salt: u64) -> Self {
        Self {
            salt,
            counter: 0,
            values: HashMap::new(),
            acl: HashMap::new(),
            public: HashSet::new(),
            revision: 0,
            poseidon: poseidon_config(),
        }
    }

    pub fn with_random_salt() -> Self {
        Self::new(OsRng.next_u64())
    }

    /// Number of live ciphertexts.
    pub fn ciphertext_count(&self) -> usize {
        self.values.len()
    }

    /// Changes whenever a ciphertext or grant is added or removed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn digest(&self, elems: &[Fr]) -> Fr {
        let mut sponge = PoseidonSponge::<Fr>::new(&self.poseidon);
        sponge.absorb(&elems.to_vec());
        let out: Vec<Fr> = sponge.squeeze_field_elements(1);
        out[0]
    }

    fn fresh_handle(&mut self, op: Op) -> Result<Handle, FheError> {
        let elems = [Fr::from(self.salt), Fr::from(self.counter), Fr::from(op as u64)];
        self.counter += 1;
        fr_to_bytes(self.digest(&elems)).map(Handle)
    }

    fn store(&mut self, op: Op, value: Plaintext) -> Result<Handle, FheError> {
        let handle = self.fresh_handle(op)?;
        self.values.insert(handle, value);
        self.revision += 1;
        Ok(handle)
    }

    fn plaintext(&self, handle: Handle) -> Result<Plaintext, FheError> {
        self.values
            .get(&handle)
            .copied()
            .ok_or(FheError::UnknownHandle(handle))
    }

    fn u32_of(&self, v: Euint32) -> Result<u32, FheError> {
        match self.plaintext(v.0)? {
            Plaintext::U32(x) => Ok(x),
            Plaintext::Bool(_) => Err(FheError::TypeMismatch { handle: v.0, expected: "euint32" }),
        }
    }

    fn bool_of(&self, b: Ebool) -> Result<bool, FheError> {
        match self.plaintext(b.0)? {
            Plaintext::Bool(x) => Ok(x),
            Plaintext::U32(_) => Err(FheError::TypeMismatch { handle: b.0, expected: "ebool" }),
        }
    }

    fn commit_inputs(&self, contract: Address, user: Address, handles: &[Handle]) -> Result<[u8; 32], FheError> {
        let mut elems = Vec::with_capacity(4 + 2 * handles.len());
        elems.push(Fr::from(self.salt));
        elems.push(Fr::from(Op::ProofCommitment as u64));
        elems.push(address_to_fr(&contract));
        elems.push(address_to_fr(&user));
        for h in handles {
            elems.extend_from_slice(&handle_to_fr(h));
        }
        fr_to_bytes(self.digest(&elems))
    }

    /// Client-side encryption: register `values` and produce one proof binding them to
    /// `(contract, user)`.
    ///
    /// Proof layout: `count (1 byte) || handles (32 bytes each) || commitment (32 bytes)`.
    pub fn encrypt_inputs(&mut self, contract: Address, user: Address, values: &[u32]) -> Result<InputBatch, FheError> {
        if values.is_empty() || values.len() > MAX_INPUT_BATCH {
            return Err(FheError::InputCount { expected: 1, got: values.len() });
        }

        let mut handles = Vec::with_capacity(values.len());
        for v in values {
            handles.push(self.store(Op::Input, Plaintext::U32(*v))?);
        }

        let commitment = self.commit_inputs(contract, user, &handles)?;

        let mut proof = Vec::with_capacity(1 + 32 * (handles.len() + 1));
        proof.push(handles.len() as u8);
        for h in &handles {
            proof.extend_from_slice(&h.0);
        }
        proof.extend_from_slice(&commitment);

        Ok(InputBatch { handles, proof })
    }

    /// Decrypt on behalf of `requester`, who must hold a grant (or the handle must be public).
    pub fn user_decrypt(&self, handle: Handle, requester: Address) -> Result<Plaintext, FheError> {
        if handle.is_unset() {
            return Err(FheError::UnknownHandle(handle));
        }
        if !self.is_allowed(handle, requester) {
            return Err(FheError::UnauthorizedDecryption(handle));
        }
        self.plaintext(handle)
    }

    pub fn decrypt_u32(&self, handle: Handle, requester: Address) -> Result<u32, FheError> {
        match self.user_decrypt(handle, requester)? {
            Plaintext::U32(x) => Ok(x),
            Plaintext::Bool(_) => Err(FheError::TypeMismatch { handle, expected: "euint32" }),
        }
    }

    pub fn decrypt_bool(&self, handle: Handle, requester: Address) -> Result<bool, FheError> {
        match self.user_decrypt(handle, requester)? {
            Plaintext::Bool(x) => Ok(x),
            Plaintext::U32(_) => Err(FheError::TypeMismatch { handle, expected: "ebool" }),
        }
    }

    pub fn is_public(&self, handle: Handle) -> bool {
        self.public.contains(&handle)
    }
}

impl FheAlgebra for MockCoprocessor {
    fn verify_input(&mut self, input: &EncryptedInput, user: Address, contract: Address) -> Result<Euint32, FheError> {
        let invalid = || FheError::ProofInvalid(input.handle);

        let (&count, rest) = input.proof.split_first().ok_or_else(invalid)?;
        let count = count as usize;
        if count == 0 || rest.len() != 32 * (count + 1) {
            return Err(invalid());
        }

        let (listed, commitment) = rest.split_at(32 * count);
        let mut handles = Vec::with_capacity(count);
        for chunk in listed.chunks_exact(32) {
            let mut h = [0u8; 32];
            h.copy_from_slice(chunk);
            handles.push(Handle(h));
        }

        if !handles.contains(&input.handle) {
            return Err(invalid());
        }
        if self.commit_inputs(contract, user, &handles)?[..] != commitment[..] {
            return Err(invalid());
        }

        let value = Euint32(input.handle);
        self.u32_of(value)?;
        Ok(value)
    }

    fn trivial_u32(&mut self, value: u32) -> Result<Euint32, FheError> {
        self.store(Op::TrivialU32, Plaintext::U32(value)).map(Euint32)
    }

    fn trivial_bool(&mut self, value: bool) -> Result<Ebool, FheError> {
        self.store(Op::TrivialBool, Plaintext::Bool(value)).map(Ebool)
    }

    fn add(&mut self, lhs: Euint32, rhs: Euint32) -> Result<Euint32, FheError> {
        let sum = self.u32_of(lhs)?.wrapping_add(self.u32_of(rhs)?);
        self.store(Op::Add, Plaintext::U32(sum)).map(Euint32)
    }

    fn ge_scalar(&mut self, lhs: Euint32, rhs: u32) -> Result<Ebool, FheError> {
        let r = self.u32_of(lhs)? >= rhs;
        self.store(Op::GeScalar, Plaintext::Bool(r)).map(Ebool)
    }

    fn lt_scalar(&mut self, lhs: Euint32, rhs: u32) -> Result<Ebool, FheError> {
        let r = self.u32_of(lhs)? < rhs;
        self.store(Op::LtScalar, Plaintext::Bool(r)).map(Ebool)
    }

    fn and(&mut self, lhs: Ebool, rhs: Ebool) -> Result<Ebool, FheError> {
        let r = self.bool_of(lhs)? & self.bool_of(rhs)?;
        self.store(Op::And, Plaintext::Bool(r)).map(Ebool)
    }

    fn select(&mut self, cond: Ebool, if_true: Euint32, if_false: Euint32) -> Result<Euint32, FheError> {
        // Both branches are read regardless of the condition.
        let c = self.bool_of(cond)? as u32;
        let t = self.u32_of(if_true)?;
        let f = self.u32_of(if_false)?;
        let picked = c.wrapping_mul(t).wrapping_add((1 - c).wrapping_mul(f));
        self.store(Op::Select, Plaintext::U32(picked)).map(Euint32)
    }

    fn release(&mut self, handle: Handle) {
        if self.values.remove(&handle).is_some() {
            self.acl.remove(&handle);
            self.public.remove(&handle);
            self.revision += 1;
        }
    }
}

impl AccessControl for MockCoprocessor {
    fn allow(&mut self, handle: Handle, account: Address) {
        if self.acl.entry(handle).or_default().insert(account) {
            self.revision += 1;
        }
    }

    fn allow_public(&mut self, handle: Handle) {
        if self.public.insert(handle) {
            self.revision += 1;
        }
    }

    fn is_allowed(&self, handle: Handle, account: Address) -> bool {
        self.public.contains(&handle) || self.acl.get(&handle).is_some_and(|s| s.contains(&account))
    }

    fn has_other_readers(&self, handle: Handle, account: Address) -> bool {
        self.public.contains(&handle) || self.acl.get(&handle).is_some_and(|s| s.iter().any(|a| *a != account))
    }
}
