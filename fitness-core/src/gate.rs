//! Authorization gate: every handle leaving the engine is granted first.

use crate::algebra::AccessControl;
use crate::types::{Address, Handle};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Who may decrypt a handle handed out by a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "account", rename_all = "snake_case")]
pub enum Disclosure {
    /// Shared aggregates: the requesting caller plus anyone else.
    Public { caller: Address },
    /// Per-user data: only the owning address, whoever asked.
    Owner(Address),
}

/// Grant decryption on each handle according to `disclosure`.
///
/// Unset handles are skipped. Re-granting is a no-op.
pub fn disclose<C: AccessControl + ?Sized>(acl: &mut C, handles: &[Handle], disclosure: Disclosure) {
    for handle in handles.iter().filter(|h| !h.is_unset()) {
        match disclosure {
            Disclosure::Public { caller } => {
                acl.allow(*handle, caller);
                acl.allow_public(*handle);
            }
            Disclosure::Owner(owner) => acl.allow(*handle, owner),
        }
    }
    debug!(count = handles.len(), ?disclosure, "handles disclosed");
}

/// Keep the engine itself able to operate on handles it stores.
pub fn retain<C: AccessControl + ?Sized>(acl: &mut C, handles: &[Handle], engine: Address) {
    for handle in handles.iter().filter(|h| !h.is_unset()) {
        acl.allow(*handle, engine);
    }
}
