//! User-record Adapter — how the SASL mechanisms see the account database.
//!
//! The hosting daemon owns account persistence; mechanisms only need to
//! resolve identities, read flags and the stored verifier, and write an
//! upgraded verifier back. `MemoryUserStore` is the reference implementation
//! and the store the test suites run against.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Account-name field capacity; identities of this length or longer are
/// rejected before lookup.
pub const NICKLEN: usize = 32;

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no such account")]
    NoSuchAccount,
    #[error("verifier rejected by store: {0}")]
    Rejected(&'static str),
}

// ─── Identities ─────────────────────────────────────────────────────────────

/// An opaque handle to a resolved account, valid for the lifetime of one
/// authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserHandle(String);

impl UserHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// SASLprep-normalise an authentication or authorisation identity
/// (stringprep SASLprep profile, RFC 4013). Returns `None` for identities
/// that are empty, oversized, or fail normalisation.
pub fn saslprep_identity(name: &str) -> Option<String> {
    if name.is_empty() || name.len() >= NICKLEN {
        return None;
    }
    match stringprep::saslprep(name) {
        Ok(normalized) if !normalized.is_empty() && normalized.len() < NICKLEN => {
            Some(normalized.into_owned())
        }
        Ok(_) => None,
        Err(_) => {
            debug!(name, "SASLprep normalisation failed");
            None
        }
    }
}

// ─── Flags ──────────────────────────────────────────────────────────────────

/// Capability flags on a user record, as far as authentication cares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserFlags {
    /// Password field holds an encrypted verifier (not plaintext).
    pub cryptpass: bool,
    /// Password logins are administratively disabled.
    pub nopassword: bool,
    /// Account is frozen; no logins at all.
    pub frozen: bool,
}

// ─── Store trait ────────────────────────────────────────────────────────────

/// The mechanisms' view of the account database. Implementations handle
/// their own concurrency; `set_verifier` may be write-through to async
/// persistence as long as subsequent `verifier_of` calls observe the write.
pub trait UserStore: Send + Sync {
    /// Policy check: may this authorisation identity be acted as?
    fn authzid_can_login(&self, authzid: &str) -> bool;

    /// Resolve an authentication identity to an account handle, or `None`
    /// when the account is unknown or barred from logging in.
    fn authcid_can_login(&self, authcid: &str) -> Option<UserHandle>;

    /// The account's stored password field (a verifier record, when
    /// `cryptpass` is set).
    fn verifier_of(&self, user: &UserHandle) -> Option<String>;

    fn flags_of(&self, user: &UserHandle) -> UserFlags;

    /// Persist a rewritten verifier.
    fn set_verifier(&self, user: &UserHandle, verifier: &str) -> Result<(), StoreError>;
}

// ─── In-memory store ────────────────────────────────────────────────────────

struct AccountRecord {
    pass: String,
    flags: UserFlags,
}

/// Account store backed by a `RwLock`ed map, keyed by SASLprep-normalised
/// account name.
#[derive(Default)]
pub struct MemoryUserStore {
    accounts: RwLock<HashMap<String, AccountRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account. Returns false when the name does not
    /// survive SASLprep.
    pub fn add_account(&self, name: &str, pass: &str, flags: UserFlags) -> bool {
        let Some(key) = saslprep_identity(name) else {
            return false;
        };
        self.accounts.write().insert(
            key,
            AccountRecord {
                pass: pass.to_string(),
                flags,
            },
        );
        true
    }

    pub fn remove_account(&self, name: &str) -> bool {
        let Some(key) = saslprep_identity(name) else {
            return false;
        };
        self.accounts.write().remove(&key).is_some()
    }
}

impl UserStore for MemoryUserStore {
    fn authzid_can_login(&self, authzid: &str) -> bool {
        let Some(key) = saslprep_identity(authzid) else {
            return false;
        };
        let accounts = self.accounts.read();
        accounts.get(&key).is_some_and(|rec| !rec.flags.frozen)
    }

    fn authcid_can_login(&self, authcid: &str) -> Option<UserHandle> {
        let key = saslprep_identity(authcid)?;
        let accounts = self.accounts.read();
        let rec = accounts.get(&key)?;
        if rec.flags.frozen {
            debug!(account = %key, "login denied: account frozen");
            return None;
        }
        Some(UserHandle(key))
    }

    fn verifier_of(&self, user: &UserHandle) -> Option<String> {
        let accounts = self.accounts.read();
        accounts.get(&user.0).map(|rec| rec.pass.clone())
    }

    fn flags_of(&self, user: &UserHandle) -> UserFlags {
        let accounts = self.accounts.read();
        accounts
            .get(&user.0)
            .map(|rec| rec.flags)
            .unwrap_or_default()
    }

    fn set_verifier(&self, user: &UserHandle, verifier: &str) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write();
        let rec = accounts.get_mut(&user.0).ok_or(StoreError::NoSuchAccount)?;
        rec.pass = verifier.to_string();
        Ok(())
    }
}
