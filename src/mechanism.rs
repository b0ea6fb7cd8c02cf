//! SASL mechanism abstraction, registry, and the PBKDF2 provider hook.
//!
//! The transport looks mechanisms up by name and drives one session per
//! authentication attempt. Which SCRAM variant is on offer follows the
//! crypto provider's configuration: the provider calls the hook whenever its
//! (PRF, iteration count, salt length) settings change, and the registry
//! swaps the advertised mechanism to match.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::scram::ScramMechanism;
use crate::userdb::UserStore;
use crate::verifier::Pbkdf2Prf;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Maximum iteration count Cyrus SASL clients will process.
pub const CYRUS_SASL_ITERMAX: u32 = 0x10000;

// ─── Step verdicts ──────────────────────────────────────────────────────────

/// Outcome of feeding one frame to a mechanism session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslResult {
    /// Conversation continues; send these bytes to the client.
    More(Vec<u8>),
    /// Authentication succeeded.
    Done,
    /// Credentials did not verify.
    Fail,
    /// Protocol or internal error.
    Error,
}

// ─── Mechanism traits ───────────────────────────────────────────────────────

/// A registered SASL mechanism. Stateless; mints a session per attempt.
pub trait Mechanism: Send + Sync {
    fn name(&self) -> &'static str;
    fn start(&self) -> Box<dyn MechSession>;
}

/// One in-flight authentication attempt.
pub trait MechSession: Send {
    fn step(&mut self, input: &[u8]) -> SaslResult;
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// Mechanisms currently on offer, by SASL name.
#[derive(Default)]
pub struct MechRegistry {
    mechs: RwLock<BTreeMap<&'static str, Arc<dyn Mechanism>>>,
}

impl MechRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and changes nothing) when the name is already taken.
    pub fn register(&self, mech: Arc<dyn Mechanism>) -> bool {
        let name = mech.name();
        let mut mechs = self.mechs.write();
        if mechs.contains_key(name) {
            warn!(mech = name, "mechanism already registered");
            return false;
        }
        debug!(mech = name, "mechanism registered");
        mechs.insert(name, mech);
        true
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.mechs.write().remove(name).is_some();
        if removed {
            debug!(mech = name, "mechanism unregistered");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Mechanism>> {
        self.mechs.read().get(name).cloned()
    }

    /// Registered mechanism names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.mechs.read().keys().copied().collect()
    }

    /// Convenience: start a session for a named mechanism.
    pub fn start(&self, name: &str) -> Option<Box<dyn MechSession>> {
        self.get(name).map(|mech| mech.start())
    }
}

// ─── PBKDF2 provider hook ───────────────────────────────────────────────────

/// A snapshot of the PBKDF2-v2 crypto provider's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pbkdf2Config {
    /// PRF tag, as persisted in verifier records.
    pub prf: u32,
    pub iter: u32,
    pub salt_len: usize,
}

/// The callback handed to the crypto provider; invoked on every
/// configuration change.
pub type Pbkdf2ConfigHook = Box<dyn Fn(Pbkdf2Config) + Send + Sync>;

impl MechRegistry {
    /// React to a PBKDF2 provider (re)configuration: exactly the SCRAM
    /// variant matching the configured PRF stays registered. A non-SCRAM PRF
    /// leaves no SCRAM mechanism on offer.
    pub fn pbkdf2_config_changed(&self, store: &Arc<dyn UserStore>, cfg: Pbkdf2Config) {
        self.unregister("SCRAM-SHA-1");
        self.unregister("SCRAM-SHA-256");

        match Pbkdf2Prf::from_tag(cfg.prf) {
            Ok(prf) if prf.is_scram() => {
                if let Some(mech) = ScramMechanism::new(prf, store.clone()) {
                    self.register(Arc::new(mech));
                }
            }
            Ok(prf) => {
                error!(
                    prf = prf.tag(),
                    "configured PRF is not a SCRAM PRF; no SCRAM mechanism will be offered"
                );
            }
            Err(e) => {
                error!(prf = cfg.prf, error = %e, "configured PRF is unknown; no SCRAM mechanism will be offered");
            }
        }

        if cfg.iter > CYRUS_SASL_ITERMAX {
            warn!(
                iter = cfg.iter,
                max = CYRUS_SASL_ITERMAX,
                "iteration count is higher than the Cyrus SASL client maximum; some client logins may fail"
            );
        }
    }

    /// Package the reaction up as the callback the crypto provider holds.
    pub fn config_hook(self: Arc<Self>, store: Arc<dyn UserStore>) -> Pbkdf2ConfigHook {
        Box::new(move |cfg| self.pbkdf2_config_changed(&store, cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::userdb::MemoryUserStore;

    fn test_store() -> Arc<dyn UserStore> {
        Arc::new(MemoryUserStore::new())
    }

    fn cfg(prf: u32, iter: u32) -> Pbkdf2Config {
        Pbkdf2Config {
            prf,
            iter,
            salt_len: 16,
        }
    }

    // ─── Registry ────────────────────────────────────────────────────────

    #[test]
    fn register_and_unregister() {
        let registry = MechRegistry::new();
        let store = test_store();
        let mech = ScramMechanism::new(Pbkdf2Prf::ScramSha256, store.clone()).unwrap();

        assert!(registry.register(Arc::new(mech)));
        assert_eq!(registry.names(), vec!["SCRAM-SHA-256"]);
        assert!(registry.get("SCRAM-SHA-256").is_some());
        assert!(registry.start("SCRAM-SHA-256").is_some());
        assert!(registry.get("SCRAM-SHA-1").is_none());

        // Duplicate names are refused.
        let dup = ScramMechanism::new(Pbkdf2Prf::ScramSha256, store).unwrap();
        assert!(!registry.register(Arc::new(dup)));

        assert!(registry.unregister("SCRAM-SHA-256"));
        assert!(!registry.unregister("SCRAM-SHA-256"));
        assert!(registry.names().is_empty());
    }

    // ─── Config hook ─────────────────────────────────────────────────────

    #[test]
    fn config_selects_matching_scram_variant() {
        let registry = MechRegistry::new();
        let store = test_store();

        registry.pbkdf2_config_changed(&store, cfg(45, 4096));
        assert_eq!(registry.names(), vec!["SCRAM-SHA-256"]);

        registry.pbkdf2_config_changed(&store, cfg(44, 4096));
        assert_eq!(registry.names(), vec!["SCRAM-SHA-1"]);

        // Back again; the old variant must not linger.
        registry.pbkdf2_config_changed(&store, cfg(45, 4096));
        assert_eq!(registry.names(), vec!["SCRAM-SHA-256"]);
    }

    #[test]
    fn non_scram_prf_offers_nothing() {
        let registry = MechRegistry::new();
        let store = test_store();

        registry.pbkdf2_config_changed(&store, cfg(45, 4096));
        registry.pbkdf2_config_changed(&store, cfg(6, 4096));
        assert!(registry.names().is_empty());

        registry.pbkdf2_config_changed(&store, cfg(99, 4096));
        assert!(registry.names().is_empty());
    }

    #[test]
    fn oversized_iteration_count_still_registers() {
        // Above the Cyrus client maximum a warning is emitted, but the
        // mechanism stays usable.
        let registry = MechRegistry::new();
        let store = test_store();
        registry.pbkdf2_config_changed(&store, cfg(45, CYRUS_SASL_ITERMAX + 1));
        assert_eq!(registry.names(), vec!["SCRAM-SHA-256"]);
    }

    #[test]
    fn boxed_hook_reaches_registry() {
        let registry = Arc::new(MechRegistry::new());
        let hook = registry.clone().config_hook(test_store());
        hook(cfg(44, 4096));
        assert_eq!(registry.names(), vec!["SCRAM-SHA-1"]);
        hook(cfg(5, 4096));
        assert!(registry.names().is_empty());
    }

    #[test]
    fn other_mechanisms_survive_reconfiguration() {
        let registry = MechRegistry::new();
        let store = test_store();
        let cookie = crate::authcookie::AuthcookieMechanism::new(
            store.clone(),
            Arc::new(crate::authcookie::CookieStore::new()),
        );
        registry.register(Arc::new(cookie));

        registry.pbkdf2_config_changed(&store, cfg(45, 4096));
        assert_eq!(registry.names(), vec!["AUTHCOOKIE", "SCRAM-SHA-256"]);

        registry.pbkdf2_config_changed(&store, cfg(4, 4096));
        assert_eq!(registry.names(), vec!["AUTHCOOKIE"]);
    }
}
