//! saslsrv — password-credential and SASL authentication subsystem for
//! network services daemons.
//!
//! Two tightly coupled layers:
//!
//! - a uniform digest front (streaming hash, HMAC, PBKDF2 over MD5, SHA-1,
//!   SHA-256, SHA-512), and
//! - a SCRAM-SHA SASL server state machine (RFC 5802 / RFC 7677, no channel
//!   binding) that authenticates clients against stored verifiers without
//!   the server ever seeing a plaintext password, upgrading legacy verifier
//!   records in place on first successful login.
//!
//! The hosting daemon supplies the transport (raw SASL frames in and out),
//! the account database (via [`userdb::UserStore`]), and the PBKDF2 provider
//! configuration (via [`mechanism::MechRegistry::config_hook`]). Everything
//! here is a pure transformation per step: no I/O, no timers, no global
//! state beyond the registry the host owns.

pub mod attrlist;
pub mod authcookie;
pub mod digest;
pub mod mechanism;
pub mod scram;
pub mod userdb;
pub mod verifier;

pub use attrlist::{AttrList, AttrListError};
pub use authcookie::{AUTHCOOKIE_LENGTH, AuthcookieMechanism, CookieStore};
pub use digest::{DigestAlgorithm, DigestContext, DigestError};
pub use mechanism::{
    CYRUS_SASL_ITERMAX, MechRegistry, MechSession, Mechanism, Pbkdf2Config, Pbkdf2ConfigHook,
    SaslResult,
};
pub use scram::{NONCE_LENGTH, SASL_C2S_MAXLEN, ScramMechanism, ScramSession};
pub use userdb::{MemoryUserStore, StoreError, UserFlags, UserHandle, UserStore};
pub use verifier::{Pbkdf2Prf, VerifierError, VerifierKeys, VerifierRecord};
