//! SCRAM-SHA SASL server mechanism — RFC 5802 / RFC 7677, no channel binding.
//!
//! Five-state machine driven by the transport one frame at a time:
//!
//!   1. `ClientFirst` — parse the GS2 header and client-first-message, resolve
//!      the account and its verifier, emit server-first-message.
//!   2. `ClientProof` — verify nonce, channel-binding echo, and ClientProof
//!      against the stored keys; emit server-final-message.
//!   3. `Passed` / `Failed` / `Errored` — absorbing. The first step taken in
//!      `Passed` rewrites a legacy verifier to SCRAM form (§ upgrade), then
//!      keeps answering `Done`.
//!
//! The plaintext password never appears here; verification runs entirely on
//! ServerKey/StoredKey. Every secret comparison is constant-time and all
//! transcript and key buffers are wiped on drop.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::BufMut;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::digest;
use crate::mechanism::{MechSession, Mechanism, SaslResult};
use crate::userdb::{NICKLEN, UserHandle, UserStore, saslprep_identity};
use crate::verifier::{self, Pbkdf2Prf, VerifierRecord};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Length of the server-generated nonce, in printable ASCII characters.
pub const NONCE_LENGTH: usize = 64;

/// Upper bound on any single client-to-server SASL frame we will process.
pub const SASL_C2S_MAXLEN: usize = 8192;

// ─── Session state ──────────────────────────────────────────────────────────

/// Working state between client-first and client-final. Frozen once built;
/// the transcript strings are reused verbatim in the AuthMessage.
struct ProofState {
    user: UserHandle,
    db: VerifierRecord,
    /// Client nonce.
    cn: Zeroizing<String>,
    /// Server nonce.
    sn: Zeroizing<String>,
    /// Verbatim GS2 header, trailing comma included.
    c_gs2: Zeroizing<String>,
    /// Verbatim client-first-message-bare.
    c_msg: Zeroizing<String>,
    /// Verbatim server-first-message.
    s_msg: Zeroizing<String>,
}

/// Deferred work for the step taken after a successful proof.
struct UpgradeState {
    user: UserHandle,
    db: VerifierRecord,
}

enum ScramStep {
    ClientFirst,
    ClientProof(Box<ProofState>),
    Passed(Option<Box<UpgradeState>>),
    Failed,
    Errored,
}

enum Abort {
    /// Protocol or internal error.
    Error,
    /// Credentials did not verify.
    Fail,
}

/// One SCRAM authentication attempt.
pub struct ScramSession {
    prf: Pbkdf2Prf,
    store: Arc<dyn UserStore>,
    step: ScramStep,
    fixed_sn: Option<String>,
}

impl ScramSession {
    pub fn new(prf: Pbkdf2Prf, store: Arc<dyn UserStore>) -> Self {
        Self {
            prf,
            store,
            step: ScramStep::ClientFirst,
            fixed_sn: None,
        }
    }

    /// Pin the server nonce instead of drawing one, so known-answer vectors
    /// can run against the state machine.
    #[cfg(test)]
    pub(crate) fn with_server_nonce(mut self, sn: &str) -> Self {
        self.fixed_sn = Some(sn.to_string());
        self
    }

    /// Advance the state machine with one inbound frame.
    pub fn step(&mut self, input: &[u8]) -> SaslResult {
        let step = std::mem::replace(&mut self.step, ScramStep::Errored);
        let (next, verdict) = match step {
            ScramStep::ClientFirst => match self.client_first(input) {
                Ok((st, out)) => (ScramStep::ClientProof(Box::new(st)), SaslResult::More(out)),
                Err(()) => (ScramStep::Errored, SaslResult::Error),
            },
            ScramStep::ClientProof(st) => match self.client_proof(*st, input) {
                Ok((up, out)) => (
                    ScramStep::Passed(Some(Box::new(up))),
                    SaslResult::More(out),
                ),
                Err(Abort::Fail) => (ScramStep::Failed, SaslResult::Fail),
                Err(Abort::Error) => (ScramStep::Errored, SaslResult::Error),
            },
            ScramStep::Passed(pending) => {
                if let Some(up) = pending {
                    self.upgrade(*up);
                }
                (ScramStep::Passed(None), SaslResult::Done)
            }
            ScramStep::Failed => (ScramStep::Failed, SaslResult::Fail),
            ScramStep::Errored => (ScramStep::Errored, SaslResult::Error),
        };
        self.step = next;
        verdict
    }

    // ─── client-first-message ────────────────────────────────────────────

    fn client_first(&self, input: &[u8]) -> Result<(ProofState, Vec<u8>), ()> {
        let msg = frame_to_str(input, "client-first")?;

        // GS2 header: cbind flag, then the optional authzid section.
        let bytes = msg.as_bytes();
        if bytes.len() < 2 {
            debug!("scram client-first: truncated GS2 header");
            return Err(());
        }
        match bytes[0] {
            b'y' | b'n' => {}
            b'p' => {
                debug!("scram client-first: channel binding requested but unsupported");
                return Err(());
            }
            _ => {
                debug!("scram client-first: malformed GS2 header (invalid cbind flag)");
                return Err(());
            }
        }
        if bytes[1] != b',' {
            debug!("scram client-first: malformed GS2 header (cbind flag not one letter)");
            return Err(());
        }

        let mut rest = &msg[2..];
        if let Some(val) = rest.strip_prefix("a=") {
            let Some(comma) = val.find(',') else {
                debug!("scram client-first: malformed GS2 header (no end to authzid)");
                return Err(());
            };
            let authzid_raw = &val[..comma];
            if authzid_raw.len() >= NICKLEN {
                debug!(
                    len = authzid_raw.len(),
                    "scram client-first: unacceptable authzid length"
                );
                return Err(());
            }
            let Some(authzid) = saslprep_identity(authzid_raw) else {
                debug!("scram client-first: SASLprep normalisation of authzid failed");
                return Err(());
            };
            if !self.store.authzid_can_login(&authzid) {
                debug!(authzid = %authzid, "scram client-first: authzid may not log in");
                return Err(());
            }
            rest = &val[comma + 1..];
        } else if let Some(r) = rest.strip_prefix(',') {
            rest = r;
        } else {
            debug!("scram client-first: malformed GS2 header (authzid section not empty)");
            return Err(());
        }

        // Everything before `rest` is the GS2 header, verbatim.
        let c_gs2 = &msg[..msg.len() - rest.len()];

        let attrs = match crate::attrlist::AttrList::parse(rest) {
            Ok(attrs) => attrs,
            Err(e) => {
                debug!(error = %e, "scram client-first: bad attribute list");
                return Err(());
            }
        };
        if attrs.has('m') {
            debug!("scram client-first: mandatory extension requested but unsupported");
            return Err(());
        }
        let (Some(authcid_raw), Some(cn)) = (attrs.get_non_empty('n'), attrs.get_non_empty('r'))
        else {
            debug!("scram client-first: attribute list unacceptable");
            return Err(());
        };

        if authcid_raw.len() >= NICKLEN {
            debug!(
                len = authcid_raw.len(),
                "scram client-first: unacceptable authcid length"
            );
            return Err(());
        }
        let Some(authcid) = saslprep_identity(authcid_raw) else {
            debug!("scram client-first: SASLprep normalisation of authcid failed");
            return Err(());
        };

        let Some(user) = self.store.authcid_can_login(&authcid) else {
            debug!(authcid = %authcid, "scram client-first: authcid may not log in");
            return Err(());
        };

        let flags = self.store.flags_of(&user);
        if !flags.cryptpass {
            debug!(authcid = %authcid, "scram client-first: password is not encrypted");
            return Err(());
        }
        if flags.nopassword {
            debug!(authcid = %authcid, "scram client-first: account has password logins disabled");
            return Err(());
        }

        let Some(pass) = self.store.verifier_of(&user) else {
            debug!(authcid = %authcid, "scram client-first: no stored verifier");
            return Err(());
        };
        let db = match verifier::decode(&pass) {
            Ok(db) => db,
            Err(e) => {
                debug!(authcid = %authcid, error = %e, "scram client-first: verifier not in PBKDF2-v2 format");
                return Err(());
            }
        };
        if db.prf != self.prf {
            debug!(
                stored = db.prf.tag(),
                mech = self.prf.tag(),
                "scram client-first: PRF mismatch between verifier and mechanism"
            );
            return Err(());
        }

        let sn = match &self.fixed_sn {
            Some(sn) => sn.clone(),
            None => random_nonce(),
        };

        // Construct server-first-message.
        let s_msg = format!("r={cn}{sn},s={},i={}", B64.encode(&db.salt), db.iter);
        if s_msg.len() > SASL_C2S_MAXLEN {
            error!("scram client-first: server-first-message would exceed frame bound (BUG)");
            return Err(());
        }
        let out = s_msg.clone().into_bytes();

        let st = ProofState {
            user,
            db,
            cn: Zeroizing::new(cn.to_string()),
            sn: Zeroizing::new(sn),
            c_gs2: Zeroizing::new(c_gs2.to_string()),
            c_msg: Zeroizing::new(rest.to_string()),
            s_msg: Zeroizing::new(s_msg),
        };
        Ok((st, out))
    }

    // ─── client-final-message ────────────────────────────────────────────

    fn client_proof(&self, st: ProofState, input: &[u8]) -> Result<(UpgradeState, Vec<u8>), Abort> {
        let msg = frame_to_str(input, "client-final").map_err(|()| Abort::Error)?;

        let attrs = match crate::attrlist::AttrList::parse(msg) {
            Ok(attrs) => attrs,
            Err(e) => {
                debug!(error = %e, "scram client-final: bad attribute list");
                return Err(Abort::Error);
            }
        };
        if attrs.has('m') {
            debug!("scram client-final: mandatory extension requested but unsupported");
            return Err(Abort::Error);
        }
        let (Some(chan), Some(proof64), Some(nonce)) = (
            attrs.get_non_empty('c'),
            attrs.get_non_empty('p'),
            attrs.get_non_empty('r'),
        ) else {
            debug!("scram client-final: attribute list unacceptable");
            return Err(Abort::Error);
        };

        // The client must echo back cn‖sn exactly.
        let expected_nonce = format!("{}{}", *st.cn, *st.sn);
        if nonce != expected_nonce {
            debug!("scram client-final: nonce does not match the one we sent");
            return Err(Abort::Error);
        }

        // And the GS2 header it committed to in client-first.
        let Ok(chan_echo) = B64.decode(chan) else {
            debug!("scram client-final: base64 decode of channel-binding echo failed");
            return Err(Abort::Error);
        };
        if chan_echo != st.c_gs2.as_bytes() {
            debug!("scram client-final: GS2 header mismatch");
            return Err(Abort::Error);
        }

        let dl = st.db.digest().output_len();
        let client_proof = match B64.decode(proof64) {
            Ok(p) if p.len() == dl => Zeroizing::new(p),
            Ok(p) => {
                debug!(
                    expected = dl,
                    got = p.len(),
                    "scram client-final: ClientProof has wrong length"
                );
                return Err(Abort::Error);
            }
            Err(_) => {
                debug!("scram client-final: base64 decode of ClientProof failed");
                return Err(Abort::Error);
            }
        };

        // AuthMessage := client-first-message-bare "," server-first-message
        //                "," channel-binding "," nonce — with the client's
        //                final attributes verbatim.
        let mut auth_message = Vec::with_capacity(
            st.c_msg.len() + st.s_msg.len() + chan.len() + nonce.len() + 8,
        );
        auth_message.put_slice(st.c_msg.as_bytes());
        auth_message.put_slice(b",");
        auth_message.put_slice(st.s_msg.as_bytes());
        auth_message.put_slice(b",c=");
        auth_message.put_slice(chan.as_bytes());
        auth_message.put_slice(b",r=");
        auth_message.put_slice(nonce.as_bytes());
        if auth_message.len() > SASL_C2S_MAXLEN {
            error!("scram client-final: AuthMessage would exceed frame bound (BUG)");
            return Err(Abort::Error);
        }
        let auth_message = Zeroizing::new(auth_message);

        let alg = st.db.digest();
        let Some((server_key, stored_key)) = st.db.scram_keys() else {
            error!("scram client-final: verifier carries no SCRAM keys (BUG)");
            return Err(Abort::Error);
        };

        // ClientSignature := HMAC(StoredKey, AuthMessage)
        // ClientKey := ClientProof XOR ClientSignature
        // StoredKey must equal H(ClientKey), compared in constant time.
        let client_signature = digest::oneshot_hmac(alg, stored_key, &auth_message);
        let client_key: Zeroizing<Vec<u8>> = Zeroizing::new(
            client_proof
                .iter()
                .zip(client_signature.iter())
                .map(|(p, s)| p ^ s)
                .collect(),
        );
        let computed_stored_key = digest::oneshot(alg, &client_key);
        if !bool::from(computed_stored_key.ct_eq(stored_key)) {
            debug!("scram client-final: StoredKey mismatch; incorrect password?");
            return Err(Abort::Fail);
        }

        // Authentication of the client has succeeded at this point.

        let server_signature = digest::oneshot_hmac(alg, server_key, &auth_message);
        let out = format!("v={}", B64.encode(&server_signature)).into_bytes();

        let ProofState { user, db, .. } = st;
        Ok((UpgradeState { user, db }, out))
    }

    // ─── post-success upgrade ────────────────────────────────────────────

    /// A login just succeeded. A verifier still in the legacy SaltedPassword
    /// form lets anyone who reads the database impersonate the client, so
    /// rewrite it as the (ServerKey, StoredKey) pair now. The login outcome
    /// is already decided; a failed write only gets logged.
    fn upgrade(&self, up: UpgradeState) {
        if up.db.scram {
            return;
        }

        info!(
            account = up.user.name(),
            "scram login succeeded; converting stored verifier to SCRAM form"
        );
        match verifier::encode(&up.db) {
            Ok(rec) => match self.store.set_verifier(&up.user, &rec) {
                Ok(()) => debug!(account = up.user.name(), "verifier upgrade written"),
                Err(e) => warn!(
                    account = up.user.name(),
                    error = %e,
                    "verifier upgrade write failed; keeping legacy record"
                ),
            },
            Err(e) => error!(error = %e, "could not encode upgraded verifier (BUG)"),
        }
    }
}

// ─── Mechanism wrapper ──────────────────────────────────────────────────────

/// One registered SCRAM variant; `start()` mints a session per attempt.
pub struct ScramMechanism {
    name: &'static str,
    prf: Pbkdf2Prf,
    store: Arc<dyn UserStore>,
}

impl ScramMechanism {
    /// `None` when `prf` is not a SCRAM PRF.
    pub fn new(prf: Pbkdf2Prf, store: Arc<dyn UserStore>) -> Option<Self> {
        let name = prf.mechanism_name()?;
        Some(Self { name, prf, store })
    }
}

impl Mechanism for ScramMechanism {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start(&self) -> Box<dyn MechSession> {
        Box::new(ScramSession::new(self.prf, self.store.clone()))
    }
}

impl MechSession for ScramSession {
    fn step(&mut self, input: &[u8]) -> SaslResult {
        ScramSession::step(self, input)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Validate an inbound frame: bounded, NUL-free, UTF-8.
fn frame_to_str<'a>(input: &'a [u8], stage: &'static str) -> Result<&'a str, ()> {
    if input.is_empty() || input.len() > SASL_C2S_MAXLEN {
        debug!(stage, len = input.len(), "scram: unacceptable frame length");
        return Err(());
    }
    if input.contains(&0) {
        debug!(stage, "scram: NUL byte in data received from client");
        return Err(());
    }
    match std::str::from_utf8(input) {
        Ok(s) => Ok(s),
        Err(_) => {
            debug!(stage, "scram: frame is not valid UTF-8");
            Err(())
        }
    }
}

fn random_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LENGTH)
        .map(char::from)
        .collect()
}
