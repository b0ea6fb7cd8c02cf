//! AUTHCOOKIE — single-step cookie login for clients the daemon itself primed.
//!
//! The daemon hands a short-lived cookie to an already-authenticated client
//! out of band; the client then proves itself over SASL by presenting
//! `authzid 0x00 authcid 0x00 cookie` in one frame. No challenge is emitted
//! and nothing is derived: the cookie either matches a live entry for that
//! account or the attempt fails.

use parking_lot::RwLock;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::mechanism::{MechSession, Mechanism, SaslResult};
use crate::userdb::{NICKLEN, UserStore};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Length of an issued cookie, in characters.
pub const AUTHCOOKIE_LENGTH: usize = 20;

/// Upper bound on a valid AUTHCOOKIE frame:
/// two identities, the cookie, and two NUL separators.
const AUTHCOOKIE_FRAME_MAX: usize = 2 * NICKLEN + AUTHCOOKIE_LENGTH + 3;

// ─── Cookie store ───────────────────────────────────────────────────────────

/// Live cookies by account name. The daemon creates one when it wants to let
/// a client re-authenticate, and destroys it once used or expired.
#[derive(Default)]
pub struct CookieStore {
    cookies: RwLock<HashMap<String, Vec<String>>>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue and remember a fresh cookie for `account`.
    pub fn create(&self, account: &str) -> String {
        let cookie: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(AUTHCOOKIE_LENGTH)
            .map(char::from)
            .collect();
        self.cookies
            .write()
            .entry(account.to_string())
            .or_default()
            .push(cookie.clone());
        cookie
    }

    /// Is `cookie` live for `account`? Compared in constant time against
    /// each of the account's cookies.
    pub fn find(&self, cookie: &str, account: &str) -> bool {
        let cookies = self.cookies.read();
        let Some(live) = cookies.get(account) else {
            return false;
        };
        live.iter()
            .fold(false, |hit, c| hit | bool::from(c.as_bytes().ct_eq(cookie.as_bytes())))
    }

    /// Forget one cookie. Returns whether it was live.
    pub fn destroy(&self, cookie: &str, account: &str) -> bool {
        let mut cookies = self.cookies.write();
        let Some(live) = cookies.get_mut(account) else {
            return false;
        };
        let before = live.len();
        live.retain(|c| c != cookie);
        let removed = live.len() != before;
        if live.is_empty() {
            cookies.remove(account);
        }
        removed
    }

    pub fn clear(&self) {
        self.cookies.write().clear();
    }
}

// ─── Mechanism ──────────────────────────────────────────────────────────────

pub struct AuthcookieMechanism {
    store: Arc<dyn UserStore>,
    cookies: Arc<CookieStore>,
}

impl AuthcookieMechanism {
    pub fn new(store: Arc<dyn UserStore>, cookies: Arc<CookieStore>) -> Self {
        Self { store, cookies }
    }
}

impl Mechanism for AuthcookieMechanism {
    fn name(&self) -> &'static str {
        "AUTHCOOKIE"
    }

    fn start(&self) -> Box<dyn MechSession> {
        Box::new(AuthcookieSession {
            store: self.store.clone(),
            cookies: self.cookies.clone(),
        })
    }
}

struct AuthcookieSession {
    store: Arc<dyn UserStore>,
    cookies: Arc<CookieStore>,
}

impl MechSession for AuthcookieSession {
    fn step(&mut self, input: &[u8]) -> SaslResult {
        if input.is_empty() || input.len() >= AUTHCOOKIE_FRAME_MAX {
            debug!(len = input.len(), "authcookie: unacceptable frame length");
            return SaslResult::Fail;
        }

        // authzid 0x00 authcid 0x00 cookie — exactly three segments, each
        // non-empty printable ASCII.
        let Ok(msg) = std::str::from_utf8(input) else {
            debug!("authcookie: frame is not valid UTF-8");
            return SaslResult::Fail;
        };
        let segments: Vec<&str> = msg.split('\0').collect();
        let [authzid, authcid, cookie] = segments[..] else {
            debug!("authcookie: frame does not split into three segments");
            return SaslResult::Fail;
        };
        for seg in [authzid, authcid, cookie] {
            if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_graphic()) {
                debug!("authcookie: empty or non-printable segment");
                return SaslResult::Fail;
            }
        }

        if !self.store.authzid_can_login(authzid) {
            debug!(authzid, "authcookie: authzid may not log in");
            return SaslResult::Fail;
        }
        let Some(user) = self.store.authcid_can_login(authcid) else {
            debug!(authcid, "authcookie: authcid may not log in");
            return SaslResult::Fail;
        };
        if !self.cookies.find(cookie, user.name()) {
            debug!(account = user.name(), "authcookie: no matching live cookie");
            return SaslResult::Fail;
        }

        SaslResult::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::userdb::{MemoryUserStore, UserFlags};

    fn fixture() -> (Arc<MemoryUserStore>, Arc<CookieStore>, Box<dyn MechSession>) {
        let store = Arc::new(MemoryUserStore::new());
        assert!(store.add_account("alice", "v", UserFlags::default()));
        let cookies = Arc::new(CookieStore::new());
        let dyn_store: Arc<dyn UserStore> = store.clone();
        let mech = AuthcookieMechanism::new(dyn_store, cookies.clone());
        let session = mech.start();
        (store, cookies, session)
    }

    fn frame(authzid: &str, authcid: &str, cookie: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(authzid.as_bytes());
        out.push(0);
        out.extend_from_slice(authcid.as_bytes());
        out.push(0);
        out.extend_from_slice(cookie.as_bytes());
        out
    }

    // ─── Cookie store ────────────────────────────────────────────────────

    #[test]
    fn issued_cookies_are_found_until_destroyed() {
        let cookies = CookieStore::new();
        let c1 = cookies.create("alice");
        let c2 = cookies.create("alice");
        assert_eq!(c1.len(), AUTHCOOKIE_LENGTH);
        assert_ne!(c1, c2);

        assert!(cookies.find(&c1, "alice"));
        assert!(cookies.find(&c2, "alice"));
        assert!(!cookies.find(&c1, "bob"));
        assert!(!cookies.find("AAAAAAAAAAAAAAAAAAAA", "alice"));

        assert!(cookies.destroy(&c1, "alice"));
        assert!(!cookies.find(&c1, "alice"));
        assert!(cookies.find(&c2, "alice"));
        assert!(!cookies.destroy(&c1, "alice"));
    }

    // ─── Mechanism scenarios ─────────────────────────────────────────────

    #[test]
    fn valid_frame_authenticates() {
        let (_store, cookies, mut session) = fixture();
        let cookie = cookies.create("alice");
        assert_eq!(
            session.step(&frame("alice", "alice", &cookie)),
            SaslResult::Done
        );
    }

    #[test]
    fn trailing_data_after_cookie_fails() {
        let (_store, cookies, mut session) = fixture();
        let cookie = cookies.create("alice");
        let mut bad = frame("alice", "alice", &cookie);
        bad.push(0);
        bad.extend_from_slice(b"junk");
        assert_eq!(session.step(&bad), SaslResult::Fail);
    }

    #[test]
    fn empty_segments_fail() {
        let (_store, cookies, mut session) = fixture();
        let cookie = cookies.create("alice");
        assert_eq!(
            session.step(&frame("alice", "", &cookie)),
            SaslResult::Fail
        );
        assert_eq!(
            session.step(&frame("", "alice", &cookie)),
            SaslResult::Fail
        );
        assert_eq!(session.step(&frame("alice", "alice", "")), SaslResult::Fail);
        assert_eq!(session.step(b""), SaslResult::Fail);
    }

    #[test]
    fn unknown_cookie_fails() {
        let (_store, _cookies, mut session) = fixture();
        assert_eq!(
            session.step(&frame("alice", "alice", "AAAAAAAAAAAAAAAAAAAA")),
            SaslResult::Fail
        );
    }

    #[test]
    fn cookie_for_other_account_fails() {
        let (store, cookies, mut session) = fixture();
        assert!(store.add_account("bob", "v", UserFlags::default()));
        let cookie = cookies.create("bob");
        assert_eq!(
            session.step(&frame("alice", "alice", &cookie)),
            SaslResult::Fail
        );
    }

    #[test]
    fn unknown_identities_fail() {
        let (_store, cookies, mut session) = fixture();
        let cookie = cookies.create("alice");
        assert_eq!(
            session.step(&frame("mallory", "alice", &cookie)),
            SaslResult::Fail
        );
        assert_eq!(
            session.step(&frame("alice", "mallory", &cookie)),
            SaslResult::Fail
        );
    }

    #[test]
    fn oversized_frame_fails() {
        let (_store, _cookies, mut session) = fixture();
        let huge = vec![b'a'; AUTHCOOKIE_FRAME_MAX];
        assert_eq!(session.step(&huge), SaslResult::Fail);
    }
}
