//! Verifier Codec — the PBKDF2-v2 textual credential record.
//!
//! The record stored in a user's password field looks like
//! `$<prf>$<iter>$<salt_b64>$<blob1_b64>[$<blob2_b64>]`. One blob after the
//! salt is the legacy form (raw SaltedPassword); two blobs are the SCRAM pair
//! (ServerKey, StoredKey). Decoding a legacy record under a SCRAM PRF expands
//! it to the pair immediately, so the session FSM only ever sees SCRAM keys;
//! the `scram` flag records which form was actually on disk so the FSM knows
//! whether to write the upgraded form back.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use zeroize::Zeroizing;

use crate::digest::{self, DigestAlgorithm};

// ─── Constants ──────────────────────────────────────────────────────────────

pub const PBKDF2_SALTLEN_MIN: usize = 8;
pub const PBKDF2_SALTLEN_MAX: usize = 64;

pub const PBKDF2_ITERCNT_MIN: u32 = 1;
pub const PBKDF2_ITERCNT_MAX: u32 = 10_000_000;

/// Upper bound on the length of an encoded record (the user record's password
/// field capacity).
pub const PASSLEN: usize = 289;

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifierError {
    #[error("malformed verifier record: {0}")]
    Malformed(&'static str),
    #[error("unknown PRF tag {0}")]
    UnknownPrf(u32),
    #[error("key length mismatch: expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

// ─── PRF tags ───────────────────────────────────────────────────────────────

/// PBKDF2-v2 pseudo-random functions. Tags are persisted in verifier records
/// and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pbkdf2Prf {
    HmacSha1,
    HmacSha256,
    HmacSha512,
    ScramSha1,
    ScramSha256,
}

impl Pbkdf2Prf {
    pub fn tag(self) -> u32 {
        match self {
            Self::HmacSha1 => 4,
            Self::HmacSha256 => 5,
            Self::HmacSha512 => 6,
            Self::ScramSha1 => 44,
            Self::ScramSha256 => 45,
        }
    }

    pub fn from_tag(tag: u32) -> Result<Self, VerifierError> {
        match tag {
            4 => Ok(Self::HmacSha1),
            5 => Ok(Self::HmacSha256),
            6 => Ok(Self::HmacSha512),
            44 => Ok(Self::ScramSha1),
            45 => Ok(Self::ScramSha256),
            _ => Err(VerifierError::UnknownPrf(tag)),
        }
    }

    /// The underlying digest this PRF keys HMAC with.
    pub fn digest(self) -> DigestAlgorithm {
        match self {
            Self::HmacSha1 | Self::ScramSha1 => DigestAlgorithm::Sha1,
            Self::HmacSha256 | Self::ScramSha256 => DigestAlgorithm::Sha256,
            Self::HmacSha512 => DigestAlgorithm::Sha512,
        }
    }

    pub fn is_scram(self) -> bool {
        matches!(self, Self::ScramSha1 | Self::ScramSha256)
    }

    /// SASL mechanism name for SCRAM PRFs.
    pub fn mechanism_name(self) -> Option<&'static str> {
        match self {
            Self::ScramSha1 => Some("SCRAM-SHA-1"),
            Self::ScramSha256 => Some("SCRAM-SHA-256"),
            _ => None,
        }
    }
}

// ─── Decoded record ─────────────────────────────────────────────────────────

/// Key material carried by a decoded record.
#[derive(Debug, PartialEq, Eq)]
pub enum VerifierKeys {
    /// Non-SCRAM PRF: the raw PBKDF2 output.
    SaltedPassword(Zeroizing<Vec<u8>>),
    /// SCRAM PRF: `ServerKey = HMAC(sp, "Server Key")`,
    /// `StoredKey = H(HMAC(sp, "Client Key"))`.
    Scram {
        server_key: Zeroizing<Vec<u8>>,
        stored_key: Zeroizing<Vec<u8>>,
    },
}

/// A decoded PBKDF2-v2 verifier.
#[derive(Debug, PartialEq, Eq)]
pub struct VerifierRecord {
    pub prf: Pbkdf2Prf,
    pub iter: u32,
    pub salt: Vec<u8>,
    pub keys: VerifierKeys,
    /// True iff the on-disk record already stored the SCRAM pair.
    pub scram: bool,
}

impl VerifierRecord {
    pub fn digest(&self) -> DigestAlgorithm {
        self.prf.digest()
    }

    /// `(server_key, stored_key)` for SCRAM-PRF records.
    pub fn scram_keys(&self) -> Option<(&[u8], &[u8])> {
        match &self.keys {
            VerifierKeys::Scram {
                server_key,
                stored_key,
            } => Some((server_key, stored_key)),
            VerifierKeys::SaltedPassword(_) => None,
        }
    }
}

// ─── Decode ─────────────────────────────────────────────────────────────────

/// Parse a textual verifier record.
pub fn decode(s: &str) -> Result<VerifierRecord, VerifierError> {
    let mut fields = s.split('$');
    if fields.next() != Some("") {
        return Err(VerifierError::Malformed("missing leading '$'"));
    }

    let fields: Vec<&str> = fields.collect();
    if fields.len() != 4 && fields.len() != 5 {
        return Err(VerifierError::Malformed("wrong field count"));
    }

    let tag: u32 = fields[0]
        .parse()
        .map_err(|_| VerifierError::Malformed("PRF tag is not an integer"))?;
    let prf = Pbkdf2Prf::from_tag(tag)?;
    let dl = prf.digest().output_len();

    let iter: u32 = fields[1]
        .parse()
        .map_err(|_| VerifierError::Malformed("iteration count is not an integer"))?;
    if !(PBKDF2_ITERCNT_MIN..=PBKDF2_ITERCNT_MAX).contains(&iter) {
        return Err(VerifierError::Malformed("iteration count out of range"));
    }

    let salt = B64
        .decode(fields[2])
        .map_err(|_| VerifierError::Malformed("salt is not valid base64"))?;
    if !(PBKDF2_SALTLEN_MIN..=PBKDF2_SALTLEN_MAX).contains(&salt.len()) {
        return Err(VerifierError::Malformed("salt length out of range"));
    }

    let blob1 = decode_key_blob(fields[3], dl)?;

    let (keys, scram) = match (fields.len(), prf.is_scram()) {
        // Legacy single-blob form: SaltedPassword. Expand SCRAM PRFs to the
        // pair now so first successful login can upgrade the stored record.
        (4, true) => {
            let server_key = digest::oneshot_hmac(prf.digest(), &blob1, b"Server Key");
            let client_key = digest::oneshot_hmac(prf.digest(), &blob1, b"Client Key");
            let stored_key = digest::oneshot(prf.digest(), &client_key);
            (
                VerifierKeys::Scram {
                    server_key,
                    stored_key,
                },
                false,
            )
        }
        (4, false) => (VerifierKeys::SaltedPassword(blob1), false),
        (5, true) => {
            let stored_key = decode_key_blob(fields[4], dl)?;
            (
                VerifierKeys::Scram {
                    server_key: blob1,
                    stored_key,
                },
                true,
            )
        }
        (5, false) => {
            return Err(VerifierError::Malformed(
                "SCRAM key pair under a non-SCRAM PRF",
            ));
        }
        _ => unreachable!("field count checked above"),
    };

    Ok(VerifierRecord {
        prf,
        iter,
        salt,
        keys,
        scram,
    })
}

fn decode_key_blob(field: &str, dl: usize) -> Result<Zeroizing<Vec<u8>>, VerifierError> {
    let blob = B64
        .decode(field)
        .map_err(|_| VerifierError::Malformed("key blob is not valid base64"))?;
    if blob.len() != dl {
        return Err(VerifierError::LengthMismatch {
            expected: dl,
            got: blob.len(),
        });
    }
    Ok(Zeroizing::new(blob))
}

// ─── Encode ─────────────────────────────────────────────────────────────────

/// Emit a record in the SCRAM pair form. Only SCRAM-PRF records are
/// representable; the legacy single-blob form is never written back.
pub fn encode(rec: &VerifierRecord) -> Result<String, VerifierError> {
    let (server_key, stored_key) = rec
        .scram_keys()
        .ok_or(VerifierError::Malformed("record has no SCRAM key pair"))?;

    let out = format!(
        "${}${}${}${}${}",
        rec.prf.tag(),
        rec.iter,
        B64.encode(&rec.salt),
        B64.encode(server_key),
        B64.encode(stored_key),
    );
    if out.len() > PASSLEN {
        return Err(VerifierError::Malformed("encoded record exceeds PASSLEN"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;

    fn legacy_scram_record(iter: u32, salt: &[u8], password: &[u8]) -> String {
        let sp = digest::pbkdf2(DigestAlgorithm::Sha256, password, salt, iter, 32).unwrap();
        format!("$45${iter}${}${}", B64.encode(salt), B64.encode(&sp))
    }

    // ─── PRF table ───────────────────────────────────────────────────────

    #[test]
    fn prf_tags_round_trip() {
        for prf in [
            Pbkdf2Prf::HmacSha1,
            Pbkdf2Prf::HmacSha256,
            Pbkdf2Prf::HmacSha512,
            Pbkdf2Prf::ScramSha1,
            Pbkdf2Prf::ScramSha256,
        ] {
            assert_eq!(Pbkdf2Prf::from_tag(prf.tag()), Ok(prf));
        }
        assert_eq!(Pbkdf2Prf::from_tag(7), Err(VerifierError::UnknownPrf(7)));
    }

    #[test]
    fn mechanism_names() {
        assert_eq!(
            Pbkdf2Prf::ScramSha1.mechanism_name(),
            Some("SCRAM-SHA-1")
        );
        assert_eq!(
            Pbkdf2Prf::ScramSha256.mechanism_name(),
            Some("SCRAM-SHA-256")
        );
        assert_eq!(Pbkdf2Prf::HmacSha512.mechanism_name(), None);
    }

    // ─── Decode: legacy expansion ────────────────────────────────────────

    #[test]
    fn legacy_scram_record_expands_to_pair() {
        let salt = b"0123456789abcdef";
        let rec = decode(&legacy_scram_record(4096, salt, b"hunter2")).unwrap();

        assert_eq!(rec.prf, Pbkdf2Prf::ScramSha256);
        assert_eq!(rec.iter, 4096);
        assert_eq!(rec.salt, salt);
        assert!(!rec.scram);

        let sp = digest::pbkdf2(DigestAlgorithm::Sha256, b"hunter2", salt, 4096, 32).unwrap();
        let server_key = digest::oneshot_hmac(DigestAlgorithm::Sha256, &sp, b"Server Key");
        let client_key = digest::oneshot_hmac(DigestAlgorithm::Sha256, &sp, b"Client Key");
        let stored_key = digest::oneshot(DigestAlgorithm::Sha256, &client_key);

        let (sk, hk) = rec.scram_keys().unwrap();
        assert_eq!(sk, server_key.as_slice());
        assert_eq!(hk, stored_key.as_slice());
    }

    #[test]
    fn pair_record_decodes_as_scram() {
        let salt = b"0123456789abcdef";
        let legacy = decode(&legacy_scram_record(1000, salt, b"pw")).unwrap();
        let reencoded = encode(&legacy).unwrap();

        let rec = decode(&reencoded).unwrap();
        assert!(rec.scram);
        assert_eq!(rec.scram_keys(), legacy.scram_keys());
    }

    #[test]
    fn non_scram_record_keeps_salted_password() {
        let salt = b"saltsalt";
        let sp = digest::pbkdf2(DigestAlgorithm::Sha512, b"pw", salt, 64, 64).unwrap();
        let s = format!("$6$64${}${}", B64.encode(salt), B64.encode(&sp));

        let rec = decode(&s).unwrap();
        assert_eq!(rec.prf, Pbkdf2Prf::HmacSha512);
        assert!(!rec.scram);
        assert_eq!(rec.scram_keys(), None);
        match &rec.keys {
            VerifierKeys::SaltedPassword(got) => assert_eq!(got.as_slice(), sp.as_slice()),
            other => panic!("unexpected keys: {other:?}"),
        }
    }

    // ─── Decode: rejection ───────────────────────────────────────────────

    #[test]
    fn rejects_structural_garbage() {
        for s in [
            "",
            "no-dollars-at-all",
            "45$1000$c2FsdHNhbHQ=$AAAA", // missing leading '$'
            "$45$1000$c2FsdHNhbHQ=",     // too few fields
            "$45$1000$c2FsdHNhbHQ=$a$b$c", // too many fields
        ] {
            assert!(
                matches!(decode(s), Err(VerifierError::Malformed(_))),
                "{s:?}"
            );
        }
    }

    #[test]
    fn rejects_unknown_prf() {
        assert_eq!(
            decode("$99$1000$c2FsdHNhbHQ=$AAAA"),
            Err(VerifierError::UnknownPrf(99))
        );
    }

    #[test]
    fn rejects_bad_integers() {
        assert!(matches!(
            decode("$x$1000$c2FsdHNhbHQ=$AAAA"),
            Err(VerifierError::Malformed(_))
        ));
        assert!(matches!(
            decode("$45$many$c2FsdHNhbHQ=$AAAA"),
            Err(VerifierError::Malformed(_))
        ));
        assert!(matches!(
            decode("$45$0$c2FsdHNhbHQ=$AAAA"),
            Err(VerifierError::Malformed(_))
        ));
        assert!(matches!(
            decode("$45$10000001$c2FsdHNhbHQ=$AAAA"),
            Err(VerifierError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_bad_salt() {
        // Not base64
        assert!(matches!(
            decode("$45$1000$!!!$AAAA"),
            Err(VerifierError::Malformed(_))
        ));
        // Too short (4 bytes)
        let s = format!("$45$1000${}$AAAA", B64.encode(b"tiny"));
        assert!(matches!(decode(&s), Err(VerifierError::Malformed(_))));
        // Too long (65 bytes)
        let s = format!("$45$1000${}$AAAA", B64.encode([0u8; 65]));
        assert!(matches!(decode(&s), Err(VerifierError::Malformed(_))));
    }

    #[test]
    fn rejects_wrong_key_length() {
        let salt = B64.encode(b"saltsalt");
        // 16-byte blob under a SHA-256 PRF
        let s = format!("$45$1000${salt}${}", B64.encode([0u8; 16]));
        assert_eq!(
            decode(&s),
            Err(VerifierError::LengthMismatch {
                expected: 32,
                got: 16
            })
        );
    }

    #[test]
    fn rejects_pair_under_non_scram_prf() {
        let salt = B64.encode(b"saltsalt");
        let blob = B64.encode([0u8; 32]);
        let s = format!("$5$1000${salt}${blob}${blob}");
        assert!(matches!(decode(&s), Err(VerifierError::Malformed(_))));
    }

    // ─── Encode ──────────────────────────────────────────────────────────

    #[test]
    fn encode_emits_scram_form_only() {
        let rec = decode(&legacy_scram_record(4096, b"0123456789abcdef", b"pw")).unwrap();
        let s = encode(&rec).unwrap();
        assert!(s.starts_with("$45$4096$"));
        assert_eq!(s.split('$').count(), 6); // leading empty + 5 fields
        assert!(s.len() <= PASSLEN);

        let sp = digest::pbkdf2(
            DigestAlgorithm::Sha512,
            b"pw",
            b"saltsalt",
            64,
            64,
        )
        .unwrap();
        let legacy = VerifierRecord {
            prf: Pbkdf2Prf::HmacSha512,
            iter: 64,
            salt: b"saltsalt".to_vec(),
            keys: VerifierKeys::SaltedPassword(sp),
            scram: false,
        };
        assert!(matches!(
            encode(&legacy),
            Err(VerifierError::Malformed(_))
        ));
    }
}
