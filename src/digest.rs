//! Digest Core — streaming hash, HMAC, and PBKDF2 over MD5/SHA-1/SHA-256/SHA-512.
//!
//! A uniform front over the RustCrypto hashers so the rest of the crate never
//! names a hash implementation directly. Callers pick an algorithm, feed bytes,
//! and read out exactly `output_len()` bytes. Derived key material comes back in
//! `Zeroizing` buffers and is wiped when dropped.

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tracing::error;
use zeroize::Zeroizing;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Largest block length across supported algorithms (SHA-512).
pub const DIGEST_BKLEN_MAX: usize = 128;

/// Largest output length across supported algorithms (SHA-512).
pub const DIGEST_MDLEN_MAX: usize = 64;

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("unknown digest algorithm tag {0}")]
    UnknownAlgorithm(u32),
    #[error("output buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },
    #[error("PBKDF2 iteration count must be at least 1")]
    ZeroIterations,
    #[error("PBKDF2 derived key length must be at least 1")]
    ZeroDerivedLength,
}

// ─── Algorithm ──────────────────────────────────────────────────────────────

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Stable integer tag. Appears in no wire format but must stay distinct;
    /// persisted nowhere except operator-facing logs.
    pub fn tag(self) -> u32 {
        match self {
            Self::Md5 => 1,
            Self::Sha1 => 2,
            Self::Sha256 => 3,
            Self::Sha512 => 4,
        }
    }

    pub fn from_tag(tag: u32) -> Result<Self, DigestError> {
        match tag {
            1 => Ok(Self::Md5),
            2 => Ok(Self::Sha1),
            3 => Ok(Self::Sha256),
            4 => Ok(Self::Sha512),
            _ => Err(DigestError::UnknownAlgorithm(tag)),
        }
    }

    /// Internal block length B in bytes.
    pub fn block_len(self) -> usize {
        match self {
            Self::Md5 | Self::Sha1 | Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Output length L in bytes.
    pub fn output_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5 => write!(f, "MD5"),
            Self::Sha1 => write!(f, "SHA-1"),
            Self::Sha256 => write!(f, "SHA-256"),
            Self::Sha512 => write!(f, "SHA-512"),
        }
    }
}

// ─── Streaming context ──────────────────────────────────────────────────────

enum DigestState {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
    HmacMd5(Hmac<Md5>),
    HmacSha1(Hmac<Sha1>),
    HmacSha256(Hmac<Sha256>),
    HmacSha512(Hmac<Sha512>),
}

/// A streaming digest computation, plain or keyed.
///
/// Created by [`DigestContext::new`] or [`DigestContext::new_hmac`], fed with
/// [`update`](DigestContext::update), and consumed exactly once by
/// [`finish`](DigestContext::finish) or [`finish_into`](DigestContext::finish_into).
pub struct DigestContext {
    alg: DigestAlgorithm,
    state: DigestState,
}

impl DigestContext {
    /// Plain hash mode.
    pub fn new(alg: DigestAlgorithm) -> Self {
        let state = match alg {
            DigestAlgorithm::Md5 => DigestState::Md5(Md5::new()),
            DigestAlgorithm::Sha1 => DigestState::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => DigestState::Sha512(Sha512::new()),
        };
        Self { alg, state }
    }

    /// Keyed (HMAC) mode. A key longer than the block length is first replaced
    /// by its hash, per RFC 2104.
    pub fn new_hmac(alg: DigestAlgorithm, key: &[u8]) -> Self {
        let state = match alg {
            DigestAlgorithm::Md5 => DigestState::HmacMd5(
                Hmac::new_from_slice(key).expect("HMAC accepts any key length"),
            ),
            DigestAlgorithm::Sha1 => DigestState::HmacSha1(
                Hmac::new_from_slice(key).expect("HMAC accepts any key length"),
            ),
            DigestAlgorithm::Sha256 => DigestState::HmacSha256(
                Hmac::new_from_slice(key).expect("HMAC accepts any key length"),
            ),
            DigestAlgorithm::Sha512 => DigestState::HmacSha512(
                Hmac::new_from_slice(key).expect("HMAC accepts any key length"),
            ),
        };
        Self { alg, state }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.alg
    }

    pub fn is_hmac(&self) -> bool {
        matches!(
            self.state,
            DigestState::HmacMd5(_)
                | DigestState::HmacSha1(_)
                | DigestState::HmacSha256(_)
                | DigestState::HmacSha512(_)
        )
    }

    /// Append data to the running computation. An empty slice is a no-op.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            DigestState::Md5(h) => h.update(data),
            DigestState::Sha1(h) => h.update(data),
            DigestState::Sha256(h) => h.update(data),
            DigestState::Sha512(h) => h.update(data),
            DigestState::HmacMd5(m) => m.update(data),
            DigestState::HmacSha1(m) => m.update(data),
            DigestState::HmacSha256(m) => m.update(data),
            DigestState::HmacSha512(m) => m.update(data),
        }
    }

    /// Consume the context and return the digest (L bytes).
    pub fn finish(self) -> Zeroizing<Vec<u8>> {
        let out = match self.state {
            DigestState::Md5(h) => h.finalize().to_vec(),
            DigestState::Sha1(h) => h.finalize().to_vec(),
            DigestState::Sha256(h) => h.finalize().to_vec(),
            DigestState::Sha512(h) => h.finalize().to_vec(),
            DigestState::HmacMd5(m) => m.finalize().into_bytes().to_vec(),
            DigestState::HmacSha1(m) => m.finalize().into_bytes().to_vec(),
            DigestState::HmacSha256(m) => m.finalize().into_bytes().to_vec(),
            DigestState::HmacSha512(m) => m.finalize().into_bytes().to_vec(),
        };
        Zeroizing::new(out)
    }

    /// Consume the context and write exactly L bytes into `out`, returning L.
    /// The context is consumed even when `out` is undersized.
    pub fn finish_into(self, out: &mut [u8]) -> Result<usize, DigestError> {
        let need = self.alg.output_len();
        if out.len() < need {
            error!(
                need,
                have = out.len(),
                "digest finish: output buffer too small (BUG)"
            );
            return Err(DigestError::BufferTooSmall {
                need,
                have: out.len(),
            });
        }
        let md = self.finish();
        out[..need].copy_from_slice(&md);
        Ok(need)
    }
}

// ─── One-shot helpers ───────────────────────────────────────────────────────

/// Hash `data` in one call.
pub fn oneshot(alg: DigestAlgorithm, data: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut ctx = DigestContext::new(alg);
    ctx.update(data);
    ctx.finish()
}

/// HMAC `data` under `key` in one call.
pub fn oneshot_hmac(alg: DigestAlgorithm, key: &[u8], data: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut ctx = DigestContext::new_hmac(alg, key);
    ctx.update(data);
    ctx.finish()
}

/// PBKDF2 (RFC 8018) with HMAC-`alg` as the PRF. Produces exactly `dklen`
/// bytes. Requires `iter >= 1` and `dklen >= 1`.
pub fn pbkdf2(
    alg: DigestAlgorithm,
    pass: &[u8],
    salt: &[u8],
    iter: u32,
    dklen: usize,
) -> Result<Zeroizing<Vec<u8>>, DigestError> {
    if iter == 0 {
        error!("pbkdf2: called with zero iteration count (BUG)");
        return Err(DigestError::ZeroIterations);
    }
    if dklen == 0 {
        error!("pbkdf2: called with zero derived key length (BUG)");
        return Err(DigestError::ZeroDerivedLength);
    }

    let mut dk = Zeroizing::new(vec![0u8; dklen]);
    match alg {
        DigestAlgorithm::Md5 => pbkdf2::pbkdf2_hmac::<Md5>(pass, salt, iter, &mut dk),
        DigestAlgorithm::Sha1 => pbkdf2::pbkdf2_hmac::<Sha1>(pass, salt, iter, &mut dk),
        DigestAlgorithm::Sha256 => pbkdf2::pbkdf2_hmac::<Sha256>(pass, salt, iter, &mut dk),
        DigestAlgorithm::Sha512 => pbkdf2::pbkdf2_hmac::<Sha512>(pass, salt, iter, &mut dk),
    }
    Ok(dk)
}
