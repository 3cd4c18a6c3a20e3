//! Shared-password credential
//!
//! The server never keeps the password itself, only a random salt and the
//! keyed BLAKE3 digest of the password under that salt.

use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use super::error::{CryptoError, CryptoResult};

/// Size of the salt in bytes
pub const SALT_SIZE: usize = 32;

/// Size of the digest in bytes
pub const DIGEST_SIZE: usize = 32;

/// Anything that can decide whether a candidate password is acceptable
///
/// The server only needs this check; where the secret comes from is up to
/// the caller.
pub trait CredentialCheck: Send + Sync {
    /// Returns true if `candidate` is the expected password
    fn check(&self, candidate: &str) -> bool;
}

/// A salted password digest
#[derive(Clone, ZeroizeOnDrop)]
pub struct Credential {
    salt: [u8; SALT_SIZE],
    digest: [u8; DIGEST_SIZE],
}

impl Credential {
    /// Salt and hash a password
    pub fn from_password(password: &str) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(salt, password)
    }

    fn with_salt(salt: [u8; SALT_SIZE], password: &str) -> Self {
        let digest = blake3::keyed_hash(&salt, password.as_bytes()).into();
        Credential { salt, digest }
    }

    /// Encode as `<salt-hex>$<digest-hex>`
    pub fn to_encoded(&self) -> String {
        format!("{}${}", hex::encode(self.salt), hex::encode(self.digest))
    }

    /// Parse the `<salt-hex>$<digest-hex>` form
    pub fn from_encoded(encoded: &str) -> CryptoResult<Self> {
        let (salt_hex, digest_hex) = encoded
            .trim()
            .split_once('$')
            .ok_or_else(|| CryptoError::InvalidCredential("missing '$' separator".to_string()))?;

        Ok(Credential {
            salt: decode_fixed(salt_hex, "salt")?,
            digest: decode_fixed(digest_hex, "digest")?,
        })
    }
}

fn decode_fixed<const N: usize>(s: &str, what: &str) -> CryptoResult<[u8; N]> {
    let bytes = hex::decode(s)
        .map_err(|e| CryptoError::InvalidCredential(format!("{}: {}", what, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CryptoError::InvalidCredential(format!("{}: expected {} bytes, got {}", what, N, b.len()))
    })
}

impl CredentialCheck for Credential {
    fn check(&self, candidate: &str) -> bool {
        let computed: [u8; DIGEST_SIZE] =
            blake3::keyed_hash(&self.salt, candidate.as_bytes()).into();
        computed.ct_eq(&self.digest).into()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
