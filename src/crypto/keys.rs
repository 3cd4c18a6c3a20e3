//! RSA keypairs and peer public keys
//!
//! Every participant owns one [`Keypair`]. The public half travels over the
//! wire as a PKCS#1 PEM document during the handshake and comes back to us as
//! a [`PeerPublicKey`].

use rand::rngs::OsRng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey,
    LineEnding,
};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use super::error::{CryptoError, CryptoResult};

/// Default modulus size for the server identity
pub const DEFAULT_SERVER_KEY_BITS: usize = 2048;

/// Default modulus size for client identities
pub const DEFAULT_CLIENT_KEY_BITS: usize = 4096;

/// Smallest modulus we agree to generate
pub const MIN_KEY_BITS: usize = 1024;

/// Largest modulus we agree to generate
pub const MAX_KEY_BITS: usize = 8192;

/// A remote party's public key, learned during the handshake
#[derive(Clone, PartialEq, Eq)]
pub struct PeerPublicKey(RsaPublicKey);

impl PeerPublicKey {
    /// Parse a PKCS#1 PEM encoded public key
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        RsaPublicKey::from_pkcs1_pem(pem.trim())
            .map(PeerPublicKey)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Encode as a PKCS#1 PEM document (LF line endings)
    pub fn to_pem(&self) -> CryptoResult<String> {
        self.0
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyEncodingFailed(e.to_string()))
    }

    /// Modulus size in bytes; every block encrypted to this key has this length
    pub fn block_size(&self) -> usize {
        self.0.size()
    }

    /// Short hex fingerprint of the DER encoding, for logs and display
    pub fn fingerprint(&self) -> String {
        match self.0.to_pkcs1_der() {
            Ok(der) => hex::encode(&blake3::hash(der.as_bytes()).as_bytes()[..8]),
            Err(_) => "unknown".to_string(),
        }
    }

    pub(crate) fn as_rsa(&self) -> &RsaPublicKey {
        &self.0
    }
}

impl From<RsaPublicKey> for PeerPublicKey {
    fn from(key: RsaPublicKey) -> Self {
        PeerPublicKey(key)
    }
}

impl std::fmt::Debug for PeerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerPublicKey({} bits, {})", self.block_size() * 8, self.fingerprint())
    }
}

/// A local RSA identity
///
/// The private key is zeroized when dropped.
#[derive(Clone)]
pub struct Keypair {
    public_key: PeerPublicKey,
    private_key: RsaPrivateKey,
}

impl Keypair {
    /// Generate a new random keypair with a modulus of `bits` bits
    pub fn generate(bits: usize) -> CryptoResult<Self> {
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) || bits % 8 != 0 {
            return Err(CryptoError::KeyGenerationFailed(format!(
                "unsupported key size {} (expected a multiple of 8 in {}..={})",
                bits, MIN_KEY_BITS, MAX_KEY_BITS
            )));
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
        Ok(Self::from_private(private_key))
    }

    fn from_private(private_key: RsaPrivateKey) -> Self {
        Keypair {
            public_key: PeerPublicKey(RsaPublicKey::from(&private_key)),
            private_key,
        }
    }

    /// Our public key, as the peer will see it
    pub fn public_key(&self) -> &PeerPublicKey {
        &self.public_key
    }

    /// Modulus size in bytes; every block addressed to us has this length
    pub fn block_size(&self) -> usize {
        self.private_key.size()
    }

    /// Export the private key as PKCS#1 PEM
    ///
    /// The returned string holds secret material and is wiped on drop.
    pub fn to_pem(&self) -> CryptoResult<Zeroizing<String>> {
        self.private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyEncodingFailed(e.to_string()))
    }

    /// Import a private key from PKCS#1 PEM
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        private_key
            .validate()
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self::from_private(private_key))
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keypair;

    #[test]
    fn test_block_size_matches_modulus() {
        let keypair = test_keypair(0);
        assert_eq!(keypair.block_size(), 128);
        assert_eq!(keypair.public_key().block_size(), 128);
    }

    #[test]
    fn test_public_pem_roundtrip() {
        let keypair = test_keypair(0);
        let pem = keypair.public_key().to_pem().unwrap();

        assert!(pem.starts_with("-----BEGIN RSA PUBLIC KEY-----"));
        let restored = PeerPublicKey::from_pem(&pem).unwrap();
        assert_eq!(&restored, keypair.public_key());
    }

    #[test]
    fn test_private_pem_roundtrip() {
        let keypair = test_keypair(1);
        let pem = keypair.to_pem().unwrap();
        let restored = Keypair::from_pem(&pem).unwrap();

        assert_eq!(restored.public_key(), keypair.public_key());
    }

    #[test]
    fn test_garbage_public_key_rejected() {
        let err = PeerPublicKey::from_pem("-----BEGIN RSA PUBLIC KEY-----\nnope\n").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPublicKey(_)));
    }

    #[test]
    fn test_fingerprints_differ() {
        let a = test_keypair(0).public_key().fingerprint();
        let b = test_keypair(1).public_key().fingerprint();

        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_unsupported_key_size() {
        assert!(Keypair::generate(512).is_err());
        assert!(Keypair::generate(2047).is_err());
    }
}
