//! One message, one ciphertext block
//!
//! RSA with PKCS#1 v1.5 padding turns any plaintext of at most
//! `modulus_bytes - 11` bytes into exactly `modulus_bytes` bytes of ciphertext.
//! The wire protocol leans on that: readers pull exactly one modulus worth of
//! bytes per message and never see a length prefix. To keep that promise the
//! encoder truncates instead of failing when text is too long.

use std::borrow::Cow;

use rand::rngs::OsRng;
use rsa::Pkcs1v15Encrypt;

use super::error::{CryptoError, CryptoResult};
use super::keys::{Keypair, PeerPublicKey};

/// Padding overhead of PKCS#1 v1.5 encryption, in bytes
pub const PKCS1_V15_OVERHEAD: usize = 11;

/// Appended to text cut short to fit a single block
pub const TRUNCATION_MARKER: &str = "... (message truncated)";

/// Encrypts and decrypts single-block chat payloads
pub struct MessageCodec;

impl MessageCodec {
    /// Largest plaintext, in bytes, that fits in one block for `recipient`
    pub fn capacity(recipient: &PeerPublicKey) -> usize {
        recipient.block_size().saturating_sub(PKCS1_V15_OVERHEAD)
    }

    /// Cut `text` down to at most `capacity` bytes
    ///
    /// Text that already fits is borrowed unchanged. Otherwise the result
    /// ends with [`TRUNCATION_MARKER`] and is `capacity` bytes long, less
    /// whatever is needed to land on a UTF-8 character boundary.
    pub fn fit(text: &str, capacity: usize) -> Cow<'_, str> {
        if text.len() <= capacity {
            return Cow::Borrowed(text);
        }

        if capacity < TRUNCATION_MARKER.len() {
            return Cow::Owned(text[..floor_char_boundary(text, capacity)].to_string());
        }

        let keep = floor_char_boundary(text, capacity - TRUNCATION_MARKER.len());
        let mut fitted = String::with_capacity(capacity);
        fitted.push_str(&text[..keep]);
        fitted.push_str(TRUNCATION_MARKER);
        Cow::Owned(fitted)
    }

    /// Encrypt `plaintext` for `recipient`, truncating if necessary
    ///
    /// The returned block is always exactly `recipient.block_size()` bytes.
    pub fn encode(plaintext: &str, recipient: &PeerPublicKey) -> CryptoResult<Vec<u8>> {
        let fitted = Self::fit(plaintext, Self::capacity(recipient));

        recipient
            .as_rsa()
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, fitted.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// Decrypt one block addressed to `keypair`
    pub fn decode(block: &[u8], keypair: &Keypair) -> CryptoResult<String> {
        if block.len() != keypair.block_size() {
            return Err(CryptoError::InvalidBlockLength {
                expected: keypair.block_size(),
                actual: block.len(),
            });
        }

        let plaintext = keypair
            .private_key()
            .decrypt(Pkcs1v15Encrypt, block)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keypair;

    #[test]
    fn test_encode_decode() {
        let keypair = test_keypair(0);
        let plaintext = "alice: hello there";

        let block = MessageCodec::encode(plaintext, keypair.public_key()).unwrap();
        assert_eq!(block.len(), keypair.block_size());

        let decoded = MessageCodec::decode(&block, keypair).unwrap();
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn test_exactly_at_capacity_is_untouched() {
        let keypair = test_keypair(0);
        let capacity = MessageCodec::capacity(keypair.public_key());
        let plaintext = "x".repeat(capacity);

        let block = MessageCodec::encode(&plaintext, keypair.public_key()).unwrap();
        let decoded = MessageCodec::decode(&block, keypair).unwrap();
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn test_long_message_truncated_to_capacity() {
        let keypair = test_keypair(0);
        let capacity = MessageCodec::capacity(keypair.public_key());
        let plaintext = format!("bob: {}", "a".repeat(capacity * 2));

        let block = MessageCodec::encode(&plaintext, keypair.public_key()).unwrap();
        assert_eq!(block.len(), keypair.block_size());

        let decoded = MessageCodec::decode(&block, keypair).unwrap();
        assert!(decoded.ends_with(TRUNCATION_MARKER));
        assert!(decoded.starts_with("bob: aaa"));
        assert_eq!(decoded.len(), capacity);
    }

    #[test]
    fn test_fit_respects_char_boundaries() {
        let text = "é".repeat(40);
        let fitted = MessageCodec::fit(&text, 50);

        assert!(fitted.len() <= 50);
        assert!(fitted.ends_with(TRUNCATION_MARKER));
        // 27 bytes of room rounds down to 13 two-byte characters
        assert_eq!(fitted.len(), 26 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_fit_tiny_capacity_drops_marker() {
        let fitted = MessageCodec::fit("abcdefghij", 4);
        assert_eq!(fitted, "abcd");
    }

    #[test]
    fn test_wrong_key_fails() {
        let alice = test_keypair(0);
        let bob = test_keypair(1);

        let block = MessageCodec::encode("secret", alice.public_key()).unwrap();
        assert_eq!(
            MessageCodec::decode(&block, bob),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_short_block_rejected() {
        let keypair = test_keypair(0);
        let err = MessageCodec::decode(&[0u8; 17], keypair).unwrap_err();

        assert_eq!(
            err,
            CryptoError::InvalidBlockLength {
                expected: 128,
                actual: 17
            }
        );
    }

    #[test]
    fn test_ciphertext_randomized() {
        let keypair = test_keypair(0);
        let a = MessageCodec::encode("same", keypair.public_key()).unwrap();
        let b = MessageCodec::encode("same", keypair.public_key()).unwrap();

        // PKCS#1 v1.5 padding is random
        assert_ne!(a, b);
    }
}
