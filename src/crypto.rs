//! Symmetric sealing of sensitive values.
//!
//! Algorithm-pluggable AEAD over a fixed-length key. Sealed values travel as
//! a base64 envelope carrying the algorithm, the nonce and the ciphertext,
//! so they can sit in a session bag or a configuration store as plain
//! strings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, CHACHA20_POLY1305, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::errors::{FrameworkError, FrameworkResult};

/// Required key length in bytes for every supported algorithm.
pub const KEY_LEN: usize = 32;

/// Supported AEAD suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherAlgorithm {
    fn suite(&self) -> &'static ring::aead::Algorithm {
        match self {
            Self::Aes256Gcm => &AES_256_GCM,
            Self::ChaCha20Poly1305 => &CHACHA20_POLY1305,
        }
    }
}

impl std::str::FromStr for CipherAlgorithm {
    type Err = FrameworkError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "aes256gcm" | "aes-256-gcm" => Ok(Self::Aes256Gcm),
            "chacha20poly1305" | "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(FrameworkError::crypto(format!(
                "unknown cipher algorithm: {other}"
            ))),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    algorithm: CipherAlgorithm,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// Symmetric cipher bound to one key and algorithm.
#[derive(Debug)]
pub struct Cryptography {
    algorithm: CipherAlgorithm,
    key: Zeroizing<Vec<u8>>,
    rng: SystemRandom,
}

impl Cryptography {
    pub fn new(algorithm: CipherAlgorithm, key: &[u8]) -> FrameworkResult<Self> {
        if key.len() != KEY_LEN {
            return Err(FrameworkError::crypto(format!(
                "cipher key must be {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            algorithm,
            key: Zeroizing::new(key.to_vec()),
            rng: SystemRandom::new(),
        })
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    fn sealing_key(&self) -> FrameworkResult<LessSafeKey> {
        let unbound = UnboundKey::new(self.algorithm.suite(), &self.key)
            .map_err(|_| FrameworkError::crypto("cipher key was rejected"))?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypt `plaintext` into a base64 envelope with a fresh nonce.
    pub fn seal(&self, plaintext: &str) -> FrameworkResult<String> {
        let key = self.sealing_key()?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| FrameworkError::crypto("nonce generation failed"))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| FrameworkError::crypto("sealing failed"))?;

        let envelope = Envelope {
            algorithm: self.algorithm,
            nonce: nonce_bytes.to_vec(),
            ciphertext: in_out,
        };
        Ok(BASE64.encode(serde_json::to_vec(&envelope)?))
    }

    /// Decrypt a base64 envelope produced by [`Self::seal`].
    pub fn unseal(&self, sealed: &str) -> FrameworkResult<String> {
        let raw = BASE64
            .decode(sealed)
            .map_err(|error| FrameworkError::crypto(format!("envelope decode failed: {error}")))?;
        let envelope: Envelope = serde_json::from_slice(&raw)?;
        if envelope.algorithm != self.algorithm {
            return Err(FrameworkError::crypto("envelope algorithm mismatch"));
        }
        if envelope.nonce.len() != NONCE_LEN {
            return Err(FrameworkError::crypto("envelope nonce has the wrong length"));
        }

        let key = self.sealing_key()?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&envelope.nonce);
        let mut in_out = envelope.ciphertext;
        let plaintext = key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| FrameworkError::crypto("unsealing failed"))?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| FrameworkError::crypto("sealed value is not valid utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn short_keys_are_rejected() {
        let error = Cryptography::new(CipherAlgorithm::Aes256Gcm, b"too-short").unwrap_err();
        assert!(matches!(error, FrameworkError::Crypto { .. }));
    }

    #[test]
    fn sealed_values_round_trip() {
        for algorithm in [CipherAlgorithm::Aes256Gcm, CipherAlgorithm::ChaCha20Poly1305] {
            let cipher = Cryptography::new(algorithm, KEY).unwrap();
            let sealed = cipher.seal("the launch code is 0000").unwrap();
            assert_ne!(sealed, "the launch code is 0000");
            assert_eq!(cipher.unseal(&sealed).unwrap(), "the launch code is 0000");
        }
    }

    #[test]
    fn unsealing_with_the_wrong_key_fails_closed() {
        let cipher = Cryptography::new(CipherAlgorithm::Aes256Gcm, KEY).unwrap();
        let sealed = cipher.seal("secret").unwrap();

        let other =
            Cryptography::new(CipherAlgorithm::Aes256Gcm, b"ffffffffffffffffffffffffffffffff")
                .unwrap();
        assert!(other.unseal(&sealed).is_err());
    }

    #[test]
    fn algorithm_mismatch_is_refused() {
        let aes = Cryptography::new(CipherAlgorithm::Aes256Gcm, KEY).unwrap();
        let chacha = Cryptography::new(CipherAlgorithm::ChaCha20Poly1305, KEY).unwrap();
        let sealed = aes.seal("secret").unwrap();
        assert!(chacha.unseal(&sealed).is_err());
    }

    #[test]
    fn algorithms_parse_like_their_config_names() {
        assert_eq!(
            "aes-256-gcm".parse::<CipherAlgorithm>().unwrap(),
            CipherAlgorithm::Aes256Gcm
        );
        assert_eq!(
            "chacha20poly1305".parse::<CipherAlgorithm>().unwrap(),
            CipherAlgorithm::ChaCha20Poly1305
        );
        assert!("rot13".parse::<CipherAlgorithm>().is_err());
    }
}
