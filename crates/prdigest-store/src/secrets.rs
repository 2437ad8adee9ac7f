//! Repository credential sealing.
//!
//! Access tokens are opaque bytes at rest: AES-256-GCM under a process
//! key derived from a configured passphrase, random 96-bit nonce
//! prepended to the ciphertext, base64 on the wire and in the store.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};

use prdigest_core::error::{DigestError, Result};

const NONCE_LEN: usize = 12;

/// Seals and unseals repository credentials with a process-wide key.
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    /// Derive the AEAD key from a passphrase. An empty passphrase is a
    /// configuration error: credentials must never be stored raw.
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(DigestError::Config(
                "credential key is empty; set security.credential_key or PRDIGEST_CREDENTIAL_KEY"
                    .into(),
            ));
        }
        let mut hasher = Sha256::new();
        hasher.update(b"prdigest::credential::");
        hasher.update(passphrase.as_bytes());
        let digest = hasher.finalize();

        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(Self { key })
    }

    /// Encrypt a token for storage. Output is base64(nonce || ciphertext).
    pub fn seal(&self, token: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, token.as_bytes())
            .map_err(|_| DigestError::Security("credential encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a stored credential back into the raw token.
    pub fn unseal(&self, sealed: &str) -> Result<String> {
        let bytes = BASE64
            .decode(sealed.trim())
            .map_err(|e| DigestError::Security(format!("credential base64 decode failed: {e}")))?;
        if bytes.len() <= NONCE_LEN {
            return Err(DigestError::Security("credential payload too short".into()));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| DigestError::Security("credential decryption failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| DigestError::Security(format!("credential is not valid UTF-8: {e}")))
    }
}
