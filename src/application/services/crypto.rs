use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use anyhow::{Context, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// AES-256-GCM cipher for sender SMTP passwords. Wire form is
/// `nonce:ciphertext`, both base64.
pub struct CredentialCipher {
    key: [u8; KEY_SIZE],
}

impl CredentialCipher {
    /// The key is required at startup; a missing or short key must refuse
    /// the process rather than run silently insecure.
    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .context("credentials key is not valid base64")?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| anyhow!("credentials key must decode to {KEY_SIZE} bytes"))?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);

        let mut rng = rand::rng();
        let nonce_bytes: [u8; NONCE_SIZE] = std::array::from_fn(|_| rng.random());
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("encryption failed: {e}"))?;

        Ok(format!(
            "{}:{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, encoded: &str) -> anyhow::Result<String> {
        let (nonce_b64, ciphertext_b64) = encoded
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed encrypted credential"))?;

        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .context("invalid nonce encoding")?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!("invalid nonce size"));
        }
        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .context("invalid ciphertext encoding")?;

        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| anyhow!("decryption failed: {e}"))?;
        String::from_utf8(plaintext).context("decrypted credential is not utf-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        BASE64.encode([7u8; KEY_SIZE])
    }

    #[test]
    fn round_trips_a_password() {
        let cipher = CredentialCipher::from_base64(&test_key()).unwrap();
        let encrypted = cipher.encrypt("hunter2").unwrap();
        assert_ne!(encrypted, "hunter2");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "hunter2");
    }

    #[test]
    fn rejects_short_keys() {
        let short = BASE64.encode([1u8; 16]);
        assert!(CredentialCipher::from_base64(&short).is_err());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let cipher = CredentialCipher::from_base64(&test_key()).unwrap();
        let encrypted = cipher.encrypt("hunter2").unwrap();
        let tampered = format!("{}AA", encrypted);
        assert!(cipher.decrypt(&tampered).is_err());
    }
}
