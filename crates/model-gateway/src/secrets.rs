use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use thiserror::Error;

/// An AES-GCM encrypted provider secret (§6: "Secrets are AES-GCM ... encrypted with
/// an external key"). Stored as nonce + ciphertext; never as plaintext.
#[derive(Debug, Clone)]
pub struct EncryptedSecret {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("decryption failed: ciphertext or key invalid")]
    DecryptionFailed,
}

/// Encrypt a provider API key under the operator-supplied 256-bit encryption key.
pub fn encrypt_secret(plaintext: &str, key: &[u8; 32]) -> EncryptedSecret {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .expect("AES-GCM encryption of a bounded-length secret cannot fail");
    EncryptedSecret { nonce: nonce.to_vec(), ciphertext }
}

pub fn decrypt_secret(secret: &EncryptedSecret, key: &[u8; 32]) -> Result<String, SecretError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&secret.nonce);
    let plaintext = cipher
        .decrypt(nonce, secret.ciphertext.as_slice())
        .map_err(|_| SecretError::DecryptionFailed)?;
    String::from_utf8(plaintext).map_err(|_| SecretError::DecryptionFailed)
}

/// Mask a secret for admin-readable surfaces: first 4 + last 4 characters retained,
/// the middle replaced with `*` (§4.1, §6). Short secrets are masked entirely.
pub fn mask_secret(plaintext: &str) -> String {
    let len = plaintext.chars().count();
    if len <= 8 {
        return "*".repeat(len);
    }
    let chars: Vec<char> = plaintext.chars().collect();
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(len - 8), tail)
}

/// Parse the mandatory encryption key from the environment (§6 "Environment
/// contract"). The key is expected as 64 hex characters (32 bytes). Absence is a hard
/// refusal at the call site, not here — this function only validates shape.
pub fn parse_encryption_key(hex_key: &str) -> Option<[u8; 32]> {
    if hex_key.len() != 64 {
        return None;
    }
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex_key[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let key = [3u8; 32];
        let secret = encrypt_secret("sk-test-1234567890", &key);
        assert_eq!(decrypt_secret(&secret, &key).unwrap(), "sk-test-1234567890");
    }

    #[test]
    fn decrypt_fails_under_wrong_key() {
        let key_a = [1u8; 32];
        let key_b = [2u8; 32];
        let secret = encrypt_secret("sk-test-1234567890", &key_a);
        assert!(decrypt_secret(&secret, &key_b).is_err());
    }

    #[test]
    fn short_secrets_are_masked_entirely() {
        assert_eq!(mask_secret("sk-123"), "******");
    }

    #[test]
    fn parse_encryption_key_requires_64_hex_chars() {
        assert!(parse_encryption_key("not-hex").is_none());
        let valid = "a".repeat(64);
        assert!(parse_encryption_key(&valid).is_some());
    }
}
