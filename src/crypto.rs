use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::Sha256;

const HKDF_SALT: &[u8] = b"formrelay-v1";
const HKDF_INFO: &[u8] = b"client-access-key";

pub const ACCESS_KEY_LEN: usize = 64;

fn derive_key(key: &str) -> Result<[u8; 32], String> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), key.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|e| format!("Key derivation failed: {e}"))?;
    Ok(okm)
}

/// A fresh random client access key.
pub fn generate_access_key() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ACCESS_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Encrypt plaintext using AES-256-GCM. Returns nonce (12 bytes) prepended to ciphertext.
pub fn encrypt(plaintext: &str, key: &str) -> Result<Vec<u8>, String> {
    let cipher = Aes256Gcm::new_from_slice(&derive_key(key)?)
        .map_err(|e| format!("Invalid key: {e}"))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| format!("Encryption failed: {e}"))?;

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

pub fn decrypt(data: &[u8], key: &str) -> Result<String, String> {
    if data.len() < 12 {
        return Err("Ciphertext too short".to_string());
    }

    let cipher = Aes256Gcm::new_from_slice(&derive_key(key)?)
        .map_err(|e| format!("Invalid key: {e}"))?;

    let nonce = Nonce::from_slice(&data[..12]);
    let plaintext = cipher
        .decrypt(nonce, &data[12..])
        .map_err(|e| format!("Decryption failed: {e}"))?;

    String::from_utf8(plaintext).map_err(|e| format!("Invalid UTF-8: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_keys_are_long_and_alphanumeric() {
        let key = generate_access_key();
        assert_eq!(key.len(), ACCESS_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, generate_access_key());
    }

    #[test]
    fn decrypts_what_it_encrypts() {
        let sealed = encrypt("access-key", "server-secret").unwrap();
        assert_eq!(decrypt(&sealed, "server-secret").unwrap(), "access-key");
        assert!(decrypt(&sealed, "other-secret").is_err());
    }
}
