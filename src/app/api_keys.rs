use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::Row;
use uuid::Uuid;

use crate::infra::db::Db;

const API_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// AES-256-GCM sealing for stored API keys. Output is base64 of nonce || ciphertext.
#[derive(Clone)]
pub struct ApiKeyCipher {
    cipher: Aes256Gcm,
}

impl ApiKeyCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|err| anyhow!("api key encryption failed: {}", err))?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = STANDARD.decode(encoded)?;
        if combined.len() < NONCE_LEN {
            return Err(anyhow!("encrypted api key is too short"));
        }

        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|err| anyhow!("api key decryption failed: {}", err))?;
        Ok(String::from_utf8(plaintext)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealedKey {
    UserNotFound,
    NoKey,
    Key(String),
}

#[derive(Clone)]
pub struct ApiKeyService {
    db: Db,
    cipher: ApiKeyCipher,
}

impl ApiKeyService {
    pub fn new(db: Db, cipher: ApiKeyCipher) -> Self {
        Self { db, cipher }
    }

    /// Generates a fresh key for the user, replacing any previous one.
    /// Returns `None` when the user does not exist.
    pub async fn generate(&self, user_id: Uuid) -> Result<Option<String>> {
        let api_key = generate_key();
        let ciphertext = self.cipher.encrypt(&api_key)?;

        let result = sqlx::query(
            "UPDATE users \
             SET api_key_hash = $2, api_key_ciphertext = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(hash_key(&api_key))
        .bind(ciphertext)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(api_key))
    }

    pub async fn reveal(&self, user_id: Uuid) -> Result<RevealedKey> {
        let row = sqlx::query("SELECT api_key_ciphertext FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(RevealedKey::UserNotFound),
        };

        let ciphertext: Option<String> = row.get("api_key_ciphertext");
        match ciphertext {
            Some(ciphertext) => Ok(RevealedKey::Key(self.cipher.decrypt(&ciphertext)?)),
            None => Ok(RevealedKey::NoKey),
        }
    }

    pub async fn authenticate(&self, api_key: &str) -> Result<Option<Uuid>> {
        if api_key.len() != API_KEY_LEN {
            return Ok(None);
        }

        let row = sqlx::query("SELECT id FROM users WHERE api_key_hash = $1")
            .bind(hash_key(api_key))
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|row| row.get("id")))
    }
}

pub fn generate_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect()
}

pub fn hash_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_alphanumeric() {
        let key = generate_key();
        assert_eq!(key.len(), API_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, generate_key());
    }

    #[test]
    fn cipher_round_trips_and_uses_fresh_nonces() {
        let cipher = ApiKeyCipher::new(&[3u8; 32]);
        let first = cipher.encrypt("secret-key").unwrap();
        let second = cipher.encrypt("secret-key").unwrap();

        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), "secret-key");
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let sealed = ApiKeyCipher::new(&[3u8; 32]).encrypt("secret-key").unwrap();
        assert!(ApiKeyCipher::new(&[4u8; 32]).decrypt(&sealed).is_err());
        assert!(ApiKeyCipher::new(&[3u8; 32]).decrypt("c2hvcnQ=").is_err());
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = hash_key("abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
