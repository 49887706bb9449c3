use crate::error::{StorageError, StorageResult};
use crate::retry::retry_store_operation;
use crate::storage::KeyValueStore;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use log::error;
use std::collections::HashMap;
use tokio_postgres::{Client, NoTls};

const ENCRYPTION_PREFIX: &str = "enc:v1:";
const ENCRYPTION_IV_LENGTH: usize = 12;
const DATABASE_KEY_ENV_VAR: &str = "DATABASE_KEY";

const CREATE_KV_TABLE: &str = "CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

pub struct Database {
    client: Client,
}

fn backend_error(err: tokio_postgres::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        client
            .batch_execute(CREATE_KV_TABLE)
            .await
            .context("failed to create kv_store table")?;

        Ok(Self { client })
    }

    /// Settings table rows, decrypted. A missing table yields an empty map so a fresh
    /// database still works with environment settings alone.
    pub async fn get_all_settings(&self) -> Result<HashMap<String, String>> {
        let rows = match self
            .client
            .query("SELECT setting_key, value FROM settings", &[])
            .await
        {
            Ok(rows) => rows,
            Err(err) if err.code() == Some(&tokio_postgres::error::SqlState::UNDEFINED_TABLE) => {
                return Ok(HashMap::new())
            }
            Err(err) => return Err(err.into()),
        };
        let mut settings = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get(0);
            let raw_value: String = row.get(1);
            let value = decrypt_database_value(&raw_value)
                .with_context(|| format!("failed to decrypt setting {}", key))?;
            settings.insert(key, value);
        }
        Ok(settings)
    }
}

#[async_trait]
impl KeyValueStore for Database {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let row = retry_store_operation!(format!("kv get {}", key), async {
            self.client
                .query_opt("SELECT value FROM kv_store WHERE key = $1", &[&key])
                .await
                .map_err(backend_error)
        })?;
        Ok(row.map(|row| row.get::<_, String>(0)))
    }

    async fn put(&self, key: &str, value: &str) -> StorageResult<()> {
        retry_store_operation!(format!("kv put {}", key), async {
            self.client
                .execute(
                    "INSERT INTO kv_store (key, value, updated_at) VALUES ($1, $2, NOW())
                     ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
                    &[&key, &value],
                )
                .await
                .map_err(backend_error)
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let removed = retry_store_operation!(format!("kv delete {}", key), async {
            self.client
                .execute("DELETE FROM kv_store WHERE key = $1", &[&key])
                .await
                .map_err(backend_error)
        })?;
        Ok(removed > 0)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let pattern = format!("{}%", escape_like(prefix));
        let rows = retry_store_operation!(format!("kv scan {}", prefix), async {
            self.client
                .query(
                    "SELECT key FROM kv_store WHERE key LIKE $1 ESCAPE '\\' ORDER BY key",
                    &[&pattern],
                )
                .await
                .map_err(backend_error)
        })?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn decrypt_database_value(value: &str) -> Result<String> {
    if value.is_empty() || !value.starts_with(ENCRYPTION_PREFIX) {
        return Ok(value.to_string());
    }

    let key = load_database_key()?;
    let payload = value
        .strip_prefix(ENCRYPTION_PREFIX)
        .ok_or_else(|| anyhow!("Encrypted value has an invalid format."))?;
    let parts: Vec<&str> = payload.split(':').collect();
    let &[raw_iv, raw_data, raw_tag] = parts.as_slice() else {
        return Err(anyhow!("Encrypted value has an invalid format."));
    };

    let decode = |part: &str| {
        BASE64_STANDARD
            .decode(part)
            .map_err(|_| anyhow!("Encrypted value payload is invalid."))
    };
    let iv = decode(raw_iv)?;
    let data = decode(raw_data)?;
    let tag = decode(raw_tag)?;
    if iv.len() != ENCRYPTION_IV_LENGTH || tag.is_empty() {
        return Err(anyhow!("Encrypted value payload is invalid."));
    }

    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|_| anyhow!("Failed to initialize cipher."))?;
    let mut sealed = data;
    sealed.extend_from_slice(&tag);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
        .map_err(|_| anyhow!("Failed to decrypt encrypted value."))?;

    String::from_utf8(plaintext).context("Decrypted value is not valid UTF-8.")
}

fn load_database_key() -> Result<[u8; 32]> {
    let raw = std::env::var(DATABASE_KEY_ENV_VAR).unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!(
            "{} is required to decrypt stored secrets. Generate one with \"openssl rand -hex 32\".",
            DATABASE_KEY_ENV_VAR
        ));
    }

    let decoded = if trimmed.len() == 64 && trimmed.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        hex::decode(trimmed).map_err(|_| invalid_database_key_error(0))?
    } else {
        BASE64_STANDARD.decode(trimmed).unwrap_or_default()
    };
    decoded
        .try_into()
        .map_err(|decoded: Vec<u8>| invalid_database_key_error(decoded.len()))
}

fn invalid_database_key_error(key_length: usize) -> anyhow::Error {
    anyhow!(
        "{} must be a 32-byte key encoded as 64 hex characters or base64. Key length {}",
        DATABASE_KEY_ENV_VAR,
        key_length
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::aead::Aead;
    use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    const TEST_DATABASE_KEY_HEX: &str =
        "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    #[test]
    fn plaintext_values_pass_through() {
        assert_eq!(decrypt_database_value("sk-live").unwrap(), "sk-live");
        assert_eq!(decrypt_database_value("").unwrap(), "");
    }

    #[test]
    fn enc_v1_values_decrypt_with_hex_key() {
        let guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock should not be poisoned");
        std::env::set_var(DATABASE_KEY_ENV_VAR, TEST_DATABASE_KEY_HEX);

        let key: [u8; 32] = hex::decode(TEST_DATABASE_KEY_HEX)
            .unwrap()
            .try_into()
            .unwrap();
        let encrypted = encrypt_test_value("openai-secret", &key);
        assert_eq!(decrypt_database_value(&encrypted).unwrap(), "openai-secret");

        assert!(decrypt_database_value("enc:v1:only-two:parts").is_err());

        std::env::remove_var(DATABASE_KEY_ENV_VAR);
        drop(guard);
    }

    #[test]
    fn encrypted_values_need_a_key() {
        let guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock should not be poisoned");
        std::env::remove_var(DATABASE_KEY_ENV_VAR);

        let error = decrypt_database_value("enc:v1:iv:data:tag").unwrap_err();
        assert!(error.to_string().contains(DATABASE_KEY_ENV_VAR));
        drop(guard);
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("strategy:"), "strategy:");
        assert_eq!(escape_like("a_b%c\\"), "a\\_b\\%c\\\\");
    }

    fn encrypt_test_value(value: &str, key: &[u8; 32]) -> String {
        let iv: [u8; ENCRYPTION_IV_LENGTH] = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8];
        let cipher = Aes256Gcm::new_from_slice(key).unwrap();
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), value.as_bytes())
            .unwrap();
        let (ciphertext, tag) = sealed.split_at(sealed.len() - 16);

        format!(
            "{}{}:{}:{}",
            ENCRYPTION_PREFIX,
            BASE64_STANDARD.encode(iv),
            BASE64_STANDARD.encode(ciphertext),
            BASE64_STANDARD.encode(tag)
        )
    }
}
