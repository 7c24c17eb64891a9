//! API key lifecycle for the OpenAI-compatible endpoint.
//!
//! Tokens look like `sk-proj-<43 base64url chars>`. Only a SHA-256 hex digest
//! and the last four characters are stored; the full token is shown once, at
//! issuance. Each successful bearer check stamps `last_used`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::models::ApiKey;
use crate::store::{now_ts, Store};

pub const KEY_PREFIX: &str = "sk-proj-";

const KEY_BYTES: usize = 32;
const SUFFIX_CHARS: usize = 4;

/// A key as shown in listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedKey {
    pub id: String,
    pub name: String,
    pub key: String,
    pub last_used: Option<i64>,
    pub created_at: i64,
}

/// Returned once, right after issuance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedKey {
    pub id: String,
    pub name: String,
    pub key: String,
    pub created_at: i64,
}

pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub fn mask(suffix: &str) -> String {
    format!("{}...{}", KEY_PREFIX, suffix)
}

fn suffix_of(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    chars[chars.len().saturating_sub(SUFFIX_CHARS)..]
        .iter()
        .collect()
}

pub async fn issue_key(store: &dyn Store, user_id: &str, name: &str) -> Result<IssuedKey> {
    if user_id.trim().is_empty() || name.trim().is_empty() {
        return Err(ChatError::validation("userId and name are required"));
    }

    let key = generate_key();
    let record = ApiKey {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: name.trim().to_string(),
        key_hash: hash_key(&key),
        key_suffix: suffix_of(&key),
        last_used: None,
        created_at: now_ts(),
    };
    store.insert_api_key(&record).await?;
    tracing::info!(user_id, key_id = %record.id, "issued API key");

    Ok(IssuedKey {
        id: record.id,
        name: record.name,
        key,
        created_at: record.created_at,
    })
}

pub async fn list_keys(store: &dyn Store, user_id: &str) -> Result<Vec<MaskedKey>> {
    Ok(store
        .list_api_keys(user_id)
        .await?
        .into_iter()
        .map(|k| MaskedKey {
            key: mask(&k.key_suffix),
            id: k.id,
            name: k.name,
            last_used: k.last_used,
            created_at: k.created_at,
        })
        .collect())
}

pub async fn revoke_key(store: &dyn Store, id: &str, user_id: &str) -> Result<()> {
    if store.delete_api_key(id, user_id).await? {
        tracing::info!(user_id, key_id = id, "revoked API key");
        Ok(())
    } else {
        Err(ChatError::not_found("API key not found"))
    }
}

/// Validate an `Authorization` header value and return the key's record.
pub async fn authenticate(store: &dyn Store, header: Option<&str>) -> Result<ApiKey> {
    let token = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ChatError::unauthorized("Missing or invalid authorization header"))?;

    let key = store
        .find_api_key(&hash_key(token))
        .await?
        .ok_or_else(|| ChatError::unauthorized("Invalid API key"))?;

    store.touch_api_key(&key.id).await?;
    Ok(key)
}
