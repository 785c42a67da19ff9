//! Telegram login-widget assertion verification.
//!
//! The widget posts the user's profile fields plus `auth_date` and a `hash`.
//! The hash is HMAC-SHA256 (hex) over the data-check string: every field
//! except `hash`, rendered as `key=value`, sorted by key, joined by `\n`.
//! Optional fields the widget did not send are left out of the string.

use std::collections::BTreeMap;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use super::AuthError;
use crate::models::auth::TelegramAuthData;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of `auth_date`, in seconds.
pub const MAX_AUTH_AGE_SECS: i64 = 300;

/// Build the canonical data-check string for a payload.
pub fn data_check_string(data: &TelegramAuthData) -> String {
    let mut fields: BTreeMap<&str, String> = BTreeMap::new();
    fields.insert("auth_date", data.auth_date.to_string());
    fields.insert("first_name", data.first_name.clone());
    fields.insert("id", data.id.to_string());
    if let Some(last_name) = &data.last_name {
        fields.insert("last_name", last_name.clone());
    }
    if let Some(username) = &data.username {
        fields.insert("username", username.clone());
    }
    if let Some(photo_url) = &data.photo_url {
        fields.insert("photo_url", photo_url.clone());
    }

    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn mac_for(data: &TelegramAuthData, secret: &str) -> Result<HmacSha256, AuthError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| AuthError::Internal(format!("hmac init: {e}")))?;
    mac.update(data_check_string(data).as_bytes());
    Ok(mac)
}

/// Compute the hex signature the widget would attach to `data`.
pub fn sign(data: &TelegramAuthData, secret: &str) -> Result<String, AuthError> {
    Ok(hex::encode(mac_for(data, secret)?.finalize().into_bytes()))
}

/// Verify signature and freshness against the current clock.
pub fn verify_telegram_auth(data: &TelegramAuthData, secret: &str) -> bool {
    verify_telegram_auth_at(data, secret, Utc::now().timestamp())
}

/// Verify signature and freshness against an explicit `now` (unix seconds).
pub fn verify_telegram_auth_at(data: &TelegramAuthData, secret: &str, now: i64) -> bool {
    // `auth_date` is client-supplied; an overflowing age counts as stale.
    if now
        .checked_sub(data.auth_date)
        .is_none_or(|age| age > MAX_AUTH_AGE_SECS)
    {
        debug!(telegram_id = data.id, auth_date = data.auth_date, "telegram assertion is stale");
        return false;
    }

    let Ok(provided) = hex::decode(&data.hash) else {
        debug!(telegram_id = data.id, "telegram hash is not hex");
        return false;
    };

    mac_for(data, secret).is_ok_and(|mac| mac.verify_slice(&provided).is_ok())
}
