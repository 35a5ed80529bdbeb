//! Logical key construction and physical name mapping.
//!
//! Logical keys are free-form strings. Backends whose medium restricts
//! identifiers map them through [`escape_key`], which is reversible and
//! never maps two distinct keys onto the same name.

use crate::domain::foundation::ValidationError;

/// Builds the logical key for conversation-scoped state.
///
/// Format: `{channel_id}/conversations/{conversation_id}`
pub fn conversation_key(channel_id: &str, conversation_id: &str) -> Result<String, ValidationError> {
    require("channel_id", channel_id)?;
    require("conversation_id", conversation_id)?;
    Ok(format!("{}/conversations/{}", channel_id, conversation_id))
}

/// Builds the logical key for user-scoped state.
///
/// Format: `{channel_id}/users/{user_id}`
pub fn user_key(channel_id: &str, user_id: &str) -> Result<String, ValidationError> {
    require("channel_id", channel_id)?;
    require("user_id", user_id)?;
    Ok(format!("{}/users/{}", channel_id, user_id))
}

/// Builds the dedup key guarding one token exchange request.
///
/// Format: `{channel_id}/conversations/{conversation_id}/token-exchange-id/{exchange_id}`
pub fn token_exchange_key(
    channel_id: &str,
    conversation_id: &str,
    exchange_id: &str,
) -> Result<String, ValidationError> {
    require("exchange_id", exchange_id)?;
    Ok(format!(
        "{}/token-exchange-id/{}",
        conversation_key(channel_id, conversation_id)?,
        exchange_id
    ))
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::empty_field(field));
    }
    Ok(())
}

/// Maps a logical key onto a name safe for file systems and object stores.
///
/// Bytes in `[a-z0-9_-]` pass through; every other byte becomes `%XX` with
/// uppercase hex. Uppercase letters are escaped too, so two keys that differ
/// only in case stay distinct on case-insensitive media.
pub fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Reverses [`escape_key`].
pub fn unescape_key(name: &str) -> Result<String, ValidationError> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name
                .get(i + 1..i + 3)
                .ok_or_else(|| ValidationError::invalid_format("name", "truncated escape"))?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ValidationError::invalid_format("name", "invalid escape"));
            }
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| ValidationError::invalid_format("name", "invalid escape"))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| ValidationError::invalid_format("name", "not UTF-8"))
}
