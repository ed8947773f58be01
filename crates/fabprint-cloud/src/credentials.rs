//! Credential file parsing.
//!
//! A credential file is a JSON document with at least a `token` string.
//! `refreshToken`, `uid`, `name`, `email` and `avatar` are optional and
//! default to empty strings.

use std::path::Path;

use serde_json::Value;

use crate::error::{CloudError, Result};

/// Login fields extracted from a token payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Access token.
    pub token: String,
    /// Refresh token (may be empty).
    pub refresh_token: String,
    /// Cloud user id (may be empty).
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Account email.
    pub email: String,
    /// Avatar URL.
    pub avatar: String,
}

impl Credentials {
    /// Parse credentials from raw payload text.
    ///
    /// Well-formed JSON is read with a real parser. Anything else falls back
    /// to scanning for `"key": "value"` pairs, so one malformed field never
    /// hides the others.
    pub fn parse(raw: &str) -> Result<Self> {
        let creds = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => {
                let field = |key: &str| {
                    map.get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                Self {
                    token: field("token"),
                    refresh_token: field("refreshToken"),
                    user_id: field("uid"),
                    display_name: field("name"),
                    email: field("email"),
                    avatar: field("avatar"),
                }
            }
            _ => Self {
                token: scan_string_field(raw, "token"),
                refresh_token: scan_string_field(raw, "refreshToken"),
                user_id: scan_string_field(raw, "uid"),
                display_name: scan_string_field(raw, "name"),
                email: scan_string_field(raw, "email"),
                avatar: scan_string_field(raw, "avatar"),
            },
        };

        if creds.token.is_empty() {
            return Err(CloudError::MissingToken);
        }
        Ok(creds)
    }

    /// Read and parse a credential file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CloudError::Config(format!("cannot read {}: {e}", path.display())))?;
        if raw.trim().is_empty() {
            return Err(CloudError::Config(format!("cannot read {}", path.display())));
        }
        Self::parse(&raw)
    }

    /// Refresh token, falling back to the access token.
    pub fn effective_refresh_token(&self) -> &str {
        if self.refresh_token.is_empty() {
            &self.token
        } else {
            &self.refresh_token
        }
    }
}

/// Read the quoted string that follows `"key"` and a colon.
fn scan_string_field(raw: &str, key: &str) -> String {
    let needle = format!("\"{key}\"");
    let Some(start) = raw.find(&needle) else {
        return String::new();
    };
    let rest = &raw[start + needle.len()..];
    let Some(colon) = rest.find(':') else {
        return String::new();
    };
    let rest = &rest[colon + 1..];
    let Some(open) = rest.find('"') else {
        return String::new();
    };
    let rest = &rest[open + 1..];
    match rest.find('"') {
        Some(close) => rest[..close].to_string(),
        None => String::new(),
    }
}
