//! Command orchestrators.
//!
//! Each operation opens its own session, binds one device, does its work
//! inside bounded waits, and returns an [`Outcome`](crate::report::Outcome).
//! None of them writes to stdout.

pub mod cancel;
pub mod install_cert;
pub mod print;
pub mod send_raw;
pub mod status;
pub mod tasks;

use serde_json::value::RawValue;
use tracing::warn;

use crate::channel::DeviceChannel;
use crate::collector::InboundMessage;

/// Request a full-state push, continuing on failure.
///
/// A failed pushall only delays the device's next report, so operations go
/// on and let their collection window decide.
pub(crate) async fn request_full_state(channel: &DeviceChannel<'_>) {
    if let Err(e) = channel.request_full_state().await {
        warn!("pushall failed, continuing: {e}");
    }
}

/// Payload as embeddable JSON: verbatim when valid, a JSON string otherwise.
pub fn embed_payload(payload: &str) -> Box<RawValue> {
    let trimmed = payload.trim();
    match RawValue::from_string(trimmed.to_string()) {
        Ok(raw) => raw,
        Err(_) => serde_json::value::to_raw_value(trimmed)
            .unwrap_or_else(|_| RawValue::NULL.to_owned()),
    }
}

pub(crate) fn embed_all(messages: &[InboundMessage]) -> Vec<Box<RawValue>> {
    messages.iter().map(|m| embed_payload(&m.payload)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_valid_json_verbatim() {
        assert_eq!(embed_payload(r#"{"a": [1, 2]}"#).get(), r#"{"a": [1, 2]}"#);
        assert_eq!(embed_payload("{\"a\":1}\n").get(), "{\"a\":1}");
    }

    #[test]
    fn test_embed_text_as_string() {
        assert_eq!(embed_payload("not json").get(), "\"not json\"");
        assert_eq!(embed_payload("{\"a\":").get(), "\"{\\\"a\\\":\"");
    }
}
