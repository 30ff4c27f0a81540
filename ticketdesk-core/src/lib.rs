use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Push messages are small JSON envelopes; anything bigger is noise or abuse.
pub const MAX_PUSH_MESSAGE_BYTES: usize = 64 * 1024;

/// Wait applied when a rate-limit response carries no usable retry hint.
///
/// A UI-convenience fallback, not a backend contract; trackers can
/// override it per instance.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(60);

pub type UserId = String;
pub type EndpointKey = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Join {
    pub user_id: UserId,
}

/// Messages the client sends on the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Join(Join),
}

/// Messages the backend delivers on the push channel.
///
/// Notification payloads are backend-defined; this layer passes them
/// through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Notification(serde_json::Value),
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("join user id must not be empty")]
    EmptyUserId,
    #[error("push message exceeds {MAX_PUSH_MESSAGE_BYTES} bytes")]
    MessageTooLarge,
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub fn encode_client_message(message: &ClientMessage) -> Result<String, CoreError> {
    match message {
        ClientMessage::Join(join) if join.user_id.trim().is_empty() => {
            return Err(CoreError::EmptyUserId);
        }
        ClientMessage::Join(_) => {}
    }
    serde_json::to_string(message).map_err(|err| CoreError::Serialization(err.to_string()))
}

pub fn decode_server_message(text: &str) -> Result<ServerMessage, CoreError> {
    if text.len() > MAX_PUSH_MESSAGE_BYTES {
        return Err(CoreError::MessageTooLarge);
    }
    serde_json::from_str(text).map_err(|err| CoreError::Serialization(err.to_string()))
}

/// Retry hint as backends actually send it: seconds as a JSON number, a
/// numeric string (`Retry-After` header style), or a window description
/// like `"15 minutes"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RetryAfterHint {
    Seconds(u64),
    Text(String),
}

/// Body of a too-many-requests error response.
///
/// Field presence varies per endpoint, so every field is optional and
/// every accessor degrades to a usable value instead of failing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RateLimitPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Requests allowed inside the window, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<RetryAfterHint>,
    #[serde(default, rename = "retryAfterMs", skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl RateLimitPayload {
    /// Wait duration derived from whatever hint the backend supplied,
    /// normalized to a `Duration`. Absent, zero, or unparseable hints
    /// fall back to [`DEFAULT_RETRY_WAIT`].
    pub fn retry_wait(&self) -> Duration {
        self.retry_wait_or(DEFAULT_RETRY_WAIT)
    }

    pub fn retry_wait_or(&self, default: Duration) -> Duration {
        if let Some(ms) = self.retry_after_ms
            && ms > 0
        {
            return Duration::from_millis(ms);
        }
        match &self.retry_after {
            Some(RetryAfterHint::Seconds(seconds)) if *seconds > 0 => {
                Duration::from_secs(*seconds)
            }
            Some(RetryAfterHint::Text(text)) => match text.trim().parse::<u64>() {
                Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
                _ => default,
            },
            _ => default,
        }
    }

    /// Display string for an error banner or dialog. Uses the limit and
    /// window when both are present, the backend message otherwise.
    pub fn friendly_message(&self) -> String {
        if let (Some(limit), Some(window)) = (self.limit, self.window_text()) {
            return format!(
                "Too many requests: the limit is {limit} requests per {window}. Please wait before trying again."
            );
        }
        if let Some(message) = non_empty(self.message.as_deref()).or(non_empty(self.error.as_deref()))
        {
            return message.to_owned();
        }
        "Too many requests. Please wait a moment and try again.".to_owned()
    }

    fn window_text(&self) -> Option<String> {
        match &self.retry_after {
            Some(RetryAfterHint::Seconds(seconds)) => Some(format!("{seconds}s")),
            Some(RetryAfterHint::Text(text)) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else if let Ok(seconds) = trimmed.parse::<u64>() {
                    Some(format!("{seconds}s"))
                } else {
                    Some(trimmed.to_owned())
                }
            }
            None => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_roundtrip() {
        let message = ClientMessage::Join(Join {
            user_id: "user-42".to_owned(),
        });
        let text = encode_client_message(&message).unwrap();
        assert!(text.contains("\"join\""));

        let decoded: ClientMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn empty_user_id_is_rejected() {
        let message = ClientMessage::Join(Join {
            user_id: "   ".to_owned(),
        });
        assert!(matches!(
            encode_client_message(&message),
            Err(CoreError::EmptyUserId)
        ));
    }

    #[test]
    fn notification_payload_passes_through_untouched() {
        let text = r#"{"type":"notification","data":{"ticket_id":42,"title":"Printer on fire"}}"#;
        match decode_server_message(text).unwrap() {
            ServerMessage::Notification(payload) => {
                assert_eq!(payload["ticket_id"], 42);
                assert_eq!(payload["title"], "Printer on fire");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn oversized_message_is_rejected() {
        let text = format!(
            r#"{{"type":"notification","data":"{}"}}"#,
            "x".repeat(MAX_PUSH_MESSAGE_BYTES)
        );
        assert!(matches!(
            decode_server_message(&text),
            Err(CoreError::MessageTooLarge)
        ));
    }

    #[test]
    fn retry_wait_normalizes_seconds_string() {
        let payload: RateLimitPayload = serde_json::from_str(r#"{"retryAfter":"30"}"#).unwrap();
        assert_eq!(payload.retry_wait(), Duration::from_secs(30));
    }

    #[test]
    fn retry_wait_normalizes_seconds_number() {
        let payload: RateLimitPayload = serde_json::from_str(r#"{"retryAfter":15}"#).unwrap();
        assert_eq!(payload.retry_wait(), Duration::from_secs(15));
    }

    #[test]
    fn explicit_milliseconds_take_precedence() {
        let payload: RateLimitPayload =
            serde_json::from_str(r#"{"retryAfter":"30","retryAfterMs":1500}"#).unwrap();
        assert_eq!(payload.retry_wait(), Duration::from_millis(1500));
    }

    #[test]
    fn missing_hint_falls_back_to_default() {
        let payload: RateLimitPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(payload.retry_wait(), DEFAULT_RETRY_WAIT);
        assert!(!payload.retry_wait().is_zero());
    }

    #[test]
    fn garbage_hint_falls_back_to_default() {
        let payload: RateLimitPayload =
            serde_json::from_str(r#"{"retryAfter":"soonish","retryAfterMs":0}"#).unwrap();
        assert_eq!(payload.retry_wait(), DEFAULT_RETRY_WAIT);
    }

    #[test]
    fn friendly_message_prefers_limit_and_window() {
        let payload: RateLimitPayload =
            serde_json::from_str(r#"{"limit":5,"retryAfter":"15 minutes"}"#).unwrap();
        let message = payload.friendly_message();
        assert!(message.contains("5 requests per 15 minutes"), "{message}");
    }

    #[test]
    fn friendly_message_falls_back_to_backend_text_then_generic() {
        let payload: RateLimitPayload =
            serde_json::from_str(r#"{"error":"Too many login attempts"}"#).unwrap();
        assert_eq!(payload.friendly_message(), "Too many login attempts");

        let empty = RateLimitPayload::default();
        assert!(empty.friendly_message().contains("Too many requests"));
    }
}
