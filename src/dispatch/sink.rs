//! Notification Sink — narrow interface to the messaging provider
//!
//! The dispatcher only ever sees this trait; the production implementation
//! wraps the Twilio WhatsApp REST API, and [`RecordingSink`] is an
//! in-memory double for simulation and tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

/// Typed sink failures. Only `RateLimited` and `Transient` are retryable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("authentication rejected by provider")]
    Auth,
    #[error("rate limited by provider")]
    RateLimited,
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("transient provider failure: {0}")]
    Transient(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::RateLimited | SinkError::Transient(_))
    }
}

/// A formatted message bound for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Sanitized recipient phone (leading `+`, digits only)
    pub to_phone: String,
    pub body: String,
}

/// Provider acknowledgment of an accepted message.
#[derive(Debug, Clone)]
pub struct SinkReceipt {
    /// Provider message id (e.g. a Twilio SID)
    pub id: String,
    /// Provider-reported initial status ("queued", "sent", ...)
    pub status: String,
}

/// Narrow messaging-provider interface.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn send(&self, message: &OutboundMessage) -> Result<SinkReceipt, SinkError>;

    /// Human-readable name for logging.
    fn sink_name(&self) -> &str;
}

/// Strip everything but a leading `+` and digits from a phone number.
///
/// Mirrors the number-cleaning rule the contact entry UI applies, so both
/// ends agree on the canonical form used for delivery records.
pub fn sanitize_phone(phone: &str) -> String {
    // Static pattern, compiled once.
    static PHONE_JUNK: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PHONE_JUNK
        .get_or_init(|| regex::Regex::new(r"[^+\d]").expect("static phone pattern compiles"));
    let cleaned = re.replace_all(phone, "");
    if cleaned.starts_with('+') {
        cleaned.into_owned()
    } else {
        format!("+{cleaned}")
    }
}

// ============================================================================
// Twilio WhatsApp Sink
// ============================================================================

/// Twilio error payload (subset).
#[derive(Debug, Deserialize)]
struct TwilioError {
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    message: Option<String>,
}

/// Twilio success payload (subset).
#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
    status: String,
}

/// Twilio "to number is not a valid phone number" error code.
const TWILIO_INVALID_TO: u32 = 21211;
/// Twilio "to number is not WhatsApp-enabled" error code.
const TWILIO_NOT_WHATSAPP: u32 = 63003;

/// Sends WhatsApp messages through the Twilio REST API.
pub struct TwilioWhatsAppSink {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_whatsapp: String,
}

impl TwilioWhatsAppSink {
    /// Build a sink from explicit credentials.
    ///
    /// The HTTP client carries no timeout of its own — the dispatcher
    /// bounds every attempt, and a second layer here would race it.
    pub fn new(
        api_base: &str,
        account_sid: &str,
        auth_token: &str,
        from_whatsapp: &str,
    ) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SinkError::Transient(e.to_string()))?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_whatsapp: sanitize_phone(from_whatsapp),
        })
    }

    /// Build from `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN` environment
    /// variables and the configured sender number. Returns `None` when
    /// credentials are absent so callers can fall back to a logging sink.
    pub fn from_env(api_base: &str, from_whatsapp: &str) -> Option<Self> {
        let sid = std::env::var("TWILIO_ACCOUNT_SID").ok()?;
        let token = std::env::var("TWILIO_AUTH_TOKEN").ok()?;
        if sid.is_empty() || token.is_empty() || from_whatsapp.is_empty() {
            return None;
        }
        Self::new(api_base, &sid, &token, from_whatsapp).ok()
    }
}

#[async_trait]
impl NotificationSink for TwilioWhatsAppSink {
    async fn send(&self, message: &OutboundMessage) -> Result<SinkReceipt, SinkError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        );
        let params = [
            ("To", format!("whatsapp:{}", message.to_phone)),
            ("From", format!("whatsapp:{}", self.from_whatsapp)),
            ("Body", message.body.clone()),
        ];

        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| SinkError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let parsed: TwilioMessage = resp
                .json()
                .await
                .map_err(|e| SinkError::Transient(e.to_string()))?;
            return Ok(SinkReceipt {
                id: parsed.sid,
                status: parsed.status,
            });
        }

        match status.as_u16() {
            401 | 403 => Err(SinkError::Auth),
            429 => Err(SinkError::RateLimited),
            400 | 404 => {
                let err: TwilioError = resp.json().await.unwrap_or(TwilioError {
                    code: None,
                    message: None,
                });
                match err.code {
                    Some(TWILIO_INVALID_TO) | Some(TWILIO_NOT_WHATSAPP) => {
                        Err(SinkError::InvalidRecipient(message.to_phone.clone()))
                    }
                    _ => Err(SinkError::Transient(
                        err.message.unwrap_or_else(|| format!("HTTP {status}")),
                    )),
                }
            }
            _ => Err(SinkError::Transient(format!("HTTP {status}"))),
        }
    }

    fn sink_name(&self) -> &str {
        "twilio-whatsapp"
    }
}

// ============================================================================
// Log Sink (no credentials configured)
// ============================================================================

/// Fallback sink that only logs. Used when provider credentials are not
/// configured so the pipeline stays exercisable in development; every
/// "send" succeeds with a synthetic receipt.
#[derive(Default)]
pub struct LogSink {
    counter: std::sync::atomic::AtomicU64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, message: &OutboundMessage) -> Result<SinkReceipt, SinkError> {
        tracing::info!(
            to = %message.to_phone,
            body = %message.body.lines().next().unwrap_or(""),
            "[LogSink] Would send notification"
        );
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(SinkReceipt {
            id: format!("LOG{n:08}"),
            status: "logged".to_string(),
        })
    }

    fn sink_name(&self) -> &str {
        "log"
    }
}

// ============================================================================
// Recording Sink (simulation / tests)
// ============================================================================

/// In-memory sink that records every message and replays a scripted
/// sequence of outcomes. With an empty script every send succeeds.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundMessage>>,
    script: Mutex<std::collections::VecDeque<Result<SinkReceipt, SinkError>>>,
    counter: std::sync::atomic::AtomicU64,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes to return, in order, before defaulting to success.
    pub fn script(&self, outcomes: Vec<Result<SinkReceipt, SinkError>>) {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
    }

    /// Messages accepted by the sink (failed attempts are not recorded).
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, message: &OutboundMessage) -> Result<SinkReceipt, SinkError> {
        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match scripted {
            Some(Err(e)) => Err(e),
            Some(Ok(receipt)) => {
                if let Ok(mut sent) = self.sent.lock() {
                    sent.push(message.clone());
                }
                Ok(receipt)
            }
            None => {
                if let Ok(mut sent) = self.sent.lock() {
                    sent.push(message.clone());
                }
                let n = self
                    .counter
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(SinkReceipt {
                    id: format!("SIM{n:08}"),
                    status: "queued".to_string(),
                })
            }
        }
    }

    fn sink_name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_phone_strips_junk() {
        assert_eq!(sanitize_phone("+91-6369 739(598)"), "+916369739598");
        assert_eq!(sanitize_phone("15550001111"), "+15550001111");
        assert_eq!(sanitize_phone("+1 555 000 1111"), "+15550001111");
    }

    #[test]
    fn test_retryability() {
        assert!(SinkError::RateLimited.is_retryable());
        assert!(SinkError::Transient("boom".to_string()).is_retryable());
        assert!(!SinkError::Auth.is_retryable());
        assert!(!SinkError::InvalidRecipient("+1".to_string()).is_retryable());
    }

    #[tokio::test]
    async fn test_recording_sink_scripted_then_default() {
        let sink = RecordingSink::new();
        sink.script(vec![Err(SinkError::Transient("down".to_string()))]);

        let msg = OutboundMessage {
            to_phone: "+15550001111".to_string(),
            body: "hi".to_string(),
        };
        assert!(sink.send(&msg).await.is_err());
        assert_eq!(sink.sent_count(), 0);

        let receipt = sink.send(&msg).await.expect("default success");
        assert!(receipt.id.starts_with("SIM"));
        assert_eq!(sink.sent_count(), 1);
    }
}
