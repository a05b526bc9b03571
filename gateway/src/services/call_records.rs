//! Call-record notifications.
//!
//! The bridge reports each call twice: once when media starts flowing and
//! once after teardown. Persisting those records is somebody else's job; the
//! store implementations here either log them or POST them to a webhook.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::bridge::EndReason;
use crate::core::realtime::TranscriptRole;
use crate::utils::url_validation::{UrlValidationError, validate_webhook_url};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallStarted {
    pub call_identifier: String,
    pub stream_identifier: String,
    pub agent_id: String,
    pub workspace_id: Option<String>,
    pub dialect: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEnded {
    pub call_identifier: String,
    pub agent_id: String,
    pub workspace_id: Option<String>,
    pub end_reason: EndReason,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transcript: Vec<TranscriptEntry>,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Record delivery failed: {0}")]
    Delivery(String),

    #[error("Record store rejected the record: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait CallRecordStore: Send + Sync {
    async fn session_started(&self, record: CallStarted) -> Result<(), RecordError>;

    async fn session_ended(&self, record: CallEnded) -> Result<(), RecordError>;
}

/// Writes call records to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingCallRecordStore;

#[async_trait]
impl CallRecordStore for LoggingCallRecordStore {
    async fn session_started(&self, record: CallStarted) -> Result<(), RecordError> {
        tracing::info!(
            call_id = %record.call_identifier,
            stream_id = %record.stream_identifier,
            agent_id = %record.agent_id,
            dialect = %record.dialect,
            "Call started"
        );
        Ok(())
    }

    async fn session_ended(&self, record: CallEnded) -> Result<(), RecordError> {
        tracing::info!(
            call_id = %record.call_identifier,
            agent_id = %record.agent_id,
            end_reason = %record.end_reason,
            duration_ms = record.duration_ms,
            transcript_entries = record.transcript.len(),
            "Call ended"
        );
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum RecordEvent<'a> {
    CallStarted(&'a CallStarted),
    CallEnded(&'a CallEnded),
}

/// POSTs call records as JSON, tagged with `"event": "call_started"` or
/// `"event": "call_ended"`.
#[derive(Debug, Clone)]
pub struct WebhookCallRecordStore {
    url: Url,
    client: reqwest::Client,
}

impl WebhookCallRecordStore {
    pub fn new(url: &str, allow_local: bool) -> Result<Self, UrlValidationError> {
        let url = validate_webhook_url(url, allow_local)?;
        Ok(Self {
            url,
            client: reqwest::Client::new(),
        })
    }

    async fn post(&self, event: RecordEvent<'_>) -> Result<(), RecordError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&event)
            .send()
            .await
            .map_err(|e| RecordError::Delivery(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RecordError::Rejected(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CallRecordStore for WebhookCallRecordStore {
    async fn session_started(&self, record: CallStarted) -> Result<(), RecordError> {
        self.post(RecordEvent::CallStarted(&record)).await
    }

    async fn session_ended(&self, record: CallEnded) -> Result<(), RecordError> {
        self.post(RecordEvent::CallEnded(&record)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ended() -> CallEnded {
        CallEnded {
            call_identifier: "v3:call".to_string(),
            agent_id: "front-desk".to_string(),
            workspace_id: None,
            end_reason: EndReason::AgentHangup,
            duration_ms: 1234,
            transcript: vec![TranscriptEntry {
                role: TranscriptRole::User,
                text: "Hello".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_logging_store_accepts_records() {
        let store = LoggingCallRecordStore;
        assert!(store.session_ended(ended()).await.is_ok());
    }

    #[test]
    fn test_record_event_shape() {
        let record = ended();
        let value = serde_json::to_value(RecordEvent::CallEnded(&record)).unwrap();
        assert_eq!(value["event"], "call_ended");
        assert_eq!(value["end_reason"], "agent_hangup");
        assert_eq!(value["transcript"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_webhook_store_posts_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "event": "call_ended",
                "call_identifier": "v3:call",
                "duration_ms": 1234
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = WebhookCallRecordStore::new(&server.uri(), true).unwrap();
        store.session_ended(ended()).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_store_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = WebhookCallRecordStore::new(&server.uri(), true).unwrap();
        assert!(matches!(
            store.session_ended(ended()).await,
            Err(RecordError::Rejected(_))
        ));
    }
}
