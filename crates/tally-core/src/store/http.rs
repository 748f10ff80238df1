//! Remote store backed by a `tally-relay` server over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{RemoteStore, StoreError, StoreResult};
use crate::models::RecordId;
use crate::sync::{Record, Versioned};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .build()
            .map_err(|error| StoreError::Backend(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            timeout,
            client,
        })
    }

    fn collection_url<T: Record>(&self) -> String {
        format!("{}/v1/records/{}", self.base_url, T::KIND)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Only a connection that never came up counts as the relay being gone;
    /// a slow answer fails just this call.
    fn transport_error(&self, error: reqwest::Error) -> StoreError {
        if error.is_connect() {
            StoreError::Unavailable(error.to_string())
        } else if error.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else if error.is_decode() {
            StoreError::Backend(format!("invalid relay response: {error}"))
        } else {
            StoreError::Backend(error.to_string())
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch_all<T: Record>(&self, parent: Option<&RecordId>) -> StoreResult<Vec<Versioned<T>>> {
        let mut request = self
            .client
            .get(self.collection_url::<T>())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(parent) = parent {
            request = request.query(&[("parent", parent.to_string())]);
        }

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let raw: Vec<Versioned<serde_json::Value>> =
            response.json().await.map_err(|error| self.transport_error(error))?;
        raw.into_iter()
            .map(|record| Versioned::from_raw(record).map_err(StoreError::from))
            .collect()
    }

    async fn upsert<T: Record>(&self, record: &Versioned<T>) -> StoreResult<()> {
        let mut request = self
            .client
            .put(format!("{}/{}", self.collection_url::<T>(), record.id))
            .json(&record.to_raw()?);
        if let Some(parent) = record.parent_id() {
            request = request.query(&[("parent", parent.to_string())]);
        }

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RelayErrorBody {
    error: Option<String>,
    message: Option<String>,
}

async fn api_error(response: reqwest::Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(status, &body);
    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) {
        StoreError::Unavailable(message)
    } else {
        StoreError::Backend(message)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<RelayErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> StoreResult<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| StoreError::Backend("relay url must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(StoreError::Backend(
            "relay url must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    use super::*;
    use crate::config::SyncSettings;
    use crate::models::ReplicaId;
    use crate::store::MemoryStore;
    use crate::sync::{FixedClock, PassOutcome, SyncEngine, SyncError};

    /// Accepts connections and never writes a byte back.
    async fn silent_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("relay.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://relay.example.com/ ".to_string()).unwrap(),
            "https://relay.example.com"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let store = HttpRemoteStore::new(
            "http://localhost:8787",
            Some("secret".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn parse_api_error_prefers_json_message() {
        let message = parse_api_error(StatusCode::UNAUTHORIZED, r#"{"error":"missing token"}"#);
        assert_eq!(message, "missing token (401)");
        assert_eq!(parse_api_error(StatusCode::NOT_FOUND, "  "), "HTTP 404");
    }

    #[test]
    fn collection_url_uses_wire_kind() {
        let store = HttpRemoteStore::new("http://relay", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            store.collection_url::<crate::models::Entry>(),
            "http://relay/v1/records/transactions"
        );
    }

    #[tokio::test]
    async fn unreachable_relay_is_reported_unavailable() {
        let store =
            HttpRemoteStore::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
        let error = store
            .fetch_all::<crate::models::Category>(None)
            .await
            .unwrap_err();
        assert!(error.is_unavailable(), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn silent_relay_times_out_without_being_unavailable() {
        let url = silent_relay().await;
        let store = HttpRemoteStore::new(url, None, Duration::from_millis(300)).unwrap();
        let error = store
            .fetch_all::<crate::models::Category>(None)
            .await
            .unwrap_err();
        assert!(
            matches!(error, StoreError::Timeout(timeout) if timeout == Duration::from_millis(300)),
            "unexpected error: {error}"
        );
    }

    #[tokio::test]
    async fn silent_relay_fails_each_kind_but_completes_the_pass() {
        let url = silent_relay().await;
        let settings = SyncSettings {
            remote_timeout_secs: 1,
            ..SyncSettings::default()
        };
        let remote = HttpRemoteStore::new(url, None, settings.remote_timeout()).unwrap();
        let (_network, receiver) = watch::channel(true);
        let engine = SyncEngine::new(
            MemoryStore::new(),
            remote,
            Arc::new(FixedClock::new(chrono::Utc::now())),
            receiver,
            settings,
            ReplicaId::new("laptop"),
        );

        let report = engine.sync_all().await;

        assert_eq!(report.outcome, PassOutcome::Completed);
        assert_eq!(report.errors.len(), 2, "ledgers and categories: {:?}", report.errors);
        assert!(report
            .errors
            .iter()
            .all(|error| matches!(error, SyncError::RemoteReadFailure { .. })));
    }
}
