//! REST submission store: PostgREST-style `POST /rest/v1/{collection}`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{SubmissionRecord, SubmissionSink};
use crate::error::PersistenceError;

/// Maximum number of response body characters kept in a rejection error.
const MAX_ERROR_BODY: usize = 512;

/// Inserts rows into a hosted table over HTTP.
pub struct RestSink {
    base_url: String,
    api_key: SecretString,
    timeout: Duration,
    client: reqwest::Client,
}

impl RestSink {
    pub fn new(base_url: impl Into<String>, api_key: SecretString, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn table_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{collection}", self.base_url)
    }
}

#[async_trait]
impl SubmissionSink for RestSink {
    async fn insert(
        &self,
        collection: &str,
        record: &SubmissionRecord,
    ) -> Result<(), PersistenceError> {
        if collection.is_empty() || collection.contains(['/', '?', '#']) {
            return Err(PersistenceError::InvalidCollection(collection.to_string()));
        }

        let key = self.api_key.expose_secret();
        let resp = self
            .client
            .post(self.table_url(collection))
            .header("apikey", key)
            .bearer_auth(key)
            .header("Prefer", "return=minimal")
            .timeout(self.timeout)
            .json(record)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PersistenceError::Timeout {
                        timeout: self.timeout,
                    }
                } else {
                    PersistenceError::RequestFailed {
                        collection: collection.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PersistenceError::Rejected {
                collection: collection.to_string(),
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        tracing::debug!(collection = %collection, status = status.as_u16(), "Row inserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(String, Option<String>, serde_json::Value)>>>;

    async fn start_store(status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/rest/v1/{table}",
                post(
                    move |State(seen): State<Seen>,
                          Path(table): Path<String>,
                          headers: HeaderMap,
                          Json(body): Json<serde_json::Value>| async move {
                        let key = headers
                            .get("apikey")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        seen.lock().unwrap().push((table, key, body));
                        (status, "denied")
                    },
                ),
            )
            .with_state(Arc::clone(&seen));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), seen)
    }

    fn record() -> SubmissionRecord {
        let mut r = SubmissionRecord::new();
        r.insert("email_address".into(), Some("a@b.co".into()));
        r.insert("disappointment".into(), None);
        r
    }

    #[tokio::test]
    async fn posts_record_with_key() {
        let (url, seen) = start_store(StatusCode::CREATED).await;
        let sink = RestSink::new(
            url,
            SecretString::from("anon-key".to_string()),
            Duration::from_secs(5),
        );

        sink.insert("signups", &record()).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "signups");
        assert_eq!(seen[0].1.as_deref(), Some("anon-key"));
        assert_eq!(seen[0].2["email_address"], "a@b.co");
        assert!(seen[0].2["disappointment"].is_null());
    }

    #[tokio::test]
    async fn non_success_status_is_rejection() {
        let (url, _seen) = start_store(StatusCode::UNAUTHORIZED).await;
        let sink = RestSink::new(
            url,
            SecretString::from("bad".to_string()),
            Duration::from_secs(5),
        );

        let err = sink.insert("signups", &record()).await.unwrap_err();
        match err {
            PersistenceError::Rejected { status, body, .. } => {
                assert_eq!(status, 401);
                assert_eq!(body, "denied");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_store_is_request_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = RestSink::new(
            format!("http://{addr}"),
            SecretString::from("k".to_string()),
            Duration::from_secs(5),
        );
        let err = sink.insert("signups", &record()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::RequestFailed { .. }));
    }

    #[tokio::test]
    async fn path_like_collection_rejected() {
        let sink = RestSink::new(
            "http://localhost",
            SecretString::from("k".to_string()),
            Duration::from_secs(1),
        );
        let err = sink.insert("../admin", &record()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidCollection(_)));
    }
}
