use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use parley_store::{
    AccessToken, DocumentStore, MetadataTokenSource, SessionStore, StoreError, TokenCache,
    TokenSource,
};
use parley_types::{SessionState, SessionStatus};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
struct Captured {
    method: Method,
    path: String,
    authorization: String,
    body: Value,
}

type Log = Arc<Mutex<Vec<Captured>>>;

/// Serves a fake document API. Requests carrying `Bearer stale` get a 401,
/// requests for document `boom` get a 500, everything else succeeds.
async fn fake_document_api() -> (String, Log) {
    let log: Log = Arc::default();
    let captured = log.clone();
    let app = Router::new().fallback(
        move |method: Method, uri: Uri, headers: HeaderMap, body: String| {
            let captured = captured.clone();
            async move {
                let authorization = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let path = uri.path().to_string();
                captured.lock().unwrap().push(Captured {
                    method,
                    path: path.clone(),
                    authorization: authorization.clone(),
                    body: serde_json::from_str(&body).unwrap_or(Value::Null),
                });
                if authorization == "Bearer stale" {
                    (StatusCode::UNAUTHORIZED, "token expired".to_string())
                } else if path.ends_with("/boom") {
                    (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded".to_string())
                } else {
                    (StatusCode::OK, "{}".to_string())
                }
            }
        },
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), log)
}

fn active() -> SessionState {
    SessionState::now(Some("CA1".to_string()), None, SessionStatus::Active, 4)
}

#[tokio::test]
async fn patches_typed_fields_with_static_token() {
    let (base, log) = fake_document_api().await;
    let store = DocumentStore::with_static_token(reqwest::Client::new(), "proj", "static-token")
        .with_base_url(base);

    store.set_session_value("CA1", &active(), 3600).await.unwrap();

    let requests = log.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::PATCH);
    assert_eq!(
        request.path,
        "/v1/projects/proj/databases/%28default%29/documents/call_sessions/CA1"
    );
    assert_eq!(request.authorization, "Bearer static-token");
    assert_eq!(request.body["fields"]["status"], json!({"stringValue": "active"}));
    assert_eq!(request.body["fields"]["interactionCount"], json!({"integerValue": "4"}));
    assert_eq!(request.body["fields"]["streamSid"], json!({"nullValue": null}));
}

#[tokio::test]
async fn non_success_status_is_reported_with_body() {
    let (base, _log) = fake_document_api().await;
    let store =
        DocumentStore::with_static_token(reqwest::Client::new(), "proj", "t").with_base_url(base);

    let err = store.set_session_value("boom", &active(), 3600).await.unwrap_err();
    match err {
        StoreError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "backend exploded");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

struct Rotating {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenSource for Rotating {
    async fn fetch(&self) -> Result<AccessToken, StoreError> {
        let value = match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => "stale",
            _ => "fresh",
        };
        Ok(AccessToken::new(value, Duration::from_secs(3600)))
    }
}

#[tokio::test]
async fn rejected_token_is_refreshed_once() {
    let (base, log) = fake_document_api().await;
    let source = Arc::new(Rotating {
        calls: AtomicUsize::new(0),
    });
    let cache = Arc::new(TokenCache::new(source.clone()));
    let store = DocumentStore::with_token_cache(reqwest::Client::new(), "proj", cache)
        .with_base_url(base);

    store.set_session_value("CA1", &active(), 3600).await.unwrap();

    let auths: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .map(|c| c.authorization.clone())
        .collect();
    assert_eq!(auths, vec!["Bearer stale", "Bearer fresh"]);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn metadata_source_reads_token_and_lifetime() {
    let app = Router::new().fallback(|headers: HeaderMap| async move {
        if headers.get("metadata-flavor").and_then(|v| v.to_str().ok()) != Some("Google") {
            return (StatusCode::FORBIDDEN, String::new());
        }
        (
            StatusCode::OK,
            json!({"access_token": "ya29.token", "expires_in": 3599, "token_type": "Bearer"})
                .to_string(),
        )
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let source =
        MetadataTokenSource::with_url(reqwest::Client::new(), format!("http://{addr}/token"));
    let token = source.fetch().await.unwrap();
    assert_eq!(token.value, "ya29.token");
    assert!(token.expires_at > std::time::Instant::now() + Duration::from_secs(3500));
}
