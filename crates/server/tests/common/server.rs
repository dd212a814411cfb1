//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use vigil_core::SubjectId;
use vigil_core::config::{AppConfig, MetadataConfig, ServerConfig, VoteConfig};
use vigil_metadata::{MetadataStore, SqliteStore};
use vigil_server::{AppState, create_router};

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub(crate) sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with admin routes enabled.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("votes.db");
        let sqlite_store = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            server: ServerConfig {
                admin_enabled: true,
                ..Default::default()
            },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
            votes: VoteConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                ..Default::default()
            },
        };
        modifier(&mut config);

        let metadata: Arc<dyn MetadataStore> = sqlite_store.clone();
        let state = AppState::new(config, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            sqlite_store,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Raw pool for tampering with rows behind the engine's back.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.sqlite_store.pool()
    }

    /// Register a subject directly in the store.
    pub async fn register(&self, subject_id: &str) {
        self.metadata()
            .create_subject(
                &SubjectId::parse(subject_id).expect("valid subject id"),
                OffsetDateTime::now_utc(),
            )
            .await
            .expect("Failed to register subject");
    }

    /// Send a JSON request through the router.
    pub async fn json_request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, json) = self.request_with_headers(method, uri, body, &[]).await;
        (status, json)
    }

    /// Send a request and return the response headers as well.
    pub async fn request_with_headers(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let request = builder.body(body).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        (status, headers, json)
    }
}
