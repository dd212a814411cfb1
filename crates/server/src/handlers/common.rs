//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::extract::Request;
use serde::de::DeserializeOwned;

/// Request bodies are small JSON documents; anything larger is rejected.
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Read and decode a JSON request body.
///
/// Malformed bodies, including unknown vote directions, are reported as
/// `invalid_input` rather than axum's default 422.
pub async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}
