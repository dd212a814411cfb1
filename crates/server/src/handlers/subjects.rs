//! Subject registry and counter handlers.

use crate::error::ApiResult;
use crate::handlers::common::read_json;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use vigil_core::{SubjectId, VoteCounts};

/// Register subject request.
#[derive(Debug, Deserialize)]
pub struct RegisterSubjectRequest {
    pub subject_id: String,
}

/// A subject's aggregate counters.
#[derive(Debug, Serialize)]
pub struct SubjectCountsResponse {
    pub subject_id: String,
    #[serde(flatten)]
    pub counts: VoteCounts,
}

/// POST /v1/subjects - Register a subject with zeroed counters.
pub async fn register_subject(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<SubjectCountsResponse>)> {
    let body: RegisterSubjectRequest = read_json(req).await?;
    let subject_id = SubjectId::parse(&body.subject_id)?;

    let row = state
        .metadata
        .create_subject(&subject_id, OffsetDateTime::now_utc())
        .await?;

    tracing::info!(subject_id = %subject_id, "Subject registered");

    Ok((
        StatusCode::CREATED,
        Json(SubjectCountsResponse {
            counts: row.counts(),
            subject_id: row.subject_id,
        }),
    ))
}

/// DELETE /v1/subjects/{subject_id} - Remove a subject and all of its votes.
pub async fn remove_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> ApiResult<StatusCode> {
    let subject_id = SubjectId::parse(&subject_id)?;
    let votes_removed = state.metadata.delete_subject(&subject_id).await?;

    tracing::info!(subject_id = %subject_id, votes_removed, "Subject removed");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/subjects/{subject_id}/counts
pub async fn get_counts(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> ApiResult<Json<SubjectCountsResponse>> {
    let subject_id = SubjectId::parse(&subject_id)?;
    let counts = state.queries.get_counts(&subject_id).await?;

    Ok(Json(SubjectCountsResponse {
        subject_id: subject_id.to_string(),
        counts,
    }))
}
