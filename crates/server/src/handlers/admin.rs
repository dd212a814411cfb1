//! Admin handlers: counter reconciliation.
//!
//! Mounted only when `server.admin_enabled` is set. There is no
//! authentication layer; expose these routes on a trusted network only.

use crate::engine::ReconcileSummary;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use vigil_core::{SubjectId, VoteCounts};

/// Reconcile response for a single subject.
#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub subject_id: String,
    pub before: VoteCounts,
    pub after: VoteCounts,
    pub drifted: bool,
}

/// POST /v1/admin/subjects/{subject_id}/reconcile
pub async fn reconcile_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> ApiResult<Json<ReconcileResponse>> {
    let subject_id = SubjectId::parse(&subject_id)?;
    let report = state.engine.reconcile_subject(&subject_id).await?;

    Ok(Json(ReconcileResponse {
        subject_id: subject_id.to_string(),
        before: report.before,
        after: report.after,
        drifted: report.drifted(),
    }))
}

/// POST /v1/admin/reconcile - Reconcile every subject.
pub async fn reconcile_all(State(state): State<AppState>) -> ApiResult<Json<ReconcileSummary>> {
    let summary = state.engine.reconcile_all().await?;
    Ok(Json(summary))
}
