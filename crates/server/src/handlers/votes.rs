//! Vote handlers.

use crate::error::ApiResult;
use crate::handlers::common::read_json;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vigil_core::{SubjectId, VoteDirection, VoteOutcome, VoteState, VoterId};

/// Apply vote request.
#[derive(Debug, Deserialize)]
pub struct ApplyVoteRequest {
    /// `"up"`, `"down"`, or the legacy `1` / `-1`.
    pub direction: VoteDirection,
}

/// Voter state plus subject counters.
#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub subject_id: String,
    pub voter_id: String,
    #[serde(flatten)]
    pub outcome: VoteOutcome,
}

/// Voter state on a single subject.
#[derive(Debug, Serialize)]
pub struct VoterStateResponse {
    pub subject_id: String,
    pub voter_id: String,
    pub state: VoteState,
}

/// Batched voter state request.
#[derive(Debug, Deserialize)]
pub struct VoterStatesRequest {
    pub subject_ids: Vec<String>,
}

/// Batched voter state response, keyed by subject id.
#[derive(Debug, Serialize)]
pub struct VoterStatesResponse {
    pub voter_id: String,
    pub states: BTreeMap<String, VoteState>,
}

fn parse_pair(subject_id: &str, voter_id: &str) -> ApiResult<(SubjectId, VoterId)> {
    Ok((SubjectId::parse(subject_id)?, VoterId::parse(voter_id)?))
}

/// POST /v1/subjects/{subject_id}/votes/{voter_id} - Toggle a vote.
///
/// Submitting the direction the voter already holds retracts the vote.
pub async fn apply_vote(
    State(state): State<AppState>,
    Path((subject_id, voter_id)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<VoteResponse>> {
    let (subject_id, voter_id) = parse_pair(&subject_id, &voter_id)?;
    let body: ApplyVoteRequest = read_json(req).await?;

    let applied = state
        .engine
        .apply_vote(&subject_id, &voter_id, body.direction)
        .await?;

    Ok(Json(VoteResponse {
        subject_id: subject_id.to_string(),
        voter_id: voter_id.to_string(),
        outcome: applied.outcome,
    }))
}

/// GET /v1/subjects/{subject_id}/votes/{voter_id} - Counters and voter state.
pub async fn get_vote_summary(
    State(state): State<AppState>,
    Path((subject_id, voter_id)): Path<(String, String)>,
) -> ApiResult<Json<VoteResponse>> {
    let (subject_id, voter_id) = parse_pair(&subject_id, &voter_id)?;
    let outcome = state
        .queries
        .get_vote_summary(&subject_id, &voter_id)
        .await?;

    Ok(Json(VoteResponse {
        subject_id: subject_id.to_string(),
        voter_id: voter_id.to_string(),
        outcome,
    }))
}

/// GET /v1/subjects/{subject_id}/votes/{voter_id}/state
pub async fn get_voter_state(
    State(state): State<AppState>,
    Path((subject_id, voter_id)): Path<(String, String)>,
) -> ApiResult<Json<VoterStateResponse>> {
    let (subject_id, voter_id) = parse_pair(&subject_id, &voter_id)?;
    let vote_state = state
        .queries
        .get_voter_state(&subject_id, &voter_id)
        .await?;

    Ok(Json(VoterStateResponse {
        subject_id: subject_id.to_string(),
        voter_id: voter_id.to_string(),
        state: vote_state,
    }))
}

/// POST /v1/voters/{voter_id}/states - Voter state across many subjects.
pub async fn get_voter_states(
    State(state): State<AppState>,
    Path(voter_id): Path<String>,
    req: Request,
) -> ApiResult<Json<VoterStatesResponse>> {
    let voter_id = VoterId::parse(&voter_id)?;
    let body: VoterStatesRequest = read_json(req).await?;
    let subject_ids = body
        .subject_ids
        .iter()
        .map(|s| SubjectId::parse(s))
        .collect::<Result<Vec<_>, _>>()?;

    let states = state
        .queries
        .get_voter_states(&voter_id, &subject_ids)
        .await?;

    Ok(Json(VoterStatesResponse {
        voter_id: voter_id.to_string(),
        states,
    }))
}
