//! Read-only vote queries.
//!
//! Served from the store's read pool, which may be a replica. Results can lag
//! the primary by the replication delay but never expose a partially applied
//! vote.

use crate::error::{ApiError, ApiResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use vigil_core::{MAX_BATCH_SUBJECTS, SubjectId, VoteCounts, VoteOutcome, VoteState, VoterId};
use vigil_metadata::MetadataStore;

pub struct VoteQueryService {
    metadata: Arc<dyn MetadataStore>,
}

impl VoteQueryService {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// A voter's current vote on a subject. No record means `None`.
    pub async fn get_voter_state(
        &self,
        subject_id: &SubjectId,
        voter_id: &VoterId,
    ) -> ApiResult<VoteState> {
        let row = self.metadata.get_vote(subject_id, voter_id).await?;
        match row {
            Some(row) => Ok(VoteState::from(Some(row.direction()?))),
            None => Ok(VoteState::None),
        }
    }

    pub async fn get_counts(&self, subject_id: &SubjectId) -> ApiResult<VoteCounts> {
        self.metadata
            .get_counts(subject_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("subject '{subject_id}'")))
    }

    /// Counters plus the voter's state, as loaded by a vote widget.
    pub async fn get_vote_summary(
        &self,
        subject_id: &SubjectId,
        voter_id: &VoterId,
    ) -> ApiResult<VoteOutcome> {
        let counts = self.get_counts(subject_id).await?;
        let state = self.get_voter_state(subject_id, voter_id).await?;
        Ok(VoteOutcome { state, counts })
    }

    /// A voter's state on each requested subject. Subjects without a vote,
    /// including unregistered ones, map to `None`.
    pub async fn get_voter_states(
        &self,
        voter_id: &VoterId,
        subject_ids: &[SubjectId],
    ) -> ApiResult<BTreeMap<String, VoteState>> {
        if subject_ids.len() > MAX_BATCH_SUBJECTS {
            return Err(ApiError::BadRequest(format!(
                "at most {MAX_BATCH_SUBJECTS} subject ids per request, got {}",
                subject_ids.len()
            )));
        }

        let votes = self
            .metadata
            .get_votes_for_voter(voter_id, subject_ids)
            .await?;

        let mut states = BTreeMap::new();
        for subject_id in subject_ids {
            let state = match votes.get(subject_id.as_str()) {
                Some(row) => VoteState::from(Some(row.direction()?)),
                None => VoteState::None,
            };
            states.insert(subject_id.to_string(), state);
        }
        Ok(states)
    }
}
