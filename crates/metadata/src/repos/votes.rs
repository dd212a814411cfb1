//! Vote ledger repository.

use crate::error::{MetadataError, MetadataResult};
use crate::models::VoteRow;
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use vigil_core::{
    SubjectId, Transition, VoteCounts, VoteDirection, VoteOutcome, VoteState, VoterId,
};

/// Result of one committed vote transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedVote {
    /// The transition that was applied.
    pub transition: Transition,
    /// Voter state and subject counters as of the commit.
    pub outcome: VoteOutcome,
}

/// Outcome of recomputing a subject's counters from its vote records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Counters before the repair.
    pub before: VoteCounts,
    /// Counters after the repair (equal to the ledger tally).
    pub after: VoteCounts,
}

impl ReconcileReport {
    /// Whether the counters had drifted from the ledger.
    pub fn drifted(&self) -> bool {
        self.before != self.after
    }
}

/// Repository for vote records and the counter deltas they drive.
#[async_trait]
pub trait VoteRepo: Send + Sync {
    /// Get a voter's current vote on a subject.
    async fn get_vote(
        &self,
        subject_id: &SubjectId,
        voter_id: &VoterId,
    ) -> MetadataResult<Option<VoteRow>>;

    /// Get a voter's votes on several subjects in a single query.
    ///
    /// Subjects the voter has not voted on (or that do not exist) are simply
    /// absent from the result, which is keyed by subject id.
    async fn get_votes_for_voter(
        &self,
        voter_id: &VoterId,
        subject_ids: &[SubjectId],
    ) -> MetadataResult<HashMap<String, VoteRow>>;

    /// Get a subject's aggregate counters, or `None` if the subject is not
    /// registered.
    async fn get_counts(&self, subject_id: &SubjectId) -> MetadataResult<Option<VoteCounts>>;

    /// Apply a vote toggle atomically.
    ///
    /// In a single transaction: verify the subject exists, read the voter's
    /// prior vote (locking it where the backend supports row locks), write the
    /// vote record conditionally on that prior value, and adjust the counters
    /// by the transition's relative delta.
    ///
    /// # Errors
    /// * `NotFound` if the subject is not registered. Nothing is written.
    /// * `Conflict` if a concurrent transition on the same (subject, voter)
    ///   pair was detected. The transaction is rolled back and the caller may
    ///   retry from a fresh read.
    async fn apply_vote(
        &self,
        subject_id: &SubjectId,
        voter_id: &VoterId,
        requested: VoteDirection,
        now: OffsetDateTime,
    ) -> MetadataResult<AppliedVote>;

    /// Count the vote records for a subject, by direction.
    async fn tally_votes(&self, subject_id: &SubjectId) -> MetadataResult<VoteCounts>;

    /// Overwrite a subject's counters with the ledger tally.
    ///
    /// Holds the counter row for the duration of the transaction so that
    /// concurrent vote deltas land after the repair.
    async fn reconcile_counts(
        &self,
        subject_id: &SubjectId,
        now: OffsetDateTime,
    ) -> MetadataResult<ReconcileReport>;
}

/// Decode the prior vote value read inside a vote transaction.
pub(crate) fn prior_state(
    value: Option<i16>,
    subject_id: &SubjectId,
    voter_id: &VoterId,
) -> MetadataResult<VoteState> {
    match value {
        None => Ok(VoteState::None),
        Some(v) => VoteDirection::from_value(i64::from(v))
            .map(|d| VoteState::from(Some(d)))
            .map_err(|e| {
                MetadataError::Internal(format!(
                    "corrupt vote for subject '{subject_id}' voter '{voter_id}': {e}"
                ))
            }),
    }
}

/// Build the committed result from the counters returned by the delta update.
pub(crate) fn applied_vote(
    transition: Transition,
    upvotes: i64,
    downvotes: i64,
) -> MetadataResult<AppliedVote> {
    let counts = counts_from_columns(upvotes, downvotes)?;
    Ok(AppliedVote {
        transition,
        outcome: VoteOutcome {
            state: transition.next,
            counts,
        },
    })
}

/// Convert counter columns, rejecting negative values.
pub(crate) fn counts_from_columns(upvotes: i64, downvotes: i64) -> MetadataResult<VoteCounts> {
    match (u64::try_from(upvotes), u64::try_from(downvotes)) {
        (Ok(up), Ok(down)) => Ok(VoteCounts::new(up, down)),
        _ => Err(MetadataError::Constraint(format!(
            "negative counters ({upvotes}, {downvotes})"
        ))),
    }
}
