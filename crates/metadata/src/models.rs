//! Database models mapping to the vote ledger schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use time::OffsetDateTime;
use vigil_core::{VoteCounts, VoteDirection};

/// Registered subject with its aggregate counters.
#[derive(Debug, Clone, FromRow)]
pub struct SubjectRow {
    pub subject_id: String,
    pub upvotes: i64,
    pub downvotes: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SubjectRow {
    /// Counters as unsigned values. The schema's CHECK constraints keep the
    /// columns non-negative.
    pub fn counts(&self) -> VoteCounts {
        VoteCounts::new(
            u64::try_from(self.upvotes).unwrap_or(0),
            u64::try_from(self.downvotes).unwrap_or(0),
        )
    }
}

/// One voter's current vote on one subject.
#[derive(Debug, Clone, FromRow)]
pub struct VoteRow {
    pub subject_id: String,
    pub voter_id: String,
    /// `1` for up, `-1` for down.
    pub value: i16,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl VoteRow {
    /// Decode the stored vote value.
    pub fn direction(&self) -> MetadataResult<VoteDirection> {
        VoteDirection::from_value(i64::from(self.value)).map_err(|e| {
            MetadataError::Internal(format!(
                "corrupt vote for subject '{}' voter '{}': {e}",
                self.subject_id, self.voter_id
            ))
        })
    }
}
