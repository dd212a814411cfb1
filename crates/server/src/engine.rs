//! Vote toggle engine: the only writer of aggregate counters.
//!
//! Each vote runs as one store transaction that moves the ledger record and
//! the counters together. Attempts that lose a race with a concurrent write on
//! the same (subject, voter) pair are rolled back by the store and retried here
//! with bounded exponential backoff.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use vigil_core::config::VoteConfig;
use vigil_core::{SubjectId, VoteDirection, VoterId};
use vigil_metadata::{AppliedVote, MetadataError, MetadataStore, ReconcileReport};

/// Page size used when sweeping all subjects.
const RECONCILE_PAGE_SIZE: u32 = 500;

/// Totals from a full reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub subjects_checked: u64,
    pub subjects_repaired: u64,
}

pub struct VoteToggleEngine {
    metadata: Arc<dyn MetadataStore>,
    config: VoteConfig,
}

impl VoteToggleEngine {
    pub fn new(metadata: Arc<dyn MetadataStore>, config: VoteConfig) -> Self {
        Self { metadata, config }
    }

    /// Toggle `voter_id`'s vote on `subject_id` in the requested direction.
    ///
    /// Returns the voter's new state together with the subject's counters as
    /// committed by the same transaction.
    pub async fn apply_vote(
        &self,
        subject_id: &SubjectId,
        voter_id: &VoterId,
        requested: VoteDirection,
    ) -> ApiResult<AppliedVote> {
        let _timer = metrics::VOTE_APPLY_DURATION.start_timer();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = self
                .metadata
                .apply_vote(subject_id, voter_id, requested, OffsetDateTime::now_utc())
                .await;

            match result {
                Ok(applied) => {
                    metrics::record_vote_applied(applied.transition.label());
                    tracing::debug!(
                        subject_id = %subject_id,
                        voter_id = %voter_id,
                        transition = applied.transition.label(),
                        upvotes = applied.outcome.counts.upvotes,
                        downvotes = applied.outcome.counts.downvotes,
                        attempt,
                        "Vote applied"
                    );
                    return Ok(applied);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    metrics::VOTE_CONFLICTS.inc();
                    let backoff = self.config.backoff_for(attempt);
                    tracing::debug!(
                        subject_id = %subject_id,
                        voter_id = %voter_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Vote conflicted with a concurrent write, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        metrics::VOTE_CONFLICTS.inc();
                        metrics::VOTE_CONFLICTS_EXHAUSTED.inc();
                        tracing::warn!(
                            subject_id = %subject_id,
                            voter_id = %voter_id,
                            attempts = attempt,
                            error = %e,
                            "Vote conflict persisted after all retry attempts"
                        );
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Recompute one subject's counters from its vote records.
    pub async fn reconcile_subject(&self, subject_id: &SubjectId) -> ApiResult<ReconcileReport> {
        let report = self
            .metadata
            .reconcile_counts(subject_id, OffsetDateTime::now_utc())
            .await?;

        metrics::COUNTER_RECONCILIATIONS.inc();
        if report.drifted() {
            metrics::COUNTER_DRIFT_REPAIRED.inc();
            tracing::warn!(
                subject_id = %subject_id,
                before_upvotes = report.before.upvotes,
                before_downvotes = report.before.downvotes,
                upvotes = report.after.upvotes,
                downvotes = report.after.downvotes,
                "Repaired drifted vote counters"
            );
        }

        Ok(report)
    }

    /// Reconcile every registered subject, one page at a time.
    pub async fn reconcile_all(&self) -> ApiResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let mut after: Option<SubjectId> = None;

        loop {
            let page = self
                .metadata
                .list_subjects(after.as_ref(), RECONCILE_PAGE_SIZE)
                .await?;
            let page_len = page.len();

            for row in page {
                let subject_id = SubjectId::parse(&row.subject_id).map_err(|e| {
                    ApiError::Internal(format!("stored subject '{}': {e}", row.subject_id))
                })?;
                match self.reconcile_subject(&subject_id).await {
                    Ok(report) => {
                        summary.subjects_checked += 1;
                        if report.drifted() {
                            summary.subjects_repaired += 1;
                        }
                    }
                    // Removed between listing and repair.
                    Err(ApiError::Metadata(MetadataError::NotFound(_))) => {}
                    Err(e) => return Err(e),
                }
                after = Some(subject_id);
            }

            if page_len < RECONCILE_PAGE_SIZE as usize {
                break;
            }
        }

        tracing::info!(
            subjects_checked = summary.subjects_checked,
            subjects_repaired = summary.subjects_repaired,
            "Counter reconciliation sweep finished"
        );
        Ok(summary)
    }
}
