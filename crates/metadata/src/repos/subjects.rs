//! Subject registry repository.
//!
//! A subject row carries the aggregate counters. Its presence is what the
//! vote engine checks to decide whether a subject exists.

use crate::error::MetadataResult;
use crate::models::SubjectRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use vigil_core::SubjectId;

/// Repository for subject registration and counter rows.
#[async_trait]
pub trait SubjectRepo: Send + Sync {
    /// Register a subject with zero-initialized counters.
    ///
    /// Fails with `AlreadyExists` if the subject is already registered.
    async fn create_subject(
        &self,
        subject_id: &SubjectId,
        now: OffsetDateTime,
    ) -> MetadataResult<SubjectRow>;

    /// Get a subject and its counters.
    async fn get_subject(&self, subject_id: &SubjectId) -> MetadataResult<Option<SubjectRow>>;

    /// Check if a subject is registered.
    async fn subject_exists(&self, subject_id: &SubjectId) -> MetadataResult<bool>;

    /// Remove a subject, its counters, and every vote cast on it.
    ///
    /// Returns the number of vote records removed. Fails with `NotFound` if the
    /// subject is not registered.
    async fn delete_subject(&self, subject_id: &SubjectId) -> MetadataResult<u64>;

    /// List subjects ordered by id, starting strictly after `after`.
    async fn list_subjects(
        &self,
        after: Option<&SubjectId>,
        limit: u32,
    ) -> MetadataResult<Vec<SubjectRow>>;
}
