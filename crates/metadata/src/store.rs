//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{SubjectRepo, VoteRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: SubjectRepo + VoteRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits a single writer; one connection serializes every
            // vote transaction instead of failing them with SQLITE_BUSY.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::warn!(
            path = %path.display(),
            query_timeout_secs,
            "SQLite metadata store serializes all writes through one connection. \
             Use PostgreSQL for replicated or high-traffic deployments. \
             The query timeout is advisory only."
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Start a transaction that holds the database write lock from its first
    /// statement.
    ///
    /// A deferred `BEGIN` that reads before writing cannot wait out another
    /// process's writer: its lock upgrade fails with SQLITE_BUSY at once.
    /// `BEGIN IMMEDIATE` waits on the busy timeout instead.
    async fn begin_immediate(&self) -> MetadataResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::error::classify_vote_error;
    use crate::models::{SubjectRow, VoteRow};
    use crate::repos::votes::{applied_vote, counts_from_columns, prior_state};
    use crate::repos::{AppliedVote, ReconcileReport};
    use std::collections::HashMap;
    use time::OffsetDateTime;
    use vigil_core::{LedgerOp, SubjectId, VoteCounts, VoteDirection, VoterId};

    #[async_trait]
    impl SubjectRepo for SqliteStore {
        async fn create_subject(
            &self,
            subject_id: &SubjectId,
            now: OffsetDateTime,
        ) -> MetadataResult<SubjectRow> {
            let inserted = sqlx::query(
                r#"
                INSERT INTO vote_subjects (subject_id, upvotes, downvotes, created_at, updated_at)
                VALUES (?, 0, 0, ?, ?)
                ON CONFLICT (subject_id) DO NOTHING
                "#,
            )
            .bind(subject_id.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 0 {
                return Err(MetadataError::AlreadyExists(format!(
                    "subject '{subject_id}'"
                )));
            }

            Ok(SubjectRow {
                subject_id: subject_id.to_string(),
                upvotes: 0,
                downvotes: 0,
                created_at: now,
                updated_at: now,
            })
        }

        async fn get_subject(&self, subject_id: &SubjectId) -> MetadataResult<Option<SubjectRow>> {
            let row = sqlx::query_as::<_, SubjectRow>(
                "SELECT * FROM vote_subjects WHERE subject_id = ?",
            )
            .bind(subject_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn subject_exists(&self, subject_id: &SubjectId) -> MetadataResult<bool> {
            let row: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM vote_subjects WHERE subject_id = ?")
                    .bind(subject_id.as_str())
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.is_some())
        }

        async fn delete_subject(&self, subject_id: &SubjectId) -> MetadataResult<u64> {
            let mut tx = self.begin_immediate().await?;

            let votes = sqlx::query("DELETE FROM votes WHERE subject_id = ?")
                .bind(subject_id.as_str())
                .execute(&mut *tx)
                .await?;

            let subject = sqlx::query("DELETE FROM vote_subjects WHERE subject_id = ?")
                .bind(subject_id.as_str())
                .execute(&mut *tx)
                .await?;

            if subject.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(MetadataError::NotFound(format!("subject '{subject_id}'")));
            }

            tx.commit().await?;
            Ok(votes.rows_affected())
        }

        async fn list_subjects(
            &self,
            after: Option<&SubjectId>,
            limit: u32,
        ) -> MetadataResult<Vec<SubjectRow>> {
            let rows = match after {
                Some(after) => {
                    sqlx::query_as::<_, SubjectRow>(
                        "SELECT * FROM vote_subjects WHERE subject_id > ? ORDER BY subject_id LIMIT ?",
                    )
                    .bind(after.as_str())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, SubjectRow>(
                        "SELECT * FROM vote_subjects ORDER BY subject_id LIMIT ?",
                    )
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(rows)
        }
    }

    #[async_trait]
    impl VoteRepo for SqliteStore {
        async fn get_vote(
            &self,
            subject_id: &SubjectId,
            voter_id: &VoterId,
        ) -> MetadataResult<Option<VoteRow>> {
            let row = sqlx::query_as::<_, VoteRow>(
                "SELECT * FROM votes WHERE subject_id = ? AND voter_id = ?",
            )
            .bind(subject_id.as_str())
            .bind(voter_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_votes_for_voter(
            &self,
            voter_id: &VoterId,
            subject_ids: &[SubjectId],
        ) -> MetadataResult<HashMap<String, VoteRow>> {
            if subject_ids.is_empty() {
                return Ok(HashMap::new());
            }

            // SQLite has a limit of ~999 parameters, so we batch if needed
            const BATCH_SIZE: usize = 900;
            let mut result = HashMap::with_capacity(subject_ids.len());

            for batch in subject_ids.chunks(BATCH_SIZE) {
                let placeholders: Vec<&str> = batch.iter().map(|_| "?").collect();
                let query = format!(
                    "SELECT * FROM votes WHERE voter_id = ? AND subject_id IN ({})",
                    placeholders.join(", ")
                );

                let mut query_builder = sqlx::query_as::<_, VoteRow>(&query);
                query_builder = query_builder.bind(voter_id.as_str());
                for subject_id in batch {
                    query_builder = query_builder.bind(subject_id.as_str());
                }

                let rows: Vec<VoteRow> = query_builder.fetch_all(&self.pool).await?;
                for row in rows {
                    result.insert(row.subject_id.clone(), row);
                }
            }

            Ok(result)
        }

        async fn get_counts(&self, subject_id: &SubjectId) -> MetadataResult<Option<VoteCounts>> {
            let row: Option<(i64, i64)> = sqlx::query_as(
                "SELECT upvotes, downvotes FROM vote_subjects WHERE subject_id = ?",
            )
            .bind(subject_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

            row.map(|(up, down)| counts_from_columns(up, down))
                .transpose()
        }

        async fn apply_vote(
            &self,
            subject_id: &SubjectId,
            voter_id: &VoterId,
            requested: VoteDirection,
            now: OffsetDateTime,
        ) -> MetadataResult<AppliedVote> {
            let subject = subject_id.as_str();
            let voter = voter_id.as_str();

            // Exclusive against every other writer, in this process or another,
            // for the whole transaction.
            let mut tx = self.begin_immediate().await?;

            let exists: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM vote_subjects WHERE subject_id = ?")
                    .bind(subject)
                    .fetch_optional(&mut *tx)
                    .await?;
            if exists.is_none() {
                tx.rollback().await?;
                return Err(MetadataError::NotFound(format!("subject '{subject}'")));
            }

            let prior: Option<i16> = sqlx::query_scalar(
                "SELECT value FROM votes WHERE subject_id = ? AND voter_id = ?",
            )
            .bind(subject)
            .bind(voter)
            .fetch_optional(&mut *tx)
            .await?;

            let transition = prior_state(prior, subject_id, voter_id)?.transition(requested);

            // Every ledger write is conditional on the prior value we read, so
            // a concurrent transition on the same pair shows up as zero rows.
            let written = match (transition.op, transition.prior.direction()) {
                (LedgerOp::Insert, _) => {
                    sqlx::query(
                        r#"
                        INSERT INTO votes (subject_id, voter_id, value, created_at, updated_at)
                        VALUES (?, ?, ?, ?, ?)
                        ON CONFLICT (subject_id, voter_id) DO NOTHING
                        "#,
                    )
                    .bind(subject)
                    .bind(voter)
                    .bind(requested.value())
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                }
                (LedgerOp::Update, Some(prior)) => {
                    sqlx::query(
                        "UPDATE votes SET value = ?, updated_at = ? WHERE subject_id = ? AND voter_id = ? AND value = ?",
                    )
                    .bind(requested.value())
                    .bind(now)
                    .bind(subject)
                    .bind(voter)
                    .bind(prior.value())
                    .execute(&mut *tx)
                    .await
                }
                (LedgerOp::Delete, Some(prior)) => {
                    sqlx::query(
                        "DELETE FROM votes WHERE subject_id = ? AND voter_id = ? AND value = ?",
                    )
                    .bind(subject)
                    .bind(voter)
                    .bind(prior.value())
                    .execute(&mut *tx)
                    .await
                }
                (op, None) => {
                    return Err(MetadataError::Internal(format!(
                        "{op:?} transition without a prior vote"
                    )));
                }
            }
            .map_err(|e| classify_vote_error(e, subject))?;

            if written.rows_affected() != 1 {
                tx.rollback().await?;
                return Err(MetadataError::Conflict(format!(
                    "vote by '{voter}' on subject '{subject}' changed concurrently"
                )));
            }

            let counters: Option<(i64, i64)> = sqlx::query_as(
                r#"
                UPDATE vote_subjects
                SET upvotes = upvotes + ?, downvotes = downvotes + ?, updated_at = ?
                WHERE subject_id = ?
                RETURNING upvotes, downvotes
                "#,
            )
            .bind(transition.up_delta)
            .bind(transition.down_delta)
            .bind(now)
            .bind(subject)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| classify_vote_error(e, subject))?;

            let Some((upvotes, downvotes)) = counters else {
                tx.rollback().await?;
                return Err(MetadataError::NotFound(format!("subject '{subject}'")));
            };

            tx.commit()
                .await
                .map_err(|e| classify_vote_error(e, subject))?;

            applied_vote(transition, upvotes, downvotes)
        }

        async fn tally_votes(&self, subject_id: &SubjectId) -> MetadataResult<VoteCounts> {
            let (up, down): (i64, i64) = sqlx::query_as(TALLY_SQL)
                .bind(subject_id.as_str())
                .fetch_one(&self.pool)
                .await?;
            counts_from_columns(up, down)
        }

        async fn reconcile_counts(
            &self,
            subject_id: &SubjectId,
            now: OffsetDateTime,
        ) -> MetadataResult<ReconcileReport> {
            let subject = subject_id.as_str();
            let mut tx = self.begin_immediate().await?;

            let before: Option<(i64, i64)> = sqlx::query_as(
                "SELECT upvotes, downvotes FROM vote_subjects WHERE subject_id = ?",
            )
            .bind(subject)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((before_up, before_down)) = before else {
                tx.rollback().await?;
                return Err(MetadataError::NotFound(format!("subject '{subject}'")));
            };

            let (up, down): (i64, i64) = sqlx::query_as(TALLY_SQL)
                .bind(subject)
                .fetch_one(&mut *tx)
                .await?;

            if (up, down) != (before_up, before_down) {
                sqlx::query(
                    "UPDATE vote_subjects SET upvotes = ?, downvotes = ?, updated_at = ? WHERE subject_id = ?",
                )
                .bind(up)
                .bind(down)
                .bind(now)
                .bind(subject)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;

            Ok(ReconcileReport {
                before: counts_from_columns(before_up, before_down)?,
                after: counts_from_columns(up, down)?,
            })
        }
    }

    const TALLY_SQL: &str = r#"
        SELECT
            COALESCE(SUM(CASE WHEN value = 1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN value = -1 THEN 1 ELSE 0 END), 0)
        FROM votes
        WHERE subject_id = ?
    "#;
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Subjects and their aggregate counters
CREATE TABLE IF NOT EXISTS vote_subjects (
    subject_id TEXT PRIMARY KEY,
    upvotes INTEGER NOT NULL DEFAULT 0 CHECK (upvotes >= 0),
    downvotes INTEGER NOT NULL DEFAULT 0 CHECK (downvotes >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One row per (subject, voter): the voter's current vote
CREATE TABLE IF NOT EXISTS votes (
    subject_id TEXT NOT NULL,
    voter_id TEXT NOT NULL,
    value INTEGER NOT NULL CHECK (value IN (1, -1)),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (subject_id, voter_id),
    FOREIGN KEY (subject_id) REFERENCES vote_subjects(subject_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_votes_voter ON votes(voter_id, subject_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::OffsetDateTime;
    use vigil_core::{SubjectId, VoteCounts, VoteDirection, VoteState, VoterId};

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("votes.db"), None)
            .await
            .unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_apply_vote_requires_subject() {
        let (_temp, store) = store().await;
        let subject = SubjectId::parse("missing").unwrap();
        let voter = VoterId::parse("v1").unwrap();

        let err = store
            .apply_vote(&subject, &voter, VoteDirection::Up, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
        assert!(store.get_vote(&subject, &voter).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_vote_transitions() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();
        let subject = SubjectId::parse("s1").unwrap();
        let voter = VoterId::parse("v1").unwrap();
        store.create_subject(&subject, now).await.unwrap();

        let up = store
            .apply_vote(&subject, &voter, VoteDirection::Up, now)
            .await
            .unwrap();
        assert_eq!(up.outcome.state, VoteState::Up);
        assert_eq!(up.outcome.counts, VoteCounts::new(1, 0));

        let switched = store
            .apply_vote(&subject, &voter, VoteDirection::Down, now)
            .await
            .unwrap();
        assert_eq!(switched.outcome.state, VoteState::Down);
        assert_eq!(switched.outcome.counts, VoteCounts::new(0, 1));

        let retracted = store
            .apply_vote(&subject, &voter, VoteDirection::Down, now)
            .await
            .unwrap();
        assert_eq!(retracted.outcome.state, VoteState::None);
        assert_eq!(retracted.outcome.counts, VoteCounts::new(0, 0));
        assert!(store.get_vote(&subject, &voter).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_subject_twice() {
        let (_temp, store) = store().await;
        let now = OffsetDateTime::now_utc();
        let subject = SubjectId::parse("s1").unwrap();

        store.create_subject(&subject, now).await.unwrap();
        let err = store.create_subject(&subject, now).await.unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_stores_sharing_a_file_wait_for_the_write_lock() {
        const VOTERS: usize = 100;
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("votes.db");
        let first = Arc::new(SqliteStore::new(&path, None).await.unwrap());
        let second = Arc::new(SqliteStore::new(&path, None).await.unwrap());
        let subject = SubjectId::parse("shared").unwrap();
        first
            .create_subject(&subject, OffsetDateTime::now_utc())
            .await
            .unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..VOTERS {
            let store = if i % 2 == 0 { first.clone() } else { second.clone() };
            let subject = subject.clone();
            tasks.spawn(async move {
                let voter = VoterId::parse(&format!("v{i}")).unwrap();
                store
                    .apply_vote(&subject, &voter, VoteDirection::Up, OffsetDateTime::now_utc())
                    .await
            });
        }
        // Each vote gets a single attempt, so any lock upgrade failure shows here.
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let expected = VoteCounts::new(VOTERS as u64, 0);
        assert_eq!(second.get_counts(&subject).await.unwrap(), Some(expected));
        assert_eq!(first.tally_votes(&subject).await.unwrap(), expected);
    }
}
