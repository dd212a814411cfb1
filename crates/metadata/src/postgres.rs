//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult, classify_vote_error};
use crate::models::{SubjectRow, VoteRow};
use crate::repos::votes::{applied_vote, counts_from_columns, prior_state};
use crate::repos::{AppliedVote, ReconcileReport, SubjectRepo, VoteRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::collections::HashMap;
use std::str::FromStr;
use time::OffsetDateTime;
use vigil_core::config::PgSslMode;
use vigil_core::{LedgerOp, SubjectId, VoteCounts, VoteDirection, VoterId};

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

const TALLY_SQL: &str = r#"
    SELECT
        COUNT(*) FILTER (WHERE value = 1),
        COUNT(*) FILTER (WHERE value = -1)
    FROM votes
    WHERE subject_id = $1
"#;

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
    /// Pool for reads that tolerate replication lag. Same as `pool` unless a
    /// replica is attached.
    read_pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, e.g. the password via
    /// an environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            opts = opts.ssl_mode(sqlx_ssl_mode(mode));
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let pool = Self::open_pool(opts, max_connections, statement_timeout_ms).await?;
        let store = Self {
            read_pool: pool.clone(),
            pool,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn open_pool(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Pool<Postgres>> {
        // Bounds how long a vote transaction can wait on a row lock.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        Ok(pool)
    }

    /// Route counter and vote-state reads to a read replica.
    ///
    /// Vote transitions, subject registration and reconciliation keep using
    /// the primary. Readers of the replica may observe counters that lag the
    /// primary by the replication delay.
    pub async fn with_read_replica(
        mut self,
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        self.read_pool = Self::open_pool(opts, max_connections, statement_timeout_ms).await?;
        tracing::info!("PostgreSQL read replica attached");
        Ok(self)
    }

    /// Get a reference to the primary connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

fn sqlx_ssl_mode(mode: PgSslMode) -> SqlxPgSslMode {
    match mode {
        PgSslMode::Disable => SqlxPgSslMode::Disable,
        PgSslMode::Prefer => SqlxPgSslMode::Prefer,
        PgSslMode::Require => SqlxPgSslMode::Require,
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SubjectRepo for PostgresStore {
    async fn create_subject(
        &self,
        subject_id: &SubjectId,
        now: OffsetDateTime,
    ) -> MetadataResult<SubjectRow> {
        let row = sqlx::query_as::<_, SubjectRow>(
            r#"
            INSERT INTO vote_subjects (subject_id, upvotes, downvotes, created_at, updated_at)
            VALUES ($1, 0, 0, $2, $2)
            ON CONFLICT (subject_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(subject_id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| MetadataError::AlreadyExists(format!("subject '{subject_id}'")))
    }

    async fn get_subject(&self, subject_id: &SubjectId) -> MetadataResult<Option<SubjectRow>> {
        let row =
            sqlx::query_as::<_, SubjectRow>("SELECT * FROM vote_subjects WHERE subject_id = $1")
                .bind(subject_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn subject_exists(&self, subject_id: &SubjectId) -> MetadataResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM vote_subjects WHERE subject_id = $1)",
        )
        .bind(subject_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn delete_subject(&self, subject_id: &SubjectId) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;

        // Vote rows before the counter row, the same order apply_vote locks
        // them. Votes inserted after the first delete go with the cascade.
        let votes = sqlx::query("DELETE FROM votes WHERE subject_id = $1")
            .bind(subject_id.as_str())
            .execute(&mut *tx)
            .await?;

        let subject = sqlx::query("DELETE FROM vote_subjects WHERE subject_id = $1")
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
        let rows = sqlx::query_as::<_, SubjectRow>(
            r#"
            SELECT * FROM vote_subjects
            WHERE ($1::TEXT IS NULL OR subject_id > $1)
            ORDER BY subject_id
            LIMIT $2
            "#,
        )
        .bind(after.map(SubjectId::as_str))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl VoteRepo for PostgresStore {
    async fn get_vote(
        &self,
        subject_id: &SubjectId,
        voter_id: &VoterId,
    ) -> MetadataResult<Option<VoteRow>> {
        let row = sqlx::query_as::<_, VoteRow>(
            "SELECT * FROM votes WHERE subject_id = $1 AND voter_id = $2",
        )
        .bind(subject_id.as_str())
        .bind(voter_id.as_str())
        .fetch_optional(&self.read_pool)
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

        let ids: Vec<&str> = subject_ids.iter().map(SubjectId::as_str).collect();

        // PostgreSQL supports ANY($2) with an array parameter
        let rows = sqlx::query_as::<_, VoteRow>(
            "SELECT * FROM votes WHERE voter_id = $1 AND subject_id = ANY($2)",
        )
        .bind(voter_id.as_str())
        .bind(&ids)
        .fetch_all(&self.read_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.subject_id.clone(), row))
            .collect())
    }

    async fn get_counts(&self, subject_id: &SubjectId) -> MetadataResult<Option<VoteCounts>> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT upvotes, downvotes FROM vote_subjects WHERE subject_id = $1",
        )
        .bind(subject_id.as_str())
        .fetch_optional(&self.read_pool)
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

        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM vote_subjects WHERE subject_id = $1)",
        )
        .bind(subject)
        .fetch_one(&mut *tx)
        .await?;
        if !exists {
            tx.rollback().await?;
            return Err(MetadataError::NotFound(format!("subject '{subject}'")));
        }

        // Locks are always taken vote row first, counter row second.
        let prior: Option<i16> = sqlx::query_scalar(
            "SELECT value FROM votes WHERE subject_id = $1 AND voter_id = $2 FOR UPDATE",
        )
        .bind(subject)
        .bind(voter)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| classify_vote_error(e, subject))?;

        let transition = prior_state(prior, subject_id, voter_id)?.transition(requested);

        // A missing row cannot be locked, so two first votes from the same
        // voter race on the insert. The loser sees zero rows and retries.
        let written = match (transition.op, transition.prior.direction()) {
            (LedgerOp::Insert, _) => {
                sqlx::query(
                    r#"
                    INSERT INTO votes (subject_id, voter_id, value, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $4)
                    ON CONFLICT (subject_id, voter_id) DO NOTHING
                    "#,
                )
                .bind(subject)
                .bind(voter)
                .bind(requested.value())
                .bind(now)
                .execute(&mut *tx)
                .await
            }
            (LedgerOp::Update, Some(prior)) => {
                sqlx::query(
                    "UPDATE votes SET value = $1, updated_at = $2 WHERE subject_id = $3 AND voter_id = $4 AND value = $5",
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
                sqlx::query("DELETE FROM votes WHERE subject_id = $1 AND voter_id = $2 AND value = $3")
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
            SET upvotes = upvotes + $1, downvotes = downvotes + $2, updated_at = $3
            WHERE subject_id = $4
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
        let mut tx = self.pool.begin().await?;

        // Holding the counter row blocks vote deltas until the repair commits.
        // A vote that already wrote its ledger row but not yet its delta is
        // waiting on this lock, and its delta lands on top of the repaired
        // value; the tally below cannot see that uncommitted row, so the two
        // compose correctly.
        let before: Option<(i64, i64)> = sqlx::query_as(
            "SELECT upvotes, downvotes FROM vote_subjects WHERE subject_id = $1 FOR UPDATE",
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
                "UPDATE vote_subjects SET upvotes = $1, downvotes = $2, updated_at = $3 WHERE subject_id = $4",
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
