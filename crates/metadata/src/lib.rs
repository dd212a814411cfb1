//! Metadata store abstraction and implementations for Vigil.
//!
//! This crate owns the persisted vote model:
//! - Registered subjects with their aggregate up/down counters
//! - The per-(subject, voter) vote ledger
//! - Atomic vote transitions that move the ledger and the counters together
//! - Counter reconciliation against the ledger

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use repos::{AppliedVote, ReconcileReport, SubjectRepo, VoteRepo};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use vigil_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
            replica_url,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };

            let store = match replica_url {
                Some(replica) => {
                    store
                        .with_read_replica(replica, *max_connections, *statement_timeout_ms)
                        .await?
                }
                None => store,
            };
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::config::MetadataConfig;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("votes.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_from_config_rejects_incomplete_postgres() {
        let config = MetadataConfig::Postgres {
            url: None,
            host: None,
            port: None,
            username: None,
            password: None,
            database: Some("votes".to_string()),
            ssl_mode: None,
            max_connections: 4,
            statement_timeout_ms: None,
            replica_url: None,
        };

        let err = from_config(&config).await.err().unwrap();
        assert!(matches!(err, MetadataError::Config(_)));
    }
}
