//! Core domain types and shared logic for the Vigil vote ledger.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Subject and voter identifiers
//! - Vote directions, per-voter vote state, and the toggle transition table
//! - Aggregate counter values returned to callers
//! - Configuration shared by the store and the server

pub mod config;
pub mod error;
pub mod ids;
pub mod vote;

pub use error::{Error, Result};
pub use ids::{SubjectId, VoterId};
pub use vote::{LedgerOp, Transition, VoteCounts, VoteDirection, VoteOutcome, VoteState};

/// Maximum length of subject and voter identifiers, in characters.
pub const MAX_ID_LEN: usize = 128;

/// Maximum number of subjects accepted by a batched voter-state lookup.
pub const MAX_BATCH_SUBJECTS: usize = 100;
