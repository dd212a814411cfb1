//! Repository traits for the vote ledger.

pub mod subjects;
pub mod votes;

pub use subjects::SubjectRepo;
pub use votes::{AppliedVote, ReconcileReport, VoteRepo};
