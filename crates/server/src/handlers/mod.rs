//! HTTP request handlers.

pub mod admin;
pub mod common;
pub mod health;
pub mod subjects;
pub mod votes;

pub use admin::*;
pub use health::*;
pub use subjects::*;
pub use votes::*;
