//! Opaque subject and voter identifiers.
//!
//! Both identifiers are supplied by callers and never authenticated. Parsing
//! only guarantees they are safe to store and to log.

use crate::{Error, MAX_ID_LEN, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

fn validate(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{kind} must not be empty")));
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(Error::InvalidInput(format!(
            "{kind} exceeds {MAX_ID_LEN} characters"
        )));
    }
    if value.trim() != value {
        return Err(Error::InvalidInput(format!(
            "{kind} must not have leading or trailing whitespace"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(Error::InvalidInput(format!(
            "{kind} must not contain control characters"
        )));
    }
    Ok(())
}

/// Identifier of the thing being voted on (an incident report).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Parse and validate a subject identifier.
    pub fn parse(s: &str) -> Result<Self> {
        validate("subject id", s)?;
        Ok(Self(s.to_string()))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubjectId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        validate("subject id", &value)?;
        Ok(Self(value))
    }
}

impl From<SubjectId> for String {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubjectId({})", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of a voter.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoterId(String);

impl VoterId {
    /// Parse and validate a voter identifier.
    pub fn parse(s: &str) -> Result<Self> {
        validate("voter id", s)?;
        Ok(Self(s.to_string()))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VoterId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        validate("voter id", &value)?;
        Ok(Self(value))
    }
}

impl From<VoterId> for String {
    fn from(id: VoterId) -> Self {
        id.0
    }
}

impl fmt::Debug for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoterId({})", self.0)
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
