//! Vote directions, per-voter vote state, and the toggle transition table.
//!
//! A voter's vote on a subject is a three-state machine (`None`, `Up`, `Down`).
//! Submitting a direction either creates, switches, or retracts the vote. Each
//! transition carries the counter delta it implies, so aggregate counters are
//! always adjusted relative to the transition and never rewritten from a
//! previously read absolute value.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction a voter can submit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "RawDirection")]
pub enum VoteDirection {
    Up,
    Down,
}

/// Wire forms accepted for a direction: `"up"`, `"down"`, or the legacy
/// numeric encodings `1` / `-1`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDirection {
    Number(i64),
    Text(String),
}

impl TryFrom<RawDirection> for VoteDirection {
    type Error = Error;

    fn try_from(raw: RawDirection) -> Result<Self> {
        match raw {
            RawDirection::Number(n) => Self::from_value(n),
            RawDirection::Text(s) => Self::parse(&s),
        }
    }
}

impl VoteDirection {
    /// Parse a direction from its textual form.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "1" | "+1" => Ok(Self::Up),
            "down" | "-1" => Ok(Self::Down),
            other => Err(Error::InvalidInput(format!(
                "vote direction must be 'up' or 'down', got '{other}'"
            ))),
        }
    }

    /// Decode the persisted integer value.
    pub fn from_value(value: i64) -> Result<Self> {
        match value {
            1 => Ok(Self::Up),
            -1 => Ok(Self::Down),
            other => Err(Error::InvalidInput(format!(
                "vote value must be 1 or -1, got {other}"
            ))),
        }
    }

    /// Persisted integer value (`1` for up, `-1` for down).
    pub fn value(&self) -> i16 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A voter's current vote on a subject. `None` means no vote record exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteState {
    #[default]
    None,
    Up,
    Down,
}

impl VoteState {
    /// The direction recorded for this state, if any.
    pub fn direction(&self) -> Option<VoteDirection> {
        match self {
            Self::None => None,
            Self::Up => Some(VoteDirection::Up),
            Self::Down => Some(VoteDirection::Down),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    /// Compute the transition caused by submitting `requested` from this state.
    ///
    /// Submitting the direction already held retracts the vote.
    pub fn transition(self, requested: VoteDirection) -> Transition {
        use VoteDirection as D;

        let (next, op, up_delta, down_delta) = match (self, requested) {
            (Self::None, D::Up) => (Self::Up, LedgerOp::Insert, 1, 0),
            (Self::None, D::Down) => (Self::Down, LedgerOp::Insert, 0, 1),
            (Self::Up, D::Up) => (Self::None, LedgerOp::Delete, -1, 0),
            (Self::Down, D::Down) => (Self::None, LedgerOp::Delete, 0, -1),
            (Self::Up, D::Down) => (Self::Down, LedgerOp::Update, -1, 1),
            (Self::Down, D::Up) => (Self::Up, LedgerOp::Update, 1, -1),
        };

        Transition {
            prior: self,
            requested,
            next,
            op,
            up_delta,
            down_delta,
        }
    }
}

impl From<Option<VoteDirection>> for VoteState {
    fn from(direction: Option<VoteDirection>) -> Self {
        match direction {
            None => Self::None,
            Some(VoteDirection::Up) => Self::Up,
            Some(VoteDirection::Down) => Self::Down,
        }
    }
}

impl fmt::Display for VoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation a transition applies to the vote record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerOp {
    /// No prior record: create one.
    Insert,
    /// Prior record in the other direction: switch it in place.
    Update,
    /// Prior record in the same direction: retract it.
    Delete,
}

/// One row of the toggle transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub prior: VoteState,
    pub requested: VoteDirection,
    pub next: VoteState,
    pub op: LedgerOp,
    /// Relative change applied to `upvotes`.
    pub up_delta: i64,
    /// Relative change applied to `downvotes`.
    pub down_delta: i64,
}

impl Transition {
    /// Stable label used for metrics and logs (e.g. `none_to_up`).
    pub fn label(&self) -> &'static str {
        match (self.prior, self.next) {
            (VoteState::None, VoteState::Up) => "none_to_up",
            (VoteState::None, VoteState::Down) => "none_to_down",
            (VoteState::Up, VoteState::None) => "up_to_none",
            (VoteState::Down, VoteState::None) => "down_to_none",
            (VoteState::Up, VoteState::Down) => "up_to_down",
            (VoteState::Down, VoteState::Up) => "down_to_up",
            _ => "unchanged",
        }
    }
}

/// Aggregate counters for a subject.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    pub upvotes: u64,
    pub downvotes: u64,
}

impl VoteCounts {
    pub fn new(upvotes: u64, downvotes: u64) -> Self {
        Self { upvotes, downvotes }
    }

    /// Apply a transition's delta. Returns `None` if a counter would go negative.
    pub fn apply(&self, transition: &Transition) -> Option<Self> {
        Some(Self {
            upvotes: self.upvotes.checked_add_signed(transition.up_delta)?,
            downvotes: self.downvotes.checked_add_signed(transition.down_delta)?,
        })
    }
}

/// Result of applying a vote: the voter's new state and the subject's counters
/// as of the same transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub state: VoteState,
    #[serde(flatten)]
    pub counts: VoteCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use LedgerOp::*;
        use VoteDirection as D;
        use VoteState as S;

        let table = [
            (S::None, D::Up, S::Up, Insert, 1, 0),
            (S::None, D::Down, S::Down, Insert, 0, 1),
            (S::Up, D::Up, S::None, Delete, -1, 0),
            (S::Down, D::Down, S::None, Delete, 0, -1),
            (S::Up, D::Down, S::Down, Update, -1, 1),
            (S::Down, D::Up, S::Up, Update, 1, -1),
        ];

        for (prior, requested, next, op, up, down) in table {
            let t = prior.transition(requested);
            assert_eq!(t.next, next, "{prior} -> {requested}");
            assert_eq!(t.op, op, "{prior} -> {requested}");
            assert_eq!((t.up_delta, t.down_delta), (up, down), "{prior} -> {requested}");
        }
    }

    #[test]
    fn test_same_direction_twice_is_identity() {
        let counts = VoteCounts::new(4, 2);
        for direction in [VoteDirection::Up, VoteDirection::Down] {
            let first = VoteState::None.transition(direction);
            let second = first.next.transition(direction);
            assert_eq!(second.next, VoteState::None);
            let after = counts.apply(&first).and_then(|c| c.apply(&second));
            assert_eq!(after, Some(counts));
        }
    }

    #[test]
    fn test_delta_tracks_record_count() {
        // Walking any sequence of requests, counters derived from deltas must
        // match the number of records in each direction.
        let requests = [
            VoteDirection::Up,
            VoteDirection::Down,
            VoteDirection::Down,
            VoteDirection::Up,
            VoteDirection::Up,
            VoteDirection::Down,
        ];
        let mut state = VoteState::None;
        let mut counts = VoteCounts::default();
        for requested in requests {
            let t = state.transition(requested);
            counts = counts.apply(&t).unwrap();
            state = t.next;
            let expected = match state {
                VoteState::None => VoteCounts::new(0, 0),
                VoteState::Up => VoteCounts::new(1, 0),
                VoteState::Down => VoteCounts::new(0, 1),
            };
            assert_eq!(counts, expected);
        }
    }

    #[test]
    fn test_apply_refuses_negative_counts() {
        let t = VoteState::Up.transition(VoteDirection::Up);
        assert_eq!(VoteCounts::default().apply(&t), None);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(VoteDirection::parse("UP").unwrap(), VoteDirection::Up);
        assert_eq!(VoteDirection::parse(" down ").unwrap(), VoteDirection::Down);
        assert_eq!(VoteDirection::parse("-1").unwrap(), VoteDirection::Down);
        assert!(matches!(
            VoteDirection::parse("sideways"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_direction_deserialize_accepts_legacy_numbers() {
        let up: VoteDirection = serde_json::from_str("1").unwrap();
        let down: VoteDirection = serde_json::from_str("-1").unwrap();
        let text: VoteDirection = serde_json::from_str("\"down\"").unwrap();
        assert_eq!(up, VoteDirection::Up);
        assert_eq!(down, VoteDirection::Down);
        assert_eq!(text, VoteDirection::Down);
        assert!(serde_json::from_str::<VoteDirection>("0").is_err());
        assert!(serde_json::from_str::<VoteDirection>("\"none\"").is_err());
    }

    #[test]
    fn test_value_roundtrip() {
        for direction in [VoteDirection::Up, VoteDirection::Down] {
            let decoded = VoteDirection::from_value(i64::from(direction.value())).unwrap();
            assert_eq!(decoded, direction);
        }
    }

    #[test]
    fn test_outcome_serializes_flat() {
        let outcome = VoteOutcome {
            state: VoteState::Down,
            counts: VoteCounts::new(0, 2),
        };
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"state": "down", "upvotes": 0, "downvotes": 2})
        );
    }
}
