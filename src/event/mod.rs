//! Events recorded in the log.
//!
//! An [`Event`] is an immutable fact: a request a player made, the verdict the
//! game reached on it, or the final result of a game. Producers never build
//! an [`Event`] directly. They submit a [`NewEvent`] and the store turns it
//! into an [`Event`] by assigning the next [`SequenceId`].
//!
//! # Examples
//!
//! ```rust
//! use ledger::{Action, AggregateId, EventKind, NewEvent};
//!
//! let game = AggregateId::try_new("g1").unwrap();
//! let request = NewEvent::request(game.clone(), Action::Move("12-20".to_string()));
//!
//! assert_eq!(request.kind(), EventKind::MoveRequested);
//! assert_eq!(request.payload(), "12-20");
//! assert_eq!(request.aggregate_id(), &game);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::domain::{Action, Status};

/// Identifies the game (aggregate) an event belongs to.
///
/// Surrounding whitespace is trimmed and the result must not be empty.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 256),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct AggregateId(String);

/// Position of an event in the global log. Starts at 0 and has no gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceId(u64);

impl SequenceId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Index of this event in a full log snapshot. Saturates on targets
    /// where the id does not fit a `usize`.
    pub fn index(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broad grouping of [`EventKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Request,
    Accepted,
    Rejected,
    Outcome,
}

/// Every kind of event the log can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    MoveRequested,
    PromotionRequested,
    RollbackRequested,
    MoveSucceeded,
    PromotionSucceeded,
    RollbackSucceeded,
    MoveFailed,
    PromotionFailed,
    SideAWins,
    SideBWins,
    Draw,
}

impl EventKind {
    pub fn category(&self) -> Category {
        match self {
            EventKind::MoveRequested
            | EventKind::PromotionRequested
            | EventKind::RollbackRequested => Category::Request,
            EventKind::MoveSucceeded
            | EventKind::PromotionSucceeded
            | EventKind::RollbackSucceeded => Category::Accepted,
            EventKind::MoveFailed | EventKind::PromotionFailed => Category::Rejected,
            EventKind::SideAWins | EventKind::SideBWins | EventKind::Draw => Category::Outcome,
        }
    }

    /// Stable name of the kind, used in logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::MoveRequested => "MoveRequested",
            EventKind::PromotionRequested => "PromotionRequested",
            EventKind::RollbackRequested => "RollbackRequested",
            EventKind::MoveSucceeded => "MoveSucceeded",
            EventKind::PromotionSucceeded => "PromotionSucceeded",
            EventKind::RollbackSucceeded => "RollbackSucceeded",
            EventKind::MoveFailed => "MoveFailed",
            EventKind::PromotionFailed => "PromotionFailed",
            EventKind::SideAWins => "SideAWins",
            EventKind::SideBWins => "SideBWins",
            EventKind::Draw => "Draw",
        }
    }

    /// True for accepted events that carry an action to replay.
    ///
    /// `RollbackSucceeded` is accepted but carries no action, so it is not a
    /// replayable action.
    pub fn is_replayable(&self) -> bool {
        matches!(self, EventKind::MoveSucceeded | EventKind::PromotionSucceeded)
    }

    /// The outcome kind matching a terminal status, `None` while ongoing.
    pub fn outcome_for(status: Status) -> Option<EventKind> {
        match status {
            Status::Ongoing => None,
            Status::SideAWins => Some(EventKind::SideAWins),
            Status::SideBWins => Some(EventKind::SideBWins),
            Status::Draw => Some(EventKind::Draw),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// What a producer learns about its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(String),
}

/// A candidate event that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    aggregate_id: AggregateId,
    kind: EventKind,
    payload: String,
    cause: Option<SequenceId>,
}

impl NewEvent {
    pub fn new(aggregate_id: AggregateId, kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            aggregate_id,
            kind,
            payload: payload.into(),
            cause: None,
        }
    }

    /// Links this event to the event it answers, e.g. a verdict to its request.
    pub fn caused_by(self, cause: SequenceId) -> Self {
        Self {
            cause: Some(cause),
            ..self
        }
    }

    /// A request to perform `action` in the given game.
    pub fn request(aggregate_id: AggregateId, action: Action) -> Self {
        match action {
            Action::Move(payload) => Self::new(aggregate_id, EventKind::MoveRequested, payload),
            Action::Promotion(payload) => {
                Self::new(aggregate_id, EventKind::PromotionRequested, payload)
            }
        }
    }

    /// A request to undo the most recent accepted action of the given game.
    pub fn rollback(aggregate_id: AggregateId) -> Self {
        Self::new(aggregate_id, EventKind::RollbackRequested, String::new())
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn cause(&self) -> Option<SequenceId> {
        self.cause
    }
}

/// An appended, immutable event.
///
/// Events serialize for export and display only. They cannot be deserialized
/// back, since only the store assigns sequence ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    sequence: SequenceId,
    aggregate_id: AggregateId,
    kind: EventKind,
    payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<SequenceId>,
    recorded_at: DateTime<Utc>,
}

impl Event {
    /// Finalizes a candidate. Only the store worker calls this at append time.
    pub(crate) fn stamped(sequence: SequenceId, candidate: NewEvent, recorded_at: DateTime<Utc>) -> Self {
        let NewEvent {
            aggregate_id,
            kind,
            payload,
            cause,
        } = candidate;
        Self {
            sequence,
            aggregate_id,
            kind,
            payload,
            cause,
            recorded_at,
        }
    }

    pub fn sequence(&self) -> SequenceId {
        self.sequence
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// The sequence id of the event this one answers, if any.
    pub fn cause(&self) -> Option<SequenceId> {
        self.cause
    }

    /// True when this is the verdict on the request at `request`.
    pub fn answers(&self, request: SequenceId) -> bool {
        self.cause == Some(request) && self.verdict().is_some()
    }

    pub fn belongs_to(&self, aggregate_id: &AggregateId) -> bool {
        &self.aggregate_id == aggregate_id
    }

    /// The action carried by an accepted move or promotion.
    pub fn action(&self) -> Option<Action> {
        match self.kind {
            EventKind::MoveSucceeded => Some(Action::Move(self.payload.clone())),
            EventKind::PromotionSucceeded => Some(Action::Promotion(self.payload.clone())),
            _ => None,
        }
    }

    /// The verdict this event represents, if it answers a request.
    pub fn verdict(&self) -> Option<Verdict> {
        match self.kind.category() {
            Category::Accepted => Some(Verdict::Accepted),
            Category::Rejected => Some(Verdict::Rejected(self.payload.clone())),
            Category::Request | Category::Outcome => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event<sequence: {}, aggregate: {}, kind: {}, payload: {:?}>",
            self.sequence, self.aggregate_id, self.kind, self.payload
        )
    }
}
