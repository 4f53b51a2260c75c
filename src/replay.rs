//! Deterministic reconstruction of game state from the log.
//!
//! Replay happens in two steps. [`filter_accepted`] reduces the raw log to the
//! actions that really happened in one game, net of rollbacks. [`replay`] then
//! folds that history into a fresh [`Domain`] instance, optionally stopping
//! after a number of actions. [`rebuild`] does both.
//!
//! Nothing here is cached: every call recomputes from the events it is given.
//!
//! ```rust
//! # use ledger::{Action, Domain, Status};
//! # #[derive(Debug, Default)]
//! # struct Moves(Vec<String>);
//! # impl Domain for Moves {
//! #     type Error = std::convert::Infallible;
//! #     fn apply(&mut self, action: &Action) -> Result<(), Self::Error> {
//! #         self.0.push(action.payload().to_string());
//! #         Ok(())
//! #     }
//! #     fn status(&self) -> Status { Status::Ongoing }
//! # }
//! use ledger::{rebuild, AggregateId, Cutoff, EventStore, EventKind, NewEvent};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ledger::Error> {
//! let store = EventStore::start_default();
//! let game = AggregateId::try_new("g1")?;
//! for payload in ["A", "B"] {
//!     store.persist(NewEvent::new(game.clone(), EventKind::MoveSucceeded, payload))?;
//! }
//! store.persist(NewEvent::new(game.clone(), EventKind::RollbackSucceeded, ""))?;
//!
//! let events = store.events().await?;
//! let moves: Moves = rebuild(Moves::default, &events, &game, Cutoff::All)?;
//! assert_eq!(moves.0, vec!["A".to_string()]);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use crate::domain::{Domain, Status};
use crate::error::Error;
use crate::event::{AggregateId, Event, EventKind};

/// How much of a filtered history to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// Replay every accepted action.
    All,
    /// Replay only the first `n` accepted actions. `Moves(0)` is the initial state.
    Moves(usize),
}

impl Cutoff {
    /// Maps the signed form used by clients, where any negative value means all.
    pub fn from_signed(cutoff: i64) -> Self {
        usize::try_from(cutoff).map_or(Cutoff::All, Cutoff::Moves)
    }

    fn limit(&self) -> usize {
        match self {
            Cutoff::All => usize::MAX,
            Cutoff::Moves(n) => *n,
        }
    }
}

/// The accepted, non-rolled-back actions of one game, in log order.
///
/// Each `RollbackSucceeded` removes the most recently kept action; with
/// nothing kept it does nothing. Requests, rejections and outcomes are
/// dropped, as is everything belonging to other games.
pub fn filter_accepted(events: &[Event], aggregate_id: &AggregateId) -> Vec<Event> {
    let mut accepted: Vec<Event> = Vec::new();
    for event in events.iter().filter(|event| event.belongs_to(aggregate_id)) {
        match event.kind() {
            EventKind::MoveSucceeded | EventKind::PromotionSucceeded => {
                accepted.push(event.clone());
            }
            EventKind::RollbackSucceeded => {
                accepted.pop();
            }
            EventKind::MoveRequested
            | EventKind::PromotionRequested
            | EventKind::RollbackRequested
            | EventKind::MoveFailed
            | EventKind::PromotionFailed
            | EventKind::SideAWins
            | EventKind::SideBWins
            | EventKind::Draw => {}
        }
    }
    accepted
}

/// Applies the actions of `accepted` to `domain`, up to `cutoff`.
///
/// Every entry was validated when it was accepted, so a failure here means the
/// log and the domain disagree. It is reported as [`Error::CorruptLog`].
pub fn replay<D: Domain>(mut domain: D, accepted: &[Event], cutoff: Cutoff) -> Result<D, Error> {
    for event in accepted.iter().take(cutoff.limit()) {
        let Some(action) = event.action() else {
            continue;
        };
        domain
            .apply(&action)
            .map_err(|source| Error::CorruptLog {
                aggregate: event.aggregate_id().clone(),
                sequence: event.sequence(),
                reason: source.to_string(),
                source: Box::new(source),
            })?;
    }
    Ok(domain)
}

/// Rebuilds one game from a log snapshot: filter, then fold into `factory()`.
pub fn rebuild<D, F>(
    factory: F,
    events: &[Event],
    aggregate_id: &AggregateId,
    cutoff: Cutoff,
) -> Result<D, Error>
where
    D: Domain,
    F: FnOnce() -> D,
{
    replay(factory(), &filter_accepted(events, aggregate_id), cutoff)
}

/// Current result of every game in the log.
///
/// A game is ongoing until an outcome event is recorded for it. Accepting
/// another action or rolling back afterwards reopens it.
pub fn standings(events: &[Event]) -> BTreeMap<AggregateId, Status> {
    let mut table = BTreeMap::new();
    for event in events {
        let standing = table
            .entry(event.aggregate_id().clone())
            .or_insert(Status::Ongoing);
        match event.kind() {
            EventKind::SideAWins => *standing = Status::SideAWins,
            EventKind::SideBWins => *standing = Status::SideBWins,
            EventKind::Draw => *standing = Status::Draw,
            EventKind::MoveSucceeded
            | EventKind::PromotionSucceeded
            | EventKind::RollbackSucceeded => *standing = Status::Ongoing,
            EventKind::MoveRequested
            | EventKind::PromotionRequested
            | EventKind::RollbackRequested
            | EventKind::MoveFailed
            | EventKind::PromotionFailed => {}
        }
    }
    table
}
