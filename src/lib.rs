//! An in-memory event log for turn-based games.
//!
//! Producers append requests to an [`EventStore`]; listeners are told about
//! every event in sequence order and may append more. The [`reaction`]
//! listeners validate requests against a pluggable [`Domain`] and record the
//! verdicts, and [`rebuild`] reconstructs any game, at any point in its
//! history, from the log alone.
//!
//! ```rust
//! # use ledger::{Action, Domain, Status};
//! # #[derive(Debug, thiserror::Error)]
//! # #[error("{0}")]
//! # struct Illegal(String);
//! # #[derive(Debug, Default, Clone)]
//! # struct Board(Vec<String>);
//! # impl Domain for Board {
//! #     type Error = Illegal;
//! #     fn apply(&mut self, action: &Action) -> Result<(), Self::Error> {
//! #         if action.payload() == "99-99" {
//! #             return Err(Illegal("square out of range".to_string()));
//! #         }
//! #         self.0.push(action.payload().to_string());
//! #         Ok(())
//! #     }
//! #     fn status(&self) -> Status { Status::Ongoing }
//! # }
//! use ledger::{AggregateId, Cutoff, EventStore, NewEvent, Verdict, install, rebuild};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ledger::Error> {
//! let store = EventStore::start_default();
//! install(&store, Board::default)?;
//!
//! let game = AggregateId::try_new("g1")?;
//! let verdict = store
//!     .request(NewEvent::request(game.clone(), Action::Move("12-20".to_string())))
//!     .await?;
//! assert_eq!(verdict, Verdict::Accepted);
//!
//! let board: Board = rebuild(Board::default, &store.events().await?, &game, Cutoff::All)?;
//! assert_eq!(board.0, vec!["12-20".to_string()]);
//! # Ok(())
//! # }
//! ```

mod config;
mod domain;
mod error;
mod event;
mod persist;
pub mod reaction;
mod replay;
mod store;

pub use config::StoreConfig;
pub use domain::{Action, Domain, Status};
pub use error::Error;
pub use event::{AggregateId, AggregateIdError, Category, Event, EventKind, NewEvent, SequenceId, Verdict};
pub use persist::Persist;
pub use reaction::{OutcomeWatcher, Reactor, install};
pub use replay::{Cutoff, filter_accepted, rebuild, replay, standings};
pub use store::{
    EventStore, FnListener, Listener, ListenerError, ListenerId, Subscription, SubscriptionStream,
    listener_fn,
};
