//! The boundary between the log and the rules of the game.
//!
//! The log never interprets payloads. Whatever game is being played plugs in
//! through the [`Domain`] trait: it applies [`Action`]s to its own state and
//! reports a [`Status`]. Replay and the reactions only ever talk to that trait.
//!
//! # Examples
//!
//! A domain where each player moves a counter and the first to ten wins:
//!
//! ```rust
//! use ledger::{Action, Domain, Status};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("{0}")]
//! struct RaceError(String);
//!
//! #[derive(Debug, Default)]
//! struct Race {
//!     a: u32,
//!     b: u32,
//!     turn_b: bool,
//! }
//!
//! impl Domain for Race {
//!     type Error = RaceError;
//!
//!     fn apply(&mut self, action: &Action) -> Result<(), Self::Error> {
//!         let steps: u32 = action
//!             .payload()
//!             .parse()
//!             .map_err(|_| RaceError(format!("not a number: {}", action.payload())))?;
//!         if !(1..=3).contains(&steps) {
//!             return Err(RaceError("steps must be between 1 and 3".to_string()));
//!         }
//!         if self.turn_b { self.b += steps } else { self.a += steps }
//!         self.turn_b = !self.turn_b;
//!         Ok(())
//!     }
//!
//!     fn status(&self) -> Status {
//!         match (self.a >= 10, self.b >= 10) {
//!             (true, _) => Status::SideAWins,
//!             (_, true) => Status::SideBWins,
//!             _ => Status::Ongoing,
//!         }
//!     }
//! }
//!
//! let mut race = Race::default();
//! race.apply(&Action::Move("3".to_string())).unwrap();
//! assert!(race.apply(&Action::Move("7".to_string())).is_err());
//! assert_eq!(race.status(), Status::Ongoing);
//! ```

use std::fmt::Debug;

/// An action a player can ask the game to perform.
///
/// The payload is opaque to the log (for a board game it is typically a
/// `"from-to"` encoding, with a piece suffix for promotions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Move(String),
    Promotion(String),
}

impl Action {
    pub fn payload(&self) -> &str {
        match self {
            Action::Move(payload) | Action::Promotion(payload) => payload,
        }
    }
}

/// Where a game stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ongoing,
    SideAWins,
    SideBWins,
    Draw,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Ongoing)
    }
}

/// State of one game, driven only by accepted actions.
///
/// Implementations must be deterministic: applying the same actions to a
/// fresh instance in the same order must always succeed or fail the same
/// way, since replay relies on it.
pub trait Domain: Debug + Send {
    /// Why an action was refused. Its display text becomes the payload of the
    /// rejection event.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validates `action` against the current state and applies it.
    ///
    /// On error the state must be left unchanged.
    fn apply(&mut self, action: &Action) -> Result<(), Self::Error>;

    /// Reports whether the game is still running.
    fn status(&self) -> Status;
}
