/// Error types for the ledger event log.
///
/// Invalid player actions are not errors: they end up in the log as rejection
/// events. The variants here cover misuse of the store, a log that no longer
/// replays, and bad configuration.
use thiserror::Error;

use crate::event::{AggregateId, AggregateIdError, EventKind, SequenceId};
use crate::store::ListenerId;

/// Represents errors that can occur in the ledger event log
#[derive(Debug, Error)]
pub enum Error {
    /// A listener was deregistered that is not registered. This is a bug in
    /// the caller's registration bookkeeping.
    #[error("Listener {0} is not registered")]
    UnknownListener(ListenerId),

    /// An accepted action could not be reapplied during a rebuild
    #[error("Corrupt log for aggregate '{aggregate}': event {sequence} no longer applies: {reason}")]
    CorruptLog {
        aggregate: AggregateId,
        sequence: SequenceId,
        reason: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Only request kinds can be submitted through `EventStore::request`
    #[error("{0} is not a request")]
    NotARequest(EventKind),

    /// The store worker has shut down
    #[error("Event store is closed")]
    StoreClosed,

    /// No verdict arrived for a request in time
    #[error("No verdict for aggregate '{aggregate}' within {timeout_ms}ms")]
    RequestTimedOut { aggregate: AggregateId, timeout_ms: u64 },

    /// Indicates an invalid aggregate identifier
    #[error(transparent)]
    InvalidAggregateId(#[from] AggregateIdError),

    /// Indicates an invalid configuration parameter
    #[error("Invalid configuration{}: {message}", parameter.as_ref().map(|p| format!(" parameter '{p}'")).unwrap_or_default())]
    InvalidConfig {
        message: String,
        parameter: Option<String>,
    },
}
