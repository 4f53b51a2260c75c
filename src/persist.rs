use crate::{Error, NewEvent};

/// Anything that accepts candidate events for the log.
///
/// Reactions decide which event to write and hand it to a `Persist`. The
/// [`EventStore`](crate::EventStore) is the real implementation; tests can
/// substitute a recorder.
pub trait Persist {
    fn persist(&self, candidate: NewEvent) -> Result<(), Error>;
}
