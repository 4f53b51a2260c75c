//! Listeners that turn requests into verdicts and verdicts into results.
//!
//! A [`Reactor`] answers every request event: it rebuilds the game from the
//! log, asks the [`Domain`] whether the action is legal, and writes the
//! matching accepted or rejected event. An [`OutcomeWatcher`] follows the
//! accepted events and records who won once a game is over. [`install`]
//! registers both on a store.
//!
//! The `decide_*` functions hold the actual decisions. They only need a
//! domain instance, so they can be exercised without a running store.

use std::marker::PhantomData;

use futures::future::BoxFuture;
use tracing::{debug, error};

use crate::domain::{Action, Domain};
use crate::error::Error;
use crate::event::{AggregateId, Category, Event, EventKind, NewEvent};
use crate::persist::Persist;
use crate::replay::{Cutoff, rebuild};
use crate::store::{EventStore, Listener, ListenerError, ListenerId};

/// Reason given when a request targets a finished game.
pub const GAME_OVER: &str = "game is already over";

fn decide<D: Domain>(
    domain: &mut D,
    aggregate_id: &AggregateId,
    action: Action,
    succeeded: EventKind,
    failed: EventKind,
) -> NewEvent {
    if domain.status().is_terminal() {
        return NewEvent::new(aggregate_id.clone(), failed, GAME_OVER);
    }
    match domain.apply(&action) {
        Ok(()) => NewEvent::new(aggregate_id.clone(), succeeded, action.payload()),
        Err(reason) => NewEvent::new(aggregate_id.clone(), failed, reason.to_string()),
    }
}

/// Answers a move request: `MoveSucceeded` with the same payload, or
/// `MoveFailed` with the reason.
pub fn decide_move<D: Domain>(domain: &mut D, aggregate_id: &AggregateId, payload: &str) -> NewEvent {
    decide(
        domain,
        aggregate_id,
        Action::Move(payload.to_string()),
        EventKind::MoveSucceeded,
        EventKind::MoveFailed,
    )
}

/// Answers a promotion request, like [`decide_move`].
pub fn decide_promotion<D: Domain>(
    domain: &mut D,
    aggregate_id: &AggregateId,
    payload: &str,
) -> NewEvent {
    decide(
        domain,
        aggregate_id,
        Action::Promotion(payload.to_string()),
        EventKind::PromotionSucceeded,
        EventKind::PromotionFailed,
    )
}

/// Rollbacks are always granted. Undoing past the first action does nothing.
pub fn decide_rollback<D: Domain>(_domain: &mut D, aggregate_id: &AggregateId) -> NewEvent {
    NewEvent::new(aggregate_id.clone(), EventKind::RollbackSucceeded, "")
}

/// Validates requests and persists the verdict.
///
/// A single reactor handles every request kind, so requests are decided one
/// at a time in log order and each decision sees the verdicts before it.
pub struct Reactor<D, F> {
    factory: F,
    _domain: PhantomData<fn() -> D>,
}

impl<D, F> Reactor<D, F>
where
    D: Domain,
    F: Fn() -> D,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            _domain: PhantomData,
        }
    }

    /// The verdict for `request` given the current log, or `None` when the
    /// event is not a request. The verdict names `request` as its cause.
    pub fn react(&self, events: &[Event], request: &Event) -> Result<Option<NewEvent>, Error> {
        if request.kind().category() != Category::Request {
            return Ok(None);
        }
        let aggregate_id = request.aggregate_id();
        let mut domain = rebuild(&self.factory, events, aggregate_id, Cutoff::All)?;
        let verdict = match request.kind() {
            EventKind::MoveRequested => decide_move(&mut domain, aggregate_id, request.payload()),
            EventKind::PromotionRequested => {
                decide_promotion(&mut domain, aggregate_id, request.payload())
            }
            EventKind::RollbackRequested => decide_rollback(&mut domain, aggregate_id),
            _ => return Ok(None),
        };
        Ok(Some(verdict.caused_by(request.sequence())))
    }

    async fn handle(&self, store: &EventStore, event: &Event) -> Result<(), Error> {
        if event.kind().category() != Category::Request {
            return Ok(());
        }
        let events = store.events().await?;
        match self.react(&events, event) {
            Ok(Some(verdict)) => {
                debug!(
                    aggregate = %event.aggregate_id(),
                    request = %event.sequence(),
                    verdict = %verdict.kind(),
                    "Request decided"
                );
                store.persist(verdict)
            }
            Ok(None) => Ok(()),
            Err(corrupt @ Error::CorruptLog { .. }) => {
                error!(
                    aggregate = %event.aggregate_id(),
                    request = %event.sequence(),
                    error = %corrupt,
                    "Abandoning request, log cannot be replayed"
                );
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

impl<D, F> Listener for Reactor<D, F>
where
    D: Domain + 'static,
    F: Fn() -> D + Send + Sync + 'static,
{
    fn on_event<'a>(
        &'a self,
        store: &'a EventStore,
        event: &'a Event,
    ) -> BoxFuture<'a, Result<(), ListenerError>> {
        Box::pin(async move {
            self.handle(store, event)
                .await
                .map_err(|error| -> ListenerError { Box::new(error) })
        })
    }
}

/// Records the result of a game when an accepted event ends it.
///
/// The game is rebuilt as of the triggering event, so each transition to a
/// finished state yields exactly one outcome event carrying the triggering
/// payload.
pub struct OutcomeWatcher<D, F> {
    factory: F,
    _domain: PhantomData<fn() -> D>,
}

impl<D, F> OutcomeWatcher<D, F>
where
    D: Domain,
    F: Fn() -> D,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            _domain: PhantomData,
        }
    }

    /// The outcome event `trigger` causes, given a log containing it.
    pub fn judge(&self, events: &[Event], trigger: &Event) -> Result<Option<NewEvent>, Error> {
        if trigger.kind().category() != Category::Accepted {
            return Ok(None);
        }
        let end = trigger
            .sequence()
            .index()
            .saturating_add(1)
            .min(events.len());
        let aggregate_id = trigger.aggregate_id();
        let domain = rebuild(&self.factory, &events[..end], aggregate_id, Cutoff::All)?;
        Ok(EventKind::outcome_for(domain.status()).map(|kind| {
            NewEvent::new(aggregate_id.clone(), kind, trigger.payload())
                .caused_by(trigger.sequence())
        }))
    }

    async fn handle(&self, store: &EventStore, event: &Event) -> Result<(), Error> {
        if event.kind().category() != Category::Accepted {
            return Ok(());
        }
        let events = store.events().await?;
        match self.judge(&events, event) {
            Ok(Some(outcome)) => {
                debug!(
                    aggregate = %event.aggregate_id(),
                    outcome = %outcome.kind(),
                    "Game finished"
                );
                store.persist(outcome)
            }
            Ok(None) => Ok(()),
            Err(corrupt @ Error::CorruptLog { .. }) => {
                error!(
                    aggregate = %event.aggregate_id(),
                    trigger = %event.sequence(),
                    error = %corrupt,
                    "Abandoning outcome check, log cannot be replayed"
                );
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

impl<D, F> Listener for OutcomeWatcher<D, F>
where
    D: Domain + 'static,
    F: Fn() -> D + Send + Sync + 'static,
{
    fn on_event<'a>(
        &'a self,
        store: &'a EventStore,
        event: &'a Event,
    ) -> BoxFuture<'a, Result<(), ListenerError>> {
        Box::pin(async move {
            self.handle(store, event)
                .await
                .map_err(|error| -> ListenerError { Box::new(error) })
        })
    }
}

/// Registers a [`Reactor`] and an [`OutcomeWatcher`] for the same domain.
///
/// Returns their ids, reactor first.
pub fn install<D, F>(store: &EventStore, factory: F) -> Result<(ListenerId, ListenerId), Error>
where
    D: Domain + 'static,
    F: Fn() -> D + Clone + Send + Sync + 'static,
{
    let reactor = store.register(Reactor::new(factory.clone()))?;
    let watcher = store.register(OutcomeWatcher::new(factory))?;
    Ok((reactor, watcher))
}

/// Forwards decisions straight into any [`Persist`] implementation.
///
/// Useful when requests are decided outside a running store, e.g. when
/// re-driving a batch of requests against an existing log.
pub fn answer<D, F, P>(
    reactor: &Reactor<D, F>,
    persister: &P,
    events: &[Event],
    request: &Event,
) -> Result<(), Error>
where
    D: Domain,
    F: Fn() -> D,
    P: Persist + ?Sized,
{
    match reactor.react(events, request)? {
        Some(verdict) => persister.persist(verdict),
        None => Ok(()),
    }
}
