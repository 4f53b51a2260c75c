//! The in-memory event log and its single writer.
//!
//! This module provides the [`EventStore`]: a cheap, cloneable handle to a log
//! owned by one worker task. The worker is the serialization point for:
//! - appending events and assigning their sequence ids
//! - registering and deregistering listeners
//! - taking snapshots of the log
//!
//! Every operation is a message on one queue, handled strictly in arrival
//! order. A task that persists an event and then reads the log always sees
//! its own event.
//!
//! # Examples
//!
//! ```rust
//! use ledger::{Action, AggregateId, EventKind, EventStore, NewEvent, StoreConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ledger::Error> {
//! let store = EventStore::start(StoreConfig::default());
//! let game = AggregateId::try_new("g1")?;
//!
//! // Fire and forget.
//! store.persist(NewEvent::request(game.clone(), Action::Move("12-20".to_string())))?;
//!
//! // Or wait for the finalized event.
//! let event = store.append(NewEvent::rollback(game.clone())).await?;
//! assert_eq!(event.sequence().value(), 1);
//!
//! let kinds: Vec<_> = store.events().await?.iter().map(|e| e.kind()).collect();
//! assert_eq!(kinds, vec![EventKind::MoveRequested, EventKind::RollbackRequested]);
//!
//! store.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod listener;
mod subscription;

pub use listener::{FnListener, Listener, ListenerError, ListenerId, listener_fn};
pub use subscription::{Subscription, SubscriptionStream};

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::config::StoreConfig;
use crate::error::Error;
use crate::event::{AggregateId, Category, Event, NewEvent, SequenceId, Verdict};
use crate::persist::Persist;
use listener::Mailbox;

enum Request {
    Append {
        candidate: NewEvent,
        ack: Option<oneshot::Sender<Event>>,
    },
    Register {
        id: ListenerId,
        listener: Arc<dyn Listener>,
    },
    Deregister {
        id: ListenerId,
        ack: oneshot::Sender<Result<(), Error>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Event>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to an in-memory, append-only event log.
///
/// Clones share the same log. The worker runs until [`EventStore::shutdown`]
/// is called or every clone is dropped. Listener tasks only borrow a handle
/// for the duration of one delivery, so they do not keep the store alive.
#[derive(Clone)]
pub struct EventStore {
    requests: mpsc::UnboundedSender<Request>,
    config: StoreConfig,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("closed", &self.requests.is_closed())
            .field("config", &self.config)
            .finish()
    }
}

impl EventStore {
    /// Spawns the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(config: StoreConfig) -> Self {
        let (requests, inbox) = mpsc::unbounded_channel();
        let worker = Worker {
            log: Vec::with_capacity(config.log_capacity()),
            mailboxes: Vec::new(),
            handle: requests.downgrade(),
            config,
        };
        tokio::spawn(worker.run(inbox));
        info!(?config, "Event store started");
        Self { requests, config }
    }

    pub fn start_default() -> Self {
        Self::start(StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Submits a candidate event without waiting for it to be appended.
    ///
    /// The event is not necessarily visible when this returns. Observe it
    /// through a listener, or read [`EventStore::events`] from the same task.
    pub fn persist(&self, candidate: NewEvent) -> Result<(), Error> {
        self.send(Request::Append {
            candidate,
            ack: None,
        })
    }

    /// Submits a candidate event and waits for the finalized [`Event`].
    pub async fn append(&self, candidate: NewEvent) -> Result<Event, Error> {
        let (ack, appended) = oneshot::channel();
        self.send(Request::Append {
            candidate,
            ack: Some(ack),
        })?;
        appended.await.map_err(|_| Error::StoreClosed)
    }

    /// Registers a listener for events appended after the registration is
    /// applied. Earlier events are only available through [`EventStore::events`].
    pub fn register(&self, listener: impl Listener) -> Result<ListenerId, Error> {
        let id = ListenerId::new();
        self.send(Request::Register {
            id,
            listener: Arc::new(listener),
        })?;
        Ok(id)
    }

    /// Removes a listener.
    ///
    /// Events already queued for it may still be delivered. Deregistering a
    /// listener that is not registered returns [`Error::UnknownListener`].
    pub async fn deregister(&self, id: ListenerId) -> Result<(), Error> {
        let (ack, done) = oneshot::channel();
        self.send(Request::Deregister { id, ack })?;
        done.await.map_err(|_| Error::StoreClosed)?
    }

    /// A snapshot of the whole log.
    pub async fn events(&self) -> Result<Vec<Event>, Error> {
        let (reply, snapshot) = oneshot::channel();
        self.send(Request::Snapshot { reply })?;
        snapshot.await.map_err(|_| Error::StoreClosed)
    }

    /// A snapshot of the events of one aggregate.
    pub async fn events_for(&self, aggregate_id: &AggregateId) -> Result<Vec<Event>, Error> {
        let mut events = self.events().await?;
        events.retain(|event| event.belongs_to(aggregate_id));
        Ok(events)
    }

    /// Sequence ids of the events of one aggregate, in log order.
    pub async fn sequence_ids(&self, aggregate_id: &AggregateId) -> Result<Vec<SequenceId>, Error> {
        Ok(self
            .events_for(aggregate_id)
            .await?
            .iter()
            .map(Event::sequence)
            .collect())
    }

    /// Streams the events of one aggregate appended from now on.
    pub fn subscribe(&self, aggregate_id: AggregateId) -> Result<Subscription, Error> {
        Subscription::open(self.clone(), aggregate_id)
    }

    /// Submits a request and waits for the verdict on it.
    ///
    /// The verdict is the accepted or rejected event caused by this request,
    /// so verdicts on other pending requests for the same game are skipped.
    pub async fn request(&self, candidate: NewEvent) -> Result<Verdict, Error> {
        if candidate.kind().category() != Category::Request {
            return Err(Error::NotARequest(candidate.kind()));
        }
        let aggregate = candidate.aggregate_id().clone();
        let mut subscription = self.subscribe(aggregate.clone())?;
        let request = self.append(candidate).await?;

        let waited = tokio::time::timeout(
            self.config.request_timeout(),
            subscription.verdict_for(request.sequence()),
        )
        .await;
        subscription.close().await?;

        match waited {
            Ok(Some(verdict)) => Ok(verdict),
            Ok(None) => Err(Error::StoreClosed),
            Err(_) => Err(Error::RequestTimedOut {
                aggregate,
                timeout_ms: self.config.request_timeout_ms(),
            }),
        }
    }

    /// Stops the worker. Listeners finish what is already queued for them.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let (ack, done) = oneshot::channel();
        self.send(Request::Shutdown { ack })?;
        done.await.map_err(|_| Error::StoreClosed)
    }

    fn send(&self, request: Request) -> Result<(), Error> {
        self.requests.send(request).map_err(|_| Error::StoreClosed)
    }
}

impl Persist for EventStore {
    fn persist(&self, candidate: NewEvent) -> Result<(), Error> {
        EventStore::persist(self, candidate)
    }
}

struct Worker {
    log: Vec<Event>,
    mailboxes: Vec<Mailbox>,
    handle: mpsc::WeakUnboundedSender<Request>,
    config: StoreConfig,
}

impl Worker {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Request>) {
        while let Some(request) = inbox.recv().await {
            match request {
                Request::Append { candidate, ack } => {
                    let event = self.append(candidate);
                    if let Some(ack) = ack {
                        let _ = ack.send(event);
                    }
                }
                Request::Register { id, listener } => self.register(id, listener),
                Request::Deregister { id, ack } => {
                    let _ = ack.send(self.deregister(id));
                }
                Request::Snapshot { reply } => {
                    let _ = reply.send(self.log.clone());
                }
                Request::Shutdown { ack } => {
                    info!(
                        events = self.log.len(),
                        listeners = self.mailboxes.len(),
                        "Event store shutting down"
                    );
                    inbox.close();
                    self.mailboxes.clear();
                    let _ = ack.send(());
                    return;
                }
            }
        }
        debug!("All event store handles dropped, worker exiting");
    }

    fn append(&mut self, candidate: NewEvent) -> Event {
        let sequence = SequenceId::new(self.log.len() as u64);
        let event = Event::stamped(sequence, candidate, Utc::now());
        self.log.push(event.clone());

        debug!(
            sequence = %event.sequence(),
            aggregate = %event.aggregate_id(),
            kind = %event.kind(),
            listeners = self.mailboxes.len(),
            "Event appended"
        );

        for mailbox in &self.mailboxes {
            mailbox.deliver(event.clone(), self.config.backlog_warning());
        }
        event
    }

    fn register(&mut self, id: ListenerId, listener: Arc<dyn Listener>) {
        self.mailboxes
            .push(Mailbox::spawn(id, listener, self.handle.clone(), self.config));
        info!(listener = %id, listeners = self.mailboxes.len(), "Listener registered");
    }

    fn deregister(&mut self, id: ListenerId) -> Result<(), Error> {
        match self.mailboxes.iter().position(|mailbox| mailbox.id() == id) {
            Some(index) => {
                self.mailboxes.remove(index);
                info!(listener = %id, listeners = self.mailboxes.len(), "Listener deregistered");
                Ok(())
            }
            None => {
                error!(listener = %id, "Attempted to deregister an unknown listener");
                Err(Error::UnknownListener(id))
            }
        }
    }
}
