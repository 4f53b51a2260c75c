use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::{EventStore, Listener, ListenerError, ListenerId};
use crate::error::Error;
use crate::event::{AggregateId, Event, SequenceId, Verdict};

struct Forward {
    aggregate_id: AggregateId,
    sink: mpsc::UnboundedSender<Event>,
}

impl Listener for Forward {
    fn on_event<'a>(
        &'a self,
        _store: &'a EventStore,
        event: &'a Event,
    ) -> BoxFuture<'a, Result<(), ListenerError>> {
        let forwarded: Result<(), ListenerError> =
            if event.belongs_to(&self.aggregate_id) && self.sink.send(event.clone()).is_err() {
                Err("subscriber dropped its receiver".into())
            } else {
                Ok(())
            };
        Box::pin(std::future::ready(forwarded))
    }
}

/// Deregisters its listener when released or dropped.
struct Registration {
    store: EventStore,
    id: ListenerId,
    active: bool,
}

impl Registration {
    async fn release(mut self) -> Result<(), Error> {
        self.active = false;
        self.store.deregister(self.id).await
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        let id = self.id;
        runtime.spawn(async move {
            if let Err(error) = store.deregister(id).await {
                debug!(listener = %id, error = %error, "Dropped subscription was not deregistered");
            }
        });
    }
}

/// Events of one aggregate, delivered in sequence order from the moment of
/// subscribing.
///
/// Dropping a subscription deregisters it in the background; [`Subscription::close`]
/// does the same and waits for it.
pub struct Subscription {
    aggregate_id: AggregateId,
    events: mpsc::UnboundedReceiver<Event>,
    registration: Registration,
}

impl Subscription {
    pub(crate) fn open(store: EventStore, aggregate_id: AggregateId) -> Result<Self, Error> {
        let (sink, events) = mpsc::unbounded_channel();
        let id = store.register(Forward {
            aggregate_id: aggregate_id.clone(),
            sink,
        })?;
        Ok(Self {
            aggregate_id,
            events,
            registration: Registration {
                store,
                id,
                active: true,
            },
        })
    }

    pub fn id(&self) -> ListenerId {
        self.registration.id
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    /// The next event, or `None` once the store has shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Skips ahead to the next accepted or rejected event.
    pub async fn next_verdict(&mut self) -> Option<Verdict> {
        while let Some(event) = self.events.recv().await {
            if let Some(verdict) = event.verdict() {
                return Some(verdict);
            }
        }
        None
    }

    /// Waits for the verdict on the request appended at `request`, skipping
    /// verdicts on other requests.
    pub async fn verdict_for(&mut self, request: SequenceId) -> Option<Verdict> {
        while let Some(event) = self.events.recv().await {
            if event.answers(request) {
                return event.verdict();
            }
        }
        None
    }

    pub fn into_stream(self) -> SubscriptionStream {
        SubscriptionStream {
            inner: UnboundedReceiverStream::new(self.events),
            _registration: self.registration,
        }
    }

    /// Deregisters and waits for the store to confirm.
    pub async fn close(self) -> Result<(), Error> {
        self.registration.release().await
    }
}

/// A [`Subscription`] consumed as a [`Stream`].
pub struct SubscriptionStream {
    inner: UnboundedReceiverStream<Event>,
    _registration: Registration,
}

impl Stream for SubscriptionStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
