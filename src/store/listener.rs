use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{EventStore, Request};
use crate::config::StoreConfig;
use crate::event::Event;

/// Error a listener reports for one delivery. It is logged and dropped.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reacts to every event appended after it was registered.
///
/// Each registered listener runs on its own task and receives events one at
/// a time in sequence order. Deliveries to different listeners interleave
/// freely, and the store never waits for a listener to finish.
///
/// ```rust
/// use ledger::{Event, EventStore, Listener, ListenerError};
/// use futures::future::BoxFuture;
///
/// struct Printer;
///
/// impl Listener for Printer {
///     fn on_event<'a>(
///         &'a self,
///         _store: &'a EventStore,
///         event: &'a Event,
///     ) -> BoxFuture<'a, Result<(), ListenerError>> {
///         Box::pin(async move {
///             println!("{event}");
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Listener: Send + Sync + 'static {
    fn on_event<'a>(
        &'a self,
        store: &'a EventStore,
        event: &'a Event,
    ) -> BoxFuture<'a, Result<(), ListenerError>>;
}

/// A listener backed by a synchronous closure. See [`listener_fn`].
pub struct FnListener<F>(F);

/// Wraps a closure as a [`Listener`].
///
/// ```rust
/// use ledger::{listener_fn, EventKind};
///
/// let listener = listener_fn(|_store, event| {
///     if event.kind() == EventKind::MoveFailed {
///         eprintln!("rejected: {}", event.payload());
///     }
///     Ok(())
/// });
/// # let _ = listener;
/// ```
pub fn listener_fn<F>(f: F) -> FnListener<F>
where
    F: Fn(&EventStore, &Event) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    FnListener(f)
}

impl<F> Listener for FnListener<F>
where
    F: Fn(&EventStore, &Event) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    fn on_event<'a>(
        &'a self,
        store: &'a EventStore,
        event: &'a Event,
    ) -> BoxFuture<'a, Result<(), ListenerError>> {
        Box::pin(std::future::ready((self.0)(store, event)))
    }
}

/// The worker's side of a registered listener: its queue and backlog count.
pub(crate) struct Mailbox {
    id: ListenerId,
    inbox: mpsc::UnboundedSender<Event>,
    backlog: Arc<AtomicUsize>,
}

impl Mailbox {
    /// Starts the listener's task and returns the handle the worker keeps.
    ///
    /// The task holds only a weak handle to the store, upgraded per delivery.
    pub(super) fn spawn(
        id: ListenerId,
        listener: Arc<dyn Listener>,
        handle: mpsc::WeakUnboundedSender<Request>,
        config: StoreConfig,
    ) -> Self {
        let (inbox, deliveries) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run(
            id,
            listener,
            handle,
            config,
            deliveries,
            backlog.clone(),
        ));
        Self { id, inbox, backlog }
    }

    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }

    /// Queues `event` without waiting for the listener.
    pub(crate) fn deliver(&self, event: Event, backlog_warning: usize) {
        let queued = self.backlog.fetch_add(1, Ordering::SeqCst) + 1;
        if queued == backlog_warning {
            warn!(
                listener = %self.id,
                backlog = queued,
                "Listener is falling behind"
            );
        }
        if self.inbox.send(event).is_err() {
            self.backlog.fetch_sub(1, Ordering::SeqCst);
            warn!(listener = %self.id, "Listener task is gone, event not delivered");
        }
    }
}

async fn run(
    id: ListenerId,
    listener: Arc<dyn Listener>,
    handle: mpsc::WeakUnboundedSender<Request>,
    config: StoreConfig,
    mut deliveries: mpsc::UnboundedReceiver<Event>,
    backlog: Arc<AtomicUsize>,
) {
    while let Some(event) = deliveries.recv().await {
        backlog.fetch_sub(1, Ordering::SeqCst);
        let Some(requests) = handle.upgrade() else {
            debug!(listener = %id, sequence = %event.sequence(), "Store is gone, skipping delivery");
            continue;
        };
        let store = EventStore { requests, config };
        let outcome = AssertUnwindSafe(async { listener.on_event(&store, &event).await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(
                listener = %id,
                sequence = %event.sequence(),
                error = %error,
                "Listener failed to handle event"
            ),
            Err(_) => warn!(
                listener = %id,
                sequence = %event.sequence(),
                "Listener panicked while handling event"
            ),
        }
    }
    debug!(listener = %id, "Listener stopped");
}
