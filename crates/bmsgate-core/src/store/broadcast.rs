// ── Per-subscriber change fan-out ──
//
// Each subscriber owns a bounded mailbox, so publishing never blocks on a
// slow consumer. A subscriber whose mailbox is full is disconnected rather
// than skipped: it drains what was already delivered, then its stream ends
// with `lagged()` set. A live subscriber therefore never sees a gap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default mailbox capacity per subscriber.
pub const SUBSCRIBER_CAPACITY: usize = 1024;

/// Fans a single producer out to N independent subscribers.
///
/// Not internally synchronized: the owner (a cell or table) publishes while
/// holding its own lock, which is what gives every subscriber the exact
/// order in which changes were applied.
#[derive(Debug)]
pub struct ChangeBroadcaster<E> {
    capacity: usize,
    subscribers: Vec<Mailbox<E>>,
}

#[derive(Debug)]
struct Mailbox<E> {
    tx: mpsc::Sender<E>,
    lagged: Arc<AtomicBool>,
}

impl<E: Clone + Send + 'static> ChangeBroadcaster<E> {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_CAPACITY)
    }

    /// A broadcaster whose subscribers can fall at most `capacity` events
    /// behind before they are disconnected.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber. It sees every event published after this call.
    pub fn subscribe(&mut self) -> Subscription<E> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let lagged = Arc::new(AtomicBool::new(false));
        self.subscribers.push(Mailbox {
            tx,
            lagged: Arc::clone(&lagged),
        });
        Subscription { rx, lagged }
    }

    /// Deliver `event` to every live subscriber. Returns how many received it.
    pub fn send(&mut self, event: &E) -> usize {
        let capacity = self.capacity;
        self.subscribers
            .retain(|mailbox| match mailbox.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    mailbox.lagged.store(true, Ordering::Release);
                    warn!(capacity, "subscriber fell behind, disconnecting");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });
        self.subscribers.len()
    }

    /// Number of subscribers whose receiving side is still alive.
    pub fn subscriber_count(&mut self) -> usize {
        self.subscribers.retain(|mailbox| !mailbox.tx.is_closed());
        self.subscribers.len()
    }

    /// Drop every mailbox. Subscribers drain what was already delivered and
    /// then observe end-of-stream.
    pub fn close(&mut self) {
        self.subscribers.clear();
    }
}

impl<E: Clone + Send + 'static> Default for ChangeBroadcaster<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving half of one subscriber's mailbox.
#[derive(Debug)]
pub struct Subscription<E> {
    rx: mpsc::Receiver<E>,
    lagged: Arc<AtomicBool>,
}

impl<E: Send + 'static> Subscription<E> {
    /// Wait for the next event. `None` once the producer closed the mailbox
    /// or disconnected this subscriber for falling behind.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Whether the producer disconnected this subscriber because its
    /// mailbox was full.
    pub fn lagged(&self) -> bool {
        self.lagged.load(Ordering::Acquire)
    }

    /// Convert into a stream that ends when `cancel` fires or the producer
    /// closes the mailbox.
    pub fn into_stream(mut self, cancel: CancellationToken) -> BoxStream<'static, E> {
        Box::pin(async_stream::stream! {
            loop {
                let event = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    event = self.rx.recv() => event,
                };
                match event {
                    Some(event) => yield event,
                    None => break,
                }
            }
        })
    }
}
