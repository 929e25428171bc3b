//! Request coalescing for a single resource.
//!
//! A [`Coalescer`] turns a one-shot asynchronous producer into a broadcast:
//! every subscriber becomes a waiter with its own channel, and the producer
//! is started only for the first waiter or once a previous round has
//! delivered at least one value. Overlapping subscribers therefore share one
//! in-flight fetch, while later subscribers still get a production round of
//! their own.
//!
//! Production rounds run as spawned tokio tasks. Dropping or unsubscribing a
//! waiter never cancels a round that is already under way.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tracing::{debug, error};

/// Boxed producer invoked once per production round.
pub type Producer<T> = Arc<dyn Fn(Broadcast<T>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum Notification<T> {
    Next(T),
    Complete,
}

struct Waiter<T> {
    id: WaiterId,
    tx: UnboundedSender<Notification<T>>,
}

struct Waiters<T> {
    list: Vec<Waiter<T>>,
    loaded: bool,
    next_id: u64,
}

struct Shared<T> {
    waiters: Mutex<Waiters<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Waiters<T>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: WaiterId) -> bool {
        let mut waiters = self.lock();
        match waiters.list.iter().position(|w| w.id == id) {
            Some(index) => {
                waiters.list.remove(index);
                true
            }
            None => false,
        }
    }
}

pub struct Coalescer<T> {
    shared: Arc<Shared<T>>,
    producer: Producer<T>,
}

impl<T> Clone for Coalescer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T: Clone + Send + 'static> Coalescer<T> {
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: Fn(Broadcast<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                waiters: Mutex::new(Waiters {
                    list: Vec::new(),
                    loaded: false,
                    next_id: 0,
                }),
            }),
            producer: Arc::new(move |sink| producer(sink).boxed()),
        }
    }

    /// Register a new waiter, starting a production round when it is the
    /// only waiter or when an earlier round already produced a value.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = unbounded();
        let (id, start) = {
            let mut waiters = self.shared.lock();
            let id = WaiterId(waiters.next_id);
            waiters.next_id += 1;
            waiters.list.push(Waiter { id, tx });
            (id, waiters.list.len() == 1 || waiters.loaded)
        };

        if start {
            debug!(waiter = %id, "Starting production round");
            let round = (self.producer)(Broadcast {
                shared: Arc::clone(&self.shared),
            });
            tokio::spawn(round);
        } else {
            debug!(waiter = %id, "Joined in-flight production round");
        }

        Subscription {
            id,
            rx,
            shared: Arc::clone(&self.shared),
            finished: false,
        }
    }

    /// Remove a waiter. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: WaiterId) -> bool {
        self.shared.remove(id)
    }

    pub fn waiter_count(&self) -> usize {
        self.shared.lock().list.len()
    }

    /// True once any round has delivered a value.
    pub fn is_loaded(&self) -> bool {
        self.shared.lock().loaded
    }
}

/// Sink handed to the producer. Every call reaches the waiters registered at
/// that moment.
pub struct Broadcast<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> Broadcast<T> {
    pub fn next(&self, value: T) {
        let mut waiters = self.shared.lock();
        waiters
            .list
            .retain(|w| w.tx.unbounded_send(Notification::Next(value.clone())).is_ok());
        waiters.loaded = true;
    }

    /// Errors are logged only; waiters stay subscribed.
    pub fn error<E: fmt::Display>(&self, err: E) {
        error!(error = %err, "Producer reported an error");
    }

    /// Completes and releases every waiter registered right now.
    pub fn complete(&self) {
        let released = std::mem::take(&mut self.shared.lock().list);
        for waiter in released {
            let _ = waiter.tx.unbounded_send(Notification::Complete);
        }
    }
}

/// One waiter's view of the broadcast. Ends when a round completes or the
/// waiter unsubscribes; dropping it unsubscribes.
pub struct Subscription<T> {
    id: WaiterId,
    rx: UnboundedReceiver<Notification<T>>,
    shared: Arc<Shared<T>>,
    finished: bool,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Safe to call any number of times. Values emitted before the call but
    /// not yet read are discarded.
    pub fn unsubscribe(&mut self) {
        self.shared.remove(self.id);
        self.finished = true;
        self.rx.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_next_unpin(cx) {
            Poll::Ready(Some(Notification::Next(value))) => Poll::Ready(Some(value)),
            Poll::Ready(Some(Notification::Complete)) | Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.shared.remove(self.id);
    }
}
