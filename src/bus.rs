//! Per-entity state bus (spec.md §4.5): maintains current state plus a set
//! of subscribers, and binds to SSE for the HTTP layer.

use std::sync::Arc;

use axum::response::sse::Event;
use futures_util::stream::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

/// Bounded per-subscriber queue depth. Because entity state is a small
/// discriminated union with last-write-wins semantics, subscribers only ever
/// need the latest message buffered — a handful of slots is plenty of
/// slack for a slow SSE consumer before we give up on it.
const SUBSCRIBER_QUEUE_DEPTH: usize = 16;

struct Inner<T> {
    state: T,
    subscribers: Vec<mpsc::Sender<T>>,
}

/// A live SSE client attached to a [`Bus`]; receives the snapshot at
/// subscription time, then each subsequent update, until closed or the
/// producer tears the entity down.
pub struct Subscriber<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscriber<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

/// Per-entity event target: one [`Bus`] per live Share or Download.
pub struct Bus<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Bus<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: initial,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Replace current state with `update` and fan it out to every live
    /// subscriber, in registration order. Delivery is non-blocking to the
    /// caller: each subscriber has its own bounded queue, and a subscriber
    /// whose queue is full is dropped (its SSE stream ends) rather than
    /// stalling the publisher.
    pub async fn publish(&self, update: T) {
        let mut inner = self.inner.lock().await;
        Self::fan_out(&mut inner, update);
    }

    /// Atomic read-modify-publish: `f` inspects the current state and
    /// either returns the next state (published immediately, under the same
    /// lock `publish`/`subscribe` use — no other transition can interleave)
    /// or rejects the transition with `Err`.
    pub async fn try_update<E>(&self, f: impl FnOnce(&T) -> Result<T, E>) -> Result<T, E> {
        let mut inner = self.inner.lock().await;
        let next = f(&inner.state)?;
        Self::fan_out(&mut inner, next.clone());
        Ok(next)
    }

    fn fan_out(inner: &mut Inner<T>, update: T) {
        inner.state = update.clone();
        inner.subscribers.retain(|tx| match tx.try_send(update.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("subscriber queue overflowed; dropping subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Read the current state without subscribing.
    pub async fn snapshot(&self) -> T {
        self.inner.lock().await.state.clone()
    }

    /// Subscribe: synchronously enqueue the current snapshot as the first
    /// message, then attach to the live update stream. There is no gap
    /// between the snapshot and any update published after this call
    /// returns, because both operations happen under the same lock.
    pub async fn subscribe(&self) -> Subscriber<T> {
        let mut inner = self.inner.lock().await;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        // Snapshot delivery never blocks: the channel is freshly created
        // and empty, so `try_send` cannot fail with `Full`.
        let _ = tx.try_send(inner.state.clone());
        inner.subscribers.push(tx);
        Subscriber { rx }
    }
}

/// Turn a [`Subscriber`] into an SSE byte stream: `data: <json>\n\n` per
/// message (spec.md §6 wire format).
pub fn sse_stream<T>(mut sub: Subscriber<T>) -> impl Stream<Item = Result<Event, std::convert::Infallible>>
where
    T: Serialize + Send + 'static,
{
    async_stream::stream! {
        while let Some(update) = sub.recv().await {
            match serde_json::to_string(&update) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(err) => tracing::error!(?err, "failed to serialize SSE update"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Counter(u32);

    #[tokio::test]
    async fn subscriber_sees_snapshot_before_update() {
        let bus = Bus::new(Counter(0));
        let mut sub = bus.subscribe().await;
        bus.publish(Counter(1)).await;

        assert_eq!(sub.recv().await, Some(Counter(0)));
        assert_eq!(sub.recv().await, Some(Counter(1)));
    }

    #[tokio::test]
    async fn updates_delivered_in_order_to_multiple_subscribers() {
        let bus = Bus::new(Counter(0));
        let mut a = bus.subscribe().await;
        let mut b = bus.subscribe().await;

        bus.publish(Counter(1)).await;
        bus.publish(Counter(2)).await;

        assert_eq!(a.recv().await, Some(Counter(0)));
        assert_eq!(a.recv().await, Some(Counter(1)));
        assert_eq!(a.recv().await, Some(Counter(2)));

        assert_eq!(b.recv().await, Some(Counter(0)));
        assert_eq!(b.recv().await, Some(Counter(1)));
        assert_eq!(b.recv().await, Some(Counter(2)));
    }

    #[tokio::test]
    async fn dropped_receiver_is_unlinked_lazily_on_next_publish() {
        let bus = Bus::new(Counter(0));
        let sub = bus.subscribe().await;
        drop(sub);

        // Does not panic or block; the stale sender is pruned here.
        bus.publish(Counter(1)).await;
        assert_eq!(bus.inner.lock().await.subscribers.len(), 0);
    }
}
