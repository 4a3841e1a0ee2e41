//! Typed event fan-out
//!
//! Each component owns an [`Emitter`] over its own event enum. Subscribers get
//! an [`EventStream`] that yields events in emission order; a slow
//! subscriber never drops events and never blocks the emitter.

use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

/// Fan-out sender for a typed event enum
#[derive(Debug)]
pub struct Emitter<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone + Send + 'static> Emitter<E> {
    /// Create an emitter with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber
    ///
    /// The stream only sees events emitted after this call.
    pub fn subscribe(&self) -> EventStream<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        EventStream::new(rx)
    }

    /// Deliver an event to every live subscriber
    ///
    /// Returns the number of subscribers that received it. Subscribers whose
    /// stream was dropped are pruned.
    pub fn emit(&self, event: E) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        trace!(subscribers = subscribers.len(), "event emitted");
        subscribers.len()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl<E: Clone + Send + 'static> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered stream of events from one [`Emitter`]
#[derive(Debug)]
pub struct EventStream<E> {
    receiver: mpsc::UnboundedReceiver<E>,
}

impl<E> EventStream<E> {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<E>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<E>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Drain every event already queued
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        First,
        Second(u32),
    }

    #[tokio::test]
    async fn test_emit_in_order() {
        let emitter = Emitter::new();
        let mut stream = emitter.subscribe();

        emitter.emit(TestEvent::First);
        emitter.emit(TestEvent::Second(7));

        assert_eq!(stream.next().await, Some(TestEvent::First));
        assert_eq!(stream.next().await, Some(TestEvent::Second(7)));
        assert_eq!(stream.try_next().unwrap(), None);
    }

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let emitter = Emitter::new();
        let mut a = emitter.subscribe();
        let mut b = emitter.subscribe();

        assert_eq!(emitter.emit(TestEvent::Second(1)), 2);
        assert_eq!(a.drain(), vec![TestEvent::Second(1)]);
        assert_eq!(b.drain(), vec![TestEvent::Second(1)]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let emitter = Emitter::new();
        let stream = emitter.subscribe();
        let mut kept = emitter.subscribe();
        drop(stream);

        assert_eq!(emitter.emit(TestEvent::First), 1);
        assert_eq!(emitter.subscriber_count(), 1);
        assert_eq!(kept.drain(), vec![TestEvent::First]);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let emitter = Emitter::new();
        emitter.emit(TestEvent::First);
        let mut late = emitter.subscribe();
        assert!(late.drain().is_empty());
    }
}
