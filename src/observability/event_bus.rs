//! Broadcast event bus owned by the interaction context.

use crate::models::SymbiontEvent;
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1024;

/// Bounded broadcast channel of [`SymbiontEvent`]s.
///
/// Publishing never blocks: slow subscribers lose the oldest events and
/// observe a lag, which is counted.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SymbiontEvent>,
}

/// Receiver that yields only events matching a predicate.
pub struct FilteredReceiver<F> {
    receiver: broadcast::Receiver<SymbiontEvent>,
    predicate: F,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    /// Creates an event bus with the given buffer capacity (at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, event: SymbiontEvent) {
        let event_type = event.event_type();
        metrics::counter!("event_bus_publish_total", "event_type" => event_type).increment(1);
        if self.sender.send(event).is_err() {
            // No subscribers.
            metrics::counter!("event_bus_unobserved_total", "event_type" => event_type)
                .increment(1);
        }
    }

    /// Subscribes to every event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SymbiontEvent> {
        metrics::counter!("event_bus_subscriptions_total").increment(1);
        self.sender.subscribe()
    }

    /// Subscribes with a predicate.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> FilteredReceiver<F>
    where
        F: Fn(&SymbiontEvent) -> bool,
    {
        FilteredReceiver {
            receiver: self.subscribe(),
            predicate,
        }
    }

    /// Subscribes to one event type, e.g. `band_changed`.
    #[must_use]
    pub fn subscribe_event_type(
        &self,
        event_type: &'static str,
    ) -> FilteredReceiver<impl Fn(&SymbiontEvent) -> bool> {
        self.subscribe_filtered(move |event| event.event_type() == event_type)
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&SymbiontEvent) -> bool,
{
    /// Receives the next matching event, skipping over lag.
    ///
    /// # Errors
    ///
    /// Returns [`broadcast::error::RecvError::Closed`] once the bus is dropped.
    pub async fn recv(&mut self) -> Result<SymbiontEvent, broadcast::error::RecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if (self.predicate)(&event) => return Ok(event),
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged");
                    metrics::counter!("event_bus_lagged_total").increment(skipped);
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Returns the next buffered matching event without waiting.
    pub fn try_recv(&mut self) -> Option<SymbiontEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if (self.predicate)(&event) => return Some(event),
                Ok(_) => {},
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    metrics::counter!("event_bus_lagged_total").increment(skipped);
                },
                Err(_) => return None,
            }
        }
    }
}
