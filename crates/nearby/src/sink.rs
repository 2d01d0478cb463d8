// Event Sink - single-slot, last-writer-wins outbound event channel

use crate::NearbyEvent;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Receiving end handed to the current consumer.
///
/// Ends (returns `None`) once a newer consumer replaces it or the slot is cancelled.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<NearbyEvent>,
}

impl EventStream {
    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<NearbyEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<NearbyEvent> {
        self.rx.try_recv().ok()
    }

    /// Take every event queued so far
    pub fn drain(&mut self) -> Vec<NearbyEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Holds at most one registered consumer
#[derive(Clone, Default)]
pub struct EventSink {
    slot: Arc<RwLock<Option<mpsc::UnboundedSender<NearbyEvent>>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new consumer, replacing any previous one
    pub async fn listen(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.slot.write().await.replace(tx);
        if previous.is_some() {
            debug!("Replaced previous event consumer");
        }
        EventStream { rx }
    }

    /// Deregister the current consumer
    pub async fn cancel(&self) {
        if self.slot.write().await.take().is_some() {
            debug!("Event consumer cancelled");
        }
    }

    /// Check whether a consumer is registered
    pub async fn has_listener(&self) -> bool {
        match self.slot.read().await.as_ref() {
            Some(tx) => !tx.is_closed(),
            None => false,
        }
    }

    /// Push an event to the current consumer, dropping it if there is none
    pub async fn emit(&self, event: NearbyEvent) {
        let mut slot = self.slot.write().await;
        let Some(tx) = slot.as_ref() else {
            debug!(kind = event.kind(), "No event consumer, dropping event");
            return;
        };

        if tx.send(event).is_err() {
            debug!("Event consumer went away, clearing slot");
            *slot = None;
        }
    }
}
