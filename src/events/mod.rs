//! Downstream events and their delivery.
//!
//! Events are collected while the engine lock is held and handed to the
//! [`Dispatcher`] afterwards. Delivery runs on a spawned task, so a slow or
//! failing sink never holds up the tick or a topology update.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::types::NetChar;

/// A change notification for downstream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A terminal moved to another POA, or lost its radio link.
    #[serde(rename = "MOBILITY")]
    Mobility { ue: String, dest: String },

    /// The set of POAs in range of a terminal changed.
    #[serde(rename = "POAS-IN-RANGE")]
    PoasInRange { ue: String, poas: Vec<String> },

    /// New modeled network characteristics for an element.
    #[serde(rename = "NETWORK-CHARACTERISTICS-UPDATE", rename_all = "camelCase")]
    NetCharUpdate {
        element_name: String,
        element_type: String,
        net_char: NetChar,
    },
}

impl Event {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Mobility { .. } => "MOBILITY",
            Event::PoasInRange { .. } => "POAS-IN-RANGE",
            Event::NetCharUpdate { .. } => "NETWORK-CHARACTERISTICS-UPDATE",
        }
    }

    /// Name of the element the event is about.
    pub fn subject(&self) -> &str {
        match self {
            Event::Mobility { ue, .. } | Event::PoasInRange { ue, .. } => ue,
            Event::NetCharUpdate { element_name, .. } => element_name,
        }
    }
}

/// A downstream event consumer.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Sink name used in logs.
    fn name(&self) -> &str;

    /// Deliver one event.
    async fn deliver(&self, event: Event) -> Result<()>;
}

/// In-process fan-out to any number of subscribers.
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to delivered events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn deliver(&self, event: Event) -> Result<()> {
        // No subscriber is not a failure
        if self.tx.receiver_count() == 0 {
            trace!("No subscriber for {} event", event.kind());
            return Ok(());
        }
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|e| Error::Internal(format!("broadcast send failed: {e}")))
    }
}

/// Writes every event to the log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: Event) -> Result<()> {
        match event {
            Event::Mobility { ref ue, ref dest } => info!("MOBILITY {} -> {}", ue, dest),
            Event::PoasInRange { ref ue, ref poas } => info!("POAS-IN-RANGE {} {:?}", ue, poas),
            Event::NetCharUpdate {
                ref element_name,
                ref element_type,
                net_char,
            } => info!(
                "NETWORK-CHARACTERISTICS-UPDATE {} ({}) ul={} dl={} loss={}",
                element_name,
                element_type,
                net_char.throughput_ul,
                net_char.throughput_dl,
                net_char.packet_loss
            ),
        }
        Ok(())
    }
}

/// Fire-and-forget delivery to a set of sinks.
#[derive(Clone, Default)]
pub struct Dispatcher {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Deliver `events` in order on a background task.
    ///
    /// Outside a tokio runtime the batch is dropped with a warning.
    pub fn dispatch(&self, events: Vec<Event>) {
        if events.is_empty() || self.sinks.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime, dropping {} events", events.len());
            return;
        };
        let sinks = self.sinks.clone();
        handle.spawn(async move {
            deliver_all(&sinks, events).await;
        });
    }
}

async fn deliver_all(sinks: &[Arc<dyn EventSink>], events: Vec<Event>) {
    debug!("Delivering {} events to {} sinks", events.len(), sinks.len());
    for event in events {
        for sink in sinks {
            if let Err(e) = sink.deliver(event.clone()).await {
                warn!(
                    "Failed to deliver {} event for {} to {}: {}",
                    event.kind(),
                    event.subject(),
                    sink.name(),
                    e
                );
            }
        }
    }
}
