//! Single delivery loop for broadcast events.
//!
//! Events are queued on an unbounded channel and delivered one at a time in
//! publish order. Each event is written to every registered connection while
//! the registry lock is held, so one slow peer delays the peers after it
//! (each write is still bounded by the connection's write timeout).

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    message::{PlayerId, ServerEvent},
    registry::Registry,
};

#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<ServerEvent>,
}

/// Outcome of one delivery pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub failed: Vec<PlayerId>,
}

impl Dispatcher {
    /// Starts the delivery task. It runs until every `Dispatcher` clone has
    /// been dropped.
    pub fn spawn(registry: Arc<Registry>) -> (Self, JoinHandle<()>) {
        let (queue, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(events, registry));
        (Self { queue }, task)
    }

    pub fn publish(&self, event: ServerEvent) {
        if let Err(error) = self.queue.send(event) {
            warn!(event = error.0.kind(), "delivery loop stopped; dropping event");
        }
    }
}

async fn run(mut events: mpsc::UnboundedReceiver<ServerEvent>, registry: Arc<Registry>) {
    while let Some(event) = events.recv().await {
        let report = deliver(&registry, &event).await;
        debug!(
            event = event.kind(),
            attempted = report.attempted,
            failed = report.failed.len(),
            "event delivered"
        );
    }
}

/// Writes `event` to every registered connection. Connections that reject
/// the write are removed from the registry and closed.
pub async fn deliver(registry: &Registry, event: &ServerEvent) -> DeliveryReport {
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(error) => {
            warn!(event = event.kind(), ?error, "failed to encode event");
            return DeliveryReport::default();
        }
    };

    let mut report = DeliveryReport::default();
    let mut dropped = Vec::new();
    {
        let mut inner = registry.lock().await;
        for (id, handle) in inner.connections() {
            report.attempted += 1;
            if let Err(error) = handle.write_message(frame.clone()).await {
                warn!(player = %id, %error, "failed to deliver event; dropping connection");
                report.failed.push(id.clone());
            }
        }
        for id in &report.failed {
            if let Some(handle) = inner.remove(id) {
                dropped.push(handle);
            }
        }
    }

    for handle in dropped {
        handle.close().await;
    }

    report
}
