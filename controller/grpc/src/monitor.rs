//! Keeps the agent telemetry stream open and feeds its batches to the
//! reconciler.

use crate::{
    backoff::{Backoff, BackoffConfig},
    metrics::MonitorMetrics,
};
use aegis_controller_core::{AgentError, TelemetryBatch};
use std::{pin::Pin, time::Duration};
use tokio::{sync::broadcast, time};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

pub type BatchStream =
    Pin<Box<dyn Stream<Item = Result<TelemetryBatch, AgentError>> + Send + 'static>>;

/// Opens a fresh telemetry stream. Each call performs a full reconnect.
#[async_trait::async_trait]
pub trait MonitorSource: Send + Sync {
    async fn open(&self) -> Result<BatchStream, AgentError>;
}

/// The reconnect loop around a [`MonitorSource`].
///
/// Batches are published on a bounded broadcast queue. A slow consumer loses
/// the oldest batches rather than stalling the stream.
pub struct Monitor<S> {
    source: S,
    backoff: Backoff,
    batches: broadcast::Sender<TelemetryBatch>,
    metrics: MonitorMetrics,
}

// === impl Monitor ===

impl<S: MonitorSource> Monitor<S> {
    pub fn new(
        source: S,
        backoff: BackoffConfig,
        batches: broadcast::Sender<TelemetryBatch>,
        metrics: MonitorMetrics,
    ) -> Self {
        Self {
            source,
            backoff: Backoff::new(backoff),
            batches,
            metrics,
        }
    }

    /// Runs forever.
    pub async fn run(mut self) {
        loop {
            let delay = self.stream_once().await;
            info!(?delay, "Reconnecting to agent");
            time::sleep(delay).await;
        }
    }

    /// Opens one stream, forwards its batches until it ends, and returns the
    /// delay before the next attempt.
    pub async fn stream_once(&mut self) -> Duration {
        self.metrics.connect();
        let started = time::Instant::now();

        match self.source.open().await {
            Ok(mut stream) => {
                info!("Monitoring agent sessions");
                loop {
                    match stream.next().await {
                        Some(Ok(batch)) => {
                            self.metrics.batch_received();
                            debug!(flows = batch.flows.len(), "Telemetry batch");
                            if self.batches.send(batch).is_err() {
                                debug!("No telemetry consumer");
                            }
                        }
                        Some(Err(error)) => {
                            warn!(%error, "Telemetry stream failed");
                            break;
                        }
                        None => {
                            warn!("Telemetry stream closed by agent");
                            break;
                        }
                    }
                }
            }
            Err(error) => warn!(%error, "Failed to open telemetry stream"),
        }

        let streamed_for = started.elapsed();
        let delay = self.backoff.next_delay(streamed_for);
        self.metrics.disconnect(delay);
        delay
    }
}
