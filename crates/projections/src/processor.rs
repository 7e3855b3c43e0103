//! Feeds store events to projections.

use std::sync::Arc;

use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

/// Delivers the global event stream to registered projections.
///
/// Catch-up is incremental: each projection only receives events past its
/// own position. Concurrent catch-ups are serialized so no event is applied
/// twice.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Arc<dyn Projection>>,
    catch_up_lock: Mutex<()>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            catch_up_lock: Mutex::new(()),
        }
    }

    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        tracing::debug!(projection = projection.name(), "projection registered");
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Brings every projection up to the end of the store. Returns how many
    /// events were applied across all projections.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let _guard = self.catch_up_lock.lock().await;

        let mut stream = self.store.stream_all_events().await?;
        let mut index: u64 = 0;
        let mut applied: u64 = 0;

        while let Some(event) = stream.next().await {
            let event = event?;
            index += 1;

            for projection in &self.projections {
                if projection.position().await.events_seen >= index {
                    continue;
                }
                if projection.wants(&event) {
                    projection.handle(&event).await?;
                    applied += 1;
                } else {
                    projection.skip().await;
                }
            }
        }

        if applied > 0 {
            metrics::counter!("projection_events_applied_total").increment(applied);
            tracing::debug!(applied, stream_len = index, "catch-up complete");
        }
        Ok(applied)
    }

    /// Delivers one freshly appended event to every projection.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        let _guard = self.catch_up_lock.lock().await;
        for projection in &self.projections {
            if projection.wants(event) {
                projection.handle(event).await?;
            } else {
                projection.skip().await;
            }
        }
        Ok(())
    }

    /// Empties every projection and replays the whole store.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64> {
        {
            let _guard = self.catch_up_lock.lock().await;
            for projection in &self.projections {
                projection.reset().await?;
            }
        }
        tracing::info!(projections = self.projections.len(), "rebuilding projections");
        self.run_catch_up().await
    }
}
