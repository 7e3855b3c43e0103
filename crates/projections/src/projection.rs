//! Projection trait and checkpoint.

use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::Result;

/// How far into the global event log a projection has read.
///
/// Every event counts, including the ones a projection ignores, so the
/// position lines up with the store's stream order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProjectionPosition {
    pub events_seen: u64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn advance(&self) -> Self {
        Self {
            events_seen: self.events_seen + 1,
        }
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "position({})", self.events_seen)
    }
}

/// Folds store events into a read model.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Aggregate types whose events this projection reads. Anything else
    /// only advances the position.
    fn aggregate_types(&self) -> &'static [&'static str];

    /// Applies one event and advances the position.
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    /// Advances the position without reading the event.
    async fn skip(&self);

    async fn position(&self) -> ProjectionPosition;

    /// Clears the read model back to an empty log.
    async fn reset(&self) -> Result<()>;

    fn wants(&self, event: &EventEnvelope) -> bool {
        self.aggregate_types().contains(&event.aggregate_type.as_str())
    }
}
