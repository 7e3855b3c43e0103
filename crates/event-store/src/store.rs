use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version};

/// Options for appending events to a single aggregate.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the aggregate. `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// Pending events for one aggregate inside an atomic batch.
#[derive(Debug, Clone)]
pub struct AggregateChanges {
    /// Version the aggregate had when the caller loaded it.
    pub expected_version: Version,
    pub events: Vec<EventEnvelope>,
}

impl AggregateChanges {
    pub fn new(expected_version: Version, events: Vec<EventEnvelope>) -> Self {
        Self {
            expected_version,
            events,
        }
    }

    /// Returns the aggregate these changes target, if any events are present.
    pub fn aggregate_id(&self) -> Option<AggregateId> {
        self.events.first().map(|e| e.aggregate_id)
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Core trait for event store implementations.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events for a single aggregate.
    ///
    /// Fails with `ConcurrencyConflict` when `options.expected_version`
    /// does not match the stored version. Returns the new version.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Appends events for several aggregates in one atomic step.
    ///
    /// Every entry is checked against its expected version before anything
    /// is written. A single mismatch rejects the whole batch.
    async fn append_atomic(&self, changes: Vec<AggregateChanges>) -> Result<()>;

    /// Retrieves all events for an aggregate in version order.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>>;

    /// Streams every stored event in insertion order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Returns None if the aggregate has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;
}

#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one aggregate with consecutive versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events must target the same aggregate".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {expected_version}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

/// Validates an atomic batch: each entry well-formed, each aggregate once,
/// and every entry starting right after its expected version.
pub fn validate_changes(changes: &[AggregateChanges]) -> Result<()> {
    if changes.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "cannot commit an empty batch".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(changes.len());
    for change in changes {
        validate_events_for_append(&change.events)?;
        let first = &change.events[0];
        if !seen.insert(first.aggregate_id) {
            return Err(EventStoreError::InvalidAppend(format!(
                "aggregate {} appears twice in one batch",
                first.aggregate_id
            )));
        }
        if first.version != change.expected_version.next() {
            return Err(EventStoreError::InvalidAppend(format!(
                "aggregate {} expected at {} but first event is version {}",
                first.aggregate_id, change.expected_version, first.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Wallet")
            .event_type("WalletCredited")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn rejects_empty_list() {
        assert!(validate_events_for_append(&[]).is_err());
    }

    #[test]
    fn rejects_gaps_in_versions() {
        let id = AggregateId::new();
        assert!(validate_events_for_append(&[event(id, 1), event(id, 3)]).is_err());
        assert!(validate_events_for_append(&[event(id, 1), event(id, 2)]).is_ok());
    }

    #[test]
    fn rejects_mixed_aggregates() {
        let events = [event(AggregateId::new(), 1), event(AggregateId::new(), 2)];
        assert!(validate_events_for_append(&events).is_err());
    }

    #[test]
    fn batch_rejects_duplicate_aggregates() {
        let id = AggregateId::new();
        let changes = vec![
            AggregateChanges::new(Version::initial(), vec![event(id, 1)]),
            AggregateChanges::new(Version::first(), vec![event(id, 2)]),
        ];
        assert!(validate_changes(&changes).is_err());
    }

    #[test]
    fn batch_rejects_version_not_following_expected() {
        let id = AggregateId::new();
        let changes = vec![AggregateChanges::new(Version::new(4), vec![event(id, 1)])];
        assert!(validate_changes(&changes).is_err());
    }
}
