use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version,
    store::{
        AggregateChanges, AppendOptions, EventStore, EventStream, validate_changes,
        validate_events_for_append,
    },
};

#[derive(Default)]
struct Log {
    events: Vec<EventEnvelope>,
    versions: HashMap<AggregateId, Version>,
}

impl Log {
    fn current_version(&self, aggregate_id: AggregateId) -> Version {
        self.versions
            .get(&aggregate_id)
            .copied()
            .unwrap_or_else(Version::initial)
    }

    /// Mirrors the unique (aggregate_id, version) constraint of the SQL schema.
    fn check(
        &self,
        events: &[EventEnvelope],
        expected: Option<Version>,
    ) -> Result<(AggregateId, Version)> {
        let first = &events[0];
        let aggregate_id = first.aggregate_id;
        let current = self.current_version(aggregate_id);

        if let Some(expected) = expected
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }
        if first.version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected.unwrap_or(current),
                actual: current,
            });
        }

        let last = events.last().map(|e| e.version).unwrap_or(current);
        Ok((aggregate_id, last))
    }

    fn write(&mut self, aggregate_id: AggregateId, last: Version, events: Vec<EventEnvelope>) {
        self.versions.insert(aggregate_id, last);
        self.events.extend(events);
    }
}

/// In-memory event store.
///
/// Behaves like the PostgreSQL store, including atomic multi-aggregate
/// commits, so services can be exercised without a database.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

fn matches_query(event: &EventEnvelope, query: &EventQuery) -> bool {
    if let Some(id) = query.aggregate_id
        && event.aggregate_id != id
    {
        return false;
    }
    if let Some(ref aggregate_type) = query.aggregate_type
        && &event.aggregate_type != aggregate_type
    {
        return false;
    }
    if let Some(ref types) = query.event_types
        && !types.contains(&event.event_type)
    {
        return false;
    }
    true
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let mut log = self.log.write().await;
        let (aggregate_id, last) = log.check(&events, options.expected_version)?;
        log.write(aggregate_id, last, events);

        Ok(last)
    }

    async fn append_atomic(&self, changes: Vec<AggregateChanges>) -> Result<()> {
        validate_changes(&changes)?;

        let mut log = self.log.write().await;

        // Check everything before writing anything.
        let mut checked = Vec::with_capacity(changes.len());
        for change in &changes {
            match log.check(&change.events, Some(change.expected_version)) {
                Ok(checked_change) => checked.push(checked_change),
                Err(e) => {
                    metrics::counter!("event_store_conflicts_total", "store" => "memory").increment(1);
                    return Err(e);
                }
            }
        }

        let mut appended = 0;
        for ((aggregate_id, last), change) in checked.into_iter().zip(changes) {
            appended += change.events.len();
            log.write(aggregate_id, last, change.events);
        }

        metrics::counter!("events_appended_total", "store" => "memory").increment(appended as u64);
        tracing::trace!(appended, total = log.events.len(), "atomic append committed");
        Ok(())
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let mut events: Vec<_> = log
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        // Insertion order already matches commit order.
        let events = log
            .events
            .iter()
            .filter(|e| matches_query(e, &query))
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(events)
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        self.query_events(EventQuery::for_event_type(event_type))
            .await
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.log.read().await.events.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        Ok(self.log.read().await.versions.get(&aggregate_id).copied())
    }
}
