//! Loading aggregates and committing changes across several of them.

use std::collections::HashMap;

use common::AggregateId;
use event_store::{AggregateChanges, EventEnvelope, EventStore};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Metadata key stamped on every event written by a unit of work.
pub const UNIT_OF_WORK_KEY: &str = "unit_of_work";

/// Events staged against one or more aggregates, committed all-or-nothing.
///
/// Recording events applies them to the caller's in-memory aggregate right
/// away, so later decisions in the same unit see the updated state. Nothing
/// reaches the store until [`Repository::commit`].
#[derive(Debug)]
pub struct UnitOfWork {
    id: Uuid,
    changes: Vec<AggregateChanges>,
    index: HashMap<AggregateId, usize>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            changes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Applies `events` to `aggregate` and stages them for commit.
    ///
    /// The aggregate must be the same instance across calls within one unit;
    /// versions continue from wherever the previous call left it.
    pub fn record<A: Aggregate>(
        &mut self,
        aggregate: &mut A,
        events: Vec<A::Event>,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }

        let base_version = aggregate.version();
        let mut version = base_version;
        let mut envelopes = Vec::with_capacity(events.len());

        for event in events {
            version = version.next();
            let event_type = event.event_type();
            let payload = serde_json::to_value(&event)?;

            aggregate.apply(event);
            aggregate.set_version(version);

            let aggregate_id = aggregate
                .id()
                .ok_or(DomainError::MissingAggregateId(A::aggregate_type()))?;

            envelopes.push(
                EventEnvelope::builder()
                    .aggregate_id(aggregate_id)
                    .aggregate_type(A::aggregate_type())
                    .event_type(event_type)
                    .version(version)
                    .payload_raw(payload)
                    .metadata(UNIT_OF_WORK_KEY, serde_json::json!(self.id.to_string()))
                    .build()?,
            );
        }

        let aggregate_id = envelopes[0].aggregate_id;
        match self.index.get(&aggregate_id) {
            Some(&slot) => self.changes[slot].events.extend(envelopes),
            None => {
                self.index.insert(aggregate_id, self.changes.len());
                self.changes
                    .push(AggregateChanges::new(base_version, envelopes));
            }
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of distinct aggregates touched.
    pub fn aggregate_count(&self) -> usize {
        self.changes.len()
    }

    pub fn event_count(&self) -> usize {
        self.changes.iter().map(|c| c.events.len()).sum()
    }

    /// Returns true if the unit stages events for this aggregate.
    pub fn touches(&self, aggregate_id: AggregateId) -> bool {
        self.index.contains_key(&aggregate_id)
    }

    /// Event types staged so far, in recording order per aggregate.
    pub fn event_types(&self) -> Vec<&str> {
        self.changes
            .iter()
            .flat_map(|c| c.events.iter().map(|e| e.event_type.as_str()))
            .collect()
    }

    fn into_changes(self) -> Vec<AggregateChanges> {
        self.changes
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads aggregates by replaying their events and commits units of work.
#[derive(Clone)]
pub struct Repository<S> {
    store: S,
}

impl<S: EventStore> Repository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate. Returns a default instance if it has no events.
    pub async fn load<A: Aggregate>(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;
        let mut aggregate = A::default();

        for envelope in events {
            if envelope.aggregate_type != A::aggregate_type() {
                return Err(DomainError::AggregateTypeMismatch {
                    aggregate_id: aggregate_id.to_string(),
                    expected: A::aggregate_type(),
                    found: envelope.aggregate_type,
                });
            }
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    pub async fn load_existing<A: Aggregate>(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<A>, DomainError> {
        let aggregate: A = self.load(aggregate_id).await?;
        Ok(aggregate.exists().then_some(aggregate))
    }

    /// Loads an aggregate that must already exist.
    pub async fn get<A: Aggregate>(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        self.load_existing(aggregate_id)
            .await?
            .ok_or_else(|| DomainError::not_found::<A>(aggregate_id))
    }

    /// Persists every staged change atomically.
    pub async fn commit(&self, unit: UnitOfWork) -> Result<(), DomainError> {
        if unit.is_empty() {
            return Ok(());
        }

        let unit_id = unit.id();
        let aggregates = unit.aggregate_count();
        let events = unit.event_count();

        self.store.append_atomic(unit.into_changes()).await?;

        metrics::counter!("domain_events_committed_total").increment(events as u64);
        tracing::debug!(%unit_id, aggregates, events, "unit of work committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use event_store::{InMemoryEventStore, Version};

    use super::*;
    use crate::aggregate::test_support::{Counter, CounterEvent};

    fn opened(id: AggregateId) -> Vec<CounterEvent> {
        vec![CounterEvent::Opened { id }]
    }

    #[tokio::test]
    async fn commit_persists_all_touched_aggregates() {
        let store = InMemoryEventStore::new();
        let repo = Repository::new(store.clone());
        let (a_id, b_id) = (AggregateId::new(), AggregateId::new());

        let mut a = Counter::default();
        let mut b = Counter::default();
        let mut unit = UnitOfWork::new();
        unit.record(&mut a, opened(a_id)).unwrap();
        unit.record(&mut b, opened(b_id)).unwrap();
        unit.record(&mut a, vec![CounterEvent::Incremented { by: 4 }]).unwrap();

        assert_eq!(a.value, 4);
        assert_eq!(unit.aggregate_count(), 2);
        assert_eq!(unit.event_count(), 3);

        repo.commit(unit).await.unwrap();

        let loaded: Counter = repo.get(a_id).await.unwrap();
        assert_eq!(loaded.value, 4);
        assert_eq!(loaded.version(), Version::new(2));
        assert_eq!(store.event_count().await, 3);
    }

    #[tokio::test]
    async fn stale_unit_is_rejected_whole() {
        let repo = Repository::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        let mut counter = Counter::default();
        let mut unit = UnitOfWork::new();
        unit.record(&mut counter, opened(id)).unwrap();
        repo.commit(unit).await.unwrap();

        // Two writers load the same version.
        let mut first: Counter = repo.get(id).await.unwrap();
        let mut second: Counter = repo.get(id).await.unwrap();

        let mut unit = UnitOfWork::new();
        unit.record(&mut first, vec![CounterEvent::Incremented { by: 1 }]).unwrap();
        repo.commit(unit).await.unwrap();

        let other = AggregateId::new();
        let mut fresh = Counter::default();
        let mut unit = UnitOfWork::new();
        unit.record(&mut fresh, opened(other)).unwrap();
        unit.record(&mut second, vec![CounterEvent::Incremented { by: 1 }]).unwrap();
        let err = repo.commit(unit).await.unwrap_err();

        assert!(err.is_conflict());
        assert!(repo.load_existing::<Counter>(other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_missing_aggregate_is_not_found() {
        let repo = Repository::new(InMemoryEventStore::new());
        let err = repo.get::<Counter>(AggregateId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn events_are_stamped_with_unit_id() {
        let store = InMemoryEventStore::new();
        let repo = Repository::new(store.clone());
        let id = AggregateId::new();

        let mut counter = Counter::default();
        let mut unit = UnitOfWork::new();
        let unit_id = unit.id().to_string();
        unit.record(&mut counter, opened(id)).unwrap();
        repo.commit(unit).await.unwrap();

        let events = store.get_events_for_aggregate(id).await.unwrap();
        assert_eq!(events[0].metadata_str(UNIT_OF_WORK_KEY), Some(unit_id.as_str()));
    }

    #[test]
    fn recording_nothing_keeps_unit_empty() {
        let mut counter = Counter::default();
        let mut unit = UnitOfWork::new();
        unit.record(&mut counter, vec![]).unwrap();
        assert!(unit.is_empty());
    }
}
