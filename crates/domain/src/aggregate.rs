//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact that happened to an aggregate. Named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Stable name stored alongside the payload and used for filtering.
    fn event_type(&self) -> &'static str;
}

/// An event-sourced consistency boundary.
///
/// Aggregates are rebuilt by replaying their events. Command methods
/// inspect the current state and return new events (or an error) without
/// mutating anything; `apply` is the only place state changes, and it must
/// be deterministic and infallible.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;
    type Error: std::error::Error + Send + Sync;

    fn aggregate_type() -> &'static str;

    /// Returns None until the creating event has been applied.
    fn id(&self) -> Option<AggregateId>;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Returns true once the aggregate has been created.
    fn exists(&self) -> bool {
        self.id().is_some()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A tiny counter aggregate shared by the plumbing tests.

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    pub enum CounterEvent {
        Opened { id: AggregateId },
        Incremented { by: u32 },
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Opened { .. } => "CounterOpened",
                CounterEvent::Incremented { .. } => "CounterIncremented",
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter limit exceeded")]
    pub struct CounterError;

    impl From<CounterError> for crate::DomainError {
        fn from(_: CounterError) -> Self {
            crate::DomainError::Validation(crate::ValidationError::new("by", "limit exceeded"))
        }
    }

    #[derive(Debug, Default, Clone)]
    pub struct Counter {
        pub id: Option<AggregateId>,
        pub value: u32,
        pub version: Version,
    }

    impl Counter {
        pub fn increment(&self, by: u32) -> Result<Vec<CounterEvent>, CounterError> {
            if self.value + by > 10 {
                return Err(CounterError);
            }
            Ok(vec![CounterEvent::Incremented { by }])
        }
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;
        type Error = CounterError;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                CounterEvent::Opened { id } => self.id = Some(id),
                CounterEvent::Incremented { by } => self.value += by,
            }
        }
    }
}
