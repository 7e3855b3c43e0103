//! Command handling for operations that touch a single aggregate.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{EventStore, Version};

use crate::aggregate::Aggregate;
use crate::error::{DomainError, ValidationError};
use crate::repository::{Repository, UnitOfWork};
use crate::retry::Backoff;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub new_version: Version,
}

/// A typed request against one aggregate.
///
/// `validate` checks the request's own shape (required fields, ranges) and
/// runs before any aggregate is loaded.
pub trait Command: Send + Sync {
    type Aggregate: Aggregate;

    fn aggregate_id(&self) -> AggregateId;

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Loads one aggregate, runs a decision function and persists its events.
pub struct CommandHandler<S, A> {
    repository: Repository<S>,
    max_conflict_retries: u32,
    backoff: Backoff,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
    DomainError: From<A::Error>,
{
    pub fn new(store: S) -> Self {
        Self {
            repository: Repository::new(store),
            max_conflict_retries: 0,
            backoff: Backoff::default(),
            _phantom: PhantomData,
        }
    }

    /// Re-runs the command on a freshly loaded aggregate after a
    /// concurrency conflict, up to `retries` extra times.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn repository(&self) -> &Repository<S> {
        &self.repository
    }

    /// Executes `command_fn` against the current state.
    ///
    /// The function must be free of side effects: after a conflict it is
    /// called again on a newer version of the aggregate.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
    {
        let mut attempt = 0;
        loop {
            let mut aggregate: A = self.repository.load(aggregate_id).await?;
            let events = command_fn(&aggregate)?;

            if events.is_empty() {
                let new_version = aggregate.version();
                return Ok(CommandResult {
                    aggregate,
                    events,
                    new_version,
                });
            }

            let mut unit = UnitOfWork::new();
            unit.record(&mut aggregate, events.clone())?;

            match self.repository.commit(unit).await {
                Ok(()) => {
                    let new_version = aggregate.version();
                    return Ok(CommandResult {
                        aggregate,
                        events,
                        new_version,
                    });
                }
                Err(e) if e.is_conflict() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    tracing::debug!(
                        aggregate_type = A::aggregate_type(),
                        %aggregate_id,
                        attempt,
                        "retrying command after concurrency conflict"
                    );
                    self.backoff.wait(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like [`execute`](Self::execute) but fails if the aggregate does not exist.
    pub async fn execute_existing<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
    {
        if self.repository.load_existing::<A>(aggregate_id).await?.is_none() {
            return Err(DomainError::not_found::<A>(aggregate_id));
        }
        self.execute(aggregate_id, command_fn).await
    }
}
