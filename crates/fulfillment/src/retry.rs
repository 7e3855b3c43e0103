//! Re-running a unit of work after optimistic-concurrency conflicts.

use std::future::Future;

use domain::{Backoff, Repository, UnitOfWork};
use event_store::EventStore;

use crate::error::Result;

/// Builds a unit with `build` and commits it, rebuilding from fresh reads
/// after a conflict up to `retries` extra times with a jittered pause
/// between attempts.
///
/// `build` must only read and stage: it runs again on every attempt.
pub(crate) async fn commit_with_retry<S, T, F, Fut>(
    repository: &Repository<S>,
    retries: u32,
    mut build: F,
) -> Result<T>
where
    S: EventStore,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(UnitOfWork, T)>>,
{
    let backoff = Backoff::default();
    let mut attempt = 0;
    loop {
        let (unit, value) = build().await?;
        let unit_id = unit.id();

        match repository.commit(unit).await {
            Ok(()) => return Ok(value),
            Err(e) if e.is_conflict() && attempt < retries => {
                attempt += 1;
                metrics::counter!("unit_of_work_retries_total").increment(1);
                tracing::debug!(%unit_id, attempt, "retrying unit of work after concurrency conflict");
                backoff.wait(attempt).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
