//! Post-commit side effects.
//!
//! Services return these instead of performing them, so a failed email or
//! cache call can never undo a committed order. The caller hands them to
//! [`OutboxDispatcher`], usually on a spawned task.

use common::{AggregateId, UserId};
use event_store::EventStore;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::discounts::DiscountResolver;
use crate::error::Result;
use crate::services::{Collaborators, Email, Notification};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum OutboxTask {
    RecordCouponUsage {
        code: String,
        user_id: UserId,
        order_id: AggregateId,
    },
    Notify(Notification),
    Email(Email),
    InvalidateCache { pattern: String },
}

impl OutboxTask {
    pub fn name(&self) -> &'static str {
        match self {
            OutboxTask::RecordCouponUsage { .. } => "record_coupon_usage",
            OutboxTask::Notify(_) => "notify",
            OutboxTask::Email(_) => "email",
            OutboxTask::InvalidateCache { .. } => "invalidate_cache",
        }
    }

    pub fn invalidate(pattern: impl Into<String>) -> Self {
        OutboxTask::InvalidateCache {
            pattern: pattern.into(),
        }
    }
}

/// Runs outbox tasks. Failures are logged and counted, never returned.
#[derive(Clone)]
pub struct OutboxDispatcher<S> {
    discounts: DiscountResolver<S>,
    collaborators: Collaborators,
}

impl<S: EventStore + Clone + 'static> OutboxDispatcher<S> {
    pub fn new(discounts: DiscountResolver<S>, collaborators: Collaborators) -> Self {
        Self {
            discounts,
            collaborators,
        }
    }

    /// Runs every task in order and returns how many succeeded.
    pub async fn dispatch(&self, tasks: Vec<OutboxTask>) -> usize {
        let mut delivered = 0;
        for task in tasks {
            let name = task.name();
            match self.run(task).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    metrics::counter!("outbox_task_failures_total", "task" => name).increment(1);
                    tracing::warn!(task = name, error = %e, "outbox task failed");
                }
            }
        }
        delivered
    }

    /// Dispatches on a background task.
    pub fn spawn(&self, tasks: Vec<OutboxTask>) -> JoinHandle<usize> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(tasks).await })
    }

    async fn run(&self, task: OutboxTask) -> Result<()> {
        match task {
            OutboxTask::RecordCouponUsage {
                code,
                user_id,
                order_id,
            } => {
                self.discounts
                    .record_coupon_usage(&code, user_id, order_id)
                    .await
            }
            OutboxTask::Notify(notification) => {
                self.collaborators.notifications.notify(notification).await
            }
            OutboxTask::Email(email) => self.collaborators.email.send(email).await,
            OutboxTask::InvalidateCache { pattern } => {
                let removed = self.collaborators.cache.delete_pattern(&pattern).await?;
                tracing::debug!(%pattern, removed, "cache invalidated");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use domain::PricingPolicy;
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::services::{Cache, InMemoryCollaborators, Recipient};

    fn dispatcher(fakes: &InMemoryCollaborators) -> OutboxDispatcher<InMemoryEventStore> {
        let collaborators = fakes.collaborators("secret");
        let discounts = DiscountResolver::new(
            InMemoryEventStore::new(),
            collaborators.cache.clone(),
            PricingPolicy::default(),
        );
        OutboxDispatcher::new(discounts, collaborators)
    }

    fn notice() -> OutboxTask {
        OutboxTask::Notify(Notification {
            recipient: Recipient::Admins,
            topic: "order".into(),
            title: "New Order".into(),
            message: "placed".into(),
            link: Some("/admin/orders".into()),
        })
    }

    #[tokio::test]
    async fn delivers_notifications_and_invalidations() {
        let fakes = InMemoryCollaborators::new();
        fakes
            .cache
            .set("product:1", "x".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let delivered = dispatcher(&fakes)
            .dispatch(vec![notice(), OutboxTask::invalidate("product:*")])
            .await;

        assert_eq!(delivered, 2);
        assert_eq!(fakes.notifications.count(), 1);
        assert!(!fakes.cache.contains("product:1"));
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_tasks() {
        let fakes = InMemoryCollaborators::new();
        fakes.email.set_fail(true);

        let delivered = dispatcher(&fakes)
            .spawn(vec![
                OutboxTask::Email(Email::templated("a@example.com", "Order placed", "Thanks")),
                OutboxTask::RecordCouponUsage {
                    code: "MISSING".into(),
                    user_id: UserId::new(),
                    order_id: AggregateId::new(),
                },
                notice(),
            ])
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(fakes.notifications.count(), 1);
    }
}
