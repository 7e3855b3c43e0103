//! Order service for operations that need nothing beyond the event store.

use chrono::{Datelike, Utc};
use common::AggregateId;
use event_store::EventStore;

use crate::command::{Command, CommandHandler, CommandResult};
use crate::error::DomainError;
use crate::gate::KeyedGate;
use crate::invoice::InvoiceSequence;
use crate::repository::{Repository, UnitOfWork};
use crate::retry::{Backoff, DEFAULT_CONFLICT_RETRIES};

use super::{MarkRefundFailed, Order, UpdateStage};

/// Reads orders and applies single-aggregate lifecycle commands.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
    max_conflict_retries: u32,
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self::with_conflict_retries(store, DEFAULT_CONFLICT_RETRIES)
    }

    pub fn with_conflict_retries(store: S, retries: u32) -> Self {
        Self {
            handler: CommandHandler::new(store).with_conflict_retries(retries),
            max_conflict_retries: retries,
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    fn repository(&self) -> &Repository<S> {
        self.handler.repository()
    }

    /// Loads an order by ID. Returns None if it doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.repository().load_existing(order_id).await
    }

    /// Sets the stage of an order that is not yet delivered or cancelled.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, stage = %cmd.stage))]
    pub async fn update_stage(&self, cmd: UpdateStage) -> Result<CommandResult<Order>, DomainError> {
        cmd.validate()?;
        let result = self
            .handler
            .execute_existing(cmd.order_id, |order| {
                order.update_stage(cmd.stage, cmd.note.clone())
            })
            .await?;
        tracing::info!(order_id = %cmd.order_id, stage = %cmd.stage, "order stage updated");
        Ok(result)
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn mark_refund_failed(
        &self,
        cmd: MarkRefundFailed,
    ) -> Result<CommandResult<Order>, DomainError> {
        cmd.validate()?;
        let result = self
            .handler
            .execute_existing(cmd.order_id, |order| order.mark_refund_failed(cmd.reason.clone()))
            .await?;
        tracing::warn!(order_id = %cmd.order_id, reason = %cmd.reason, "refund marked failed");
        Ok(result)
    }

    /// Allocates the next invoice number of the order's creation year.
    ///
    /// The sequence and the order are written in one commit. Returns the
    /// existing number if the order already has one.
    #[tracing::instrument(skip(self))]
    pub async fn assign_invoice_number(&self, order_id: AggregateId) -> Result<String, DomainError> {
        let backoff = Backoff::default();
        let mut attempt = 0;

        loop {
            let mut order: Order = self.repository().get(order_id).await?;
            if let Some(number) = order.invoice_number() {
                return Ok(number.to_string());
            }
            let year = order.created_at().unwrap_or_else(Utc::now).year();

            let sequence_id = InvoiceSequence::id_for_year(year);
            let pass = KeyedGate::shared().acquire([sequence_id]).await;
            let mut sequence: InvoiceSequence = self.repository().load(sequence_id).await?;
            let (sequence_events, number) = sequence.issue(year, order_id);
            let order_events = order.assign_invoice_number(number.clone())?;

            let mut unit = UnitOfWork::new();
            unit.record(&mut sequence, sequence_events)?;
            unit.record(&mut order, order_events)?;

            let committed = self.repository().commit(unit).await;
            drop(pass);

            match committed {
                Ok(()) => {
                    tracing::info!(%order_id, invoice_number = %number, "invoice number assigned");
                    return Ok(number);
                }
                Err(e) if e.is_conflict() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    tracing::debug!(%order_id, attempt, "invoice sequence contended, retrying");
                    backoff.wait(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
