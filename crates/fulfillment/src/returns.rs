//! Returns, refunds, cancellations and replacement orders.
//!
//! Every operation that moves money or stock commits the order change and
//! the wallet or stock change in the same unit of work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use domain::{
    CancelOrder, Command, CommandHandler, CreateReplacement, InitiateRefund, MarkRefundFailed,
    Order, OrderError, OrderService, RefundMethod, Repository, RequestReturn, ReturnStatus,
    UnitOfWork, UpdateReturnStatus, Wallet,
};
use event_store::EventStore;

use crate::checkout::allocate_invoice;
use crate::config::FulfillmentConfig;
use crate::error::{FulfillmentError, Result};
use crate::inventory::InventoryGuard;
use crate::ledger::stage_credit;
use crate::outbox::OutboxTask;
use crate::pending::PendingIndex;
use crate::retry::commit_with_retry;
use crate::services::{Email, Notification, Recipient};

/// An order after a workflow step, plus the side effects owed for it.
#[derive(Debug)]
pub struct OrderOutcome {
    pub order: Order,
    pub outbox: Vec<OutboxTask>,
}

pub struct ReturnsWorkflow<S: EventStore> {
    store: S,
    repository: Repository<S>,
    orders: OrderService<S>,
    inventory: InventoryGuard<S>,
    pending: Arc<PendingIndex<S>>,
    config: FulfillmentConfig,
}

fn notify_customer(
    order: &Order,
    order_id: AggregateId,
    topic: &str,
    title: &str,
    message: String,
) -> Option<OutboxTask> {
    let user_id = order.user_id()?;
    Some(OutboxTask::Notify(Notification {
        recipient: Recipient::User(user_id),
        topic: topic.to_string(),
        title: title.to_string(),
        message,
        link: Some(format!("/orders/{order_id}")),
    }))
}

/// Id of the replacement for `source`. Stable, so a retried request cannot
/// place a second replacement.
fn replacement_id(source: AggregateId) -> AggregateId {
    AggregateId::derived("replacement", &source.to_string())
}

impl<S: EventStore + Clone> ReturnsWorkflow<S> {
    pub fn new(store: S, config: FulfillmentConfig) -> Self {
        Self {
            repository: Repository::new(store.clone()),
            orders: OrderService::with_conflict_retries(store.clone(), config.max_conflict_retries),
            inventory: InventoryGuard::new(store.clone()),
            pending: Arc::new(PendingIndex::new(store.clone())),
            store,
            config,
        }
    }

    /// Index of open refunds, coupon usages and invoice numbers.
    pub fn pending(&self) -> &Arc<PendingIndex<S>> {
        &self.pending
    }

    fn handler(&self) -> CommandHandler<S, Order> {
        CommandHandler::new(self.store.clone()).with_conflict_retries(self.config.max_conflict_retries)
    }

    /// Opens a return on a delivered order. Owner only.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn request_return(&self, cmd: RequestReturn) -> Result<OrderOutcome> {
        cmd.validate()?;
        let result = self
            .handler()
            .execute_existing(cmd.order_id, |order| {
                order.request_return(cmd.user_id, cmd.reason.clone(), cmd.return_type, cmd.refund_method)
            })
            .await?;
        let order = result.aggregate;
        tracing::info!(return_type = ?cmd.return_type, "return requested");

        let outbox = vec![OutboxTask::Notify(Notification {
            recipient: Recipient::Admins,
            topic: "return".into(),
            title: format!("Return requested for #{}", order.order_code()),
            message: cmd.reason.clone(),
            link: Some("/admin/orders".into()),
        })];
        Ok(OrderOutcome { order, outbox })
    }

    /// Moves a return forward. Receiving the goods puts them back in stock.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, status = %cmd.status))]
    pub async fn update_return_status(&self, cmd: UpdateReturnStatus) -> Result<OrderOutcome> {
        cmd.validate()?;
        let order = commit_with_retry(&self.repository, self.config.max_conflict_retries, || async {
            let mut order: Order = self.repository.get(cmd.order_id).await?;
            let mut unit = UnitOfWork::new();
            let events = order.update_return_status(cmd.status, cmd.note.clone())?;
            unit.record(&mut order, events)?;

            if cmd.status == ReturnStatus::Received {
                self.inventory
                    .release(&mut unit, cmd.order_id, order.lines())
                    .await?;
            }
            Ok::<_, FulfillmentError>((unit, order))
        })
        .await?;

        tracing::info!("return status updated");
        let outbox = notify_customer(
            &order,
            cmd.order_id,
            "return",
            "Return update",
            format!(
                "Your return for order {} is now {}.",
                order.order_code(),
                cmd.status
            ),
        )
        .into_iter()
        .collect();
        Ok(OrderOutcome { order, outbox })
    }

    /// Refunds the order total. A wallet refund completes immediately.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, method = ?cmd.method))]
    pub async fn initiate_refund(&self, cmd: InitiateRefund) -> Result<OrderOutcome> {
        cmd.validate()?;
        let now = Utc::now();
        let order = commit_with_retry(&self.repository, self.config.max_conflict_retries, || async {
            let mut order: Order = self.repository.get(cmd.order_id).await?;
            let mut unit = UnitOfWork::new();
            self.stage_refund(&mut unit, &mut order, cmd.order_id, cmd.method, now)
                .await?;
            Ok::<_, FulfillmentError>((unit, order))
        })
        .await?;

        let outbox = self.refund_outbox(&order, cmd.order_id, cmd.method);
        Ok(OrderOutcome { order, outbox })
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn mark_refund_failed(&self, cmd: MarkRefundFailed) -> Result<OrderOutcome> {
        let result = self.orders.mark_refund_failed(cmd).await?;
        metrics::counter!("refunds_failed_total").increment(1);
        Ok(OrderOutcome {
            order: result.aggregate,
            outbox: Vec::new(),
        })
    }

    /// Completes original-method refunds whose settlement date has passed.
    ///
    /// A failure on one order is logged and does not stop the others.
    #[tracing::instrument(skip(self))]
    pub async fn complete_due_refunds(&self, now: DateTime<Utc>) -> Result<Vec<OrderOutcome>> {
        let candidates = self.pending.catch_up().await?.refunds_due(now);

        let mut completed = Vec::new();
        for order_id in candidates {
            let result = self
                .handler()
                .execute(order_id, |order| {
                    if order.is_refund_due(now) {
                        order.complete_refund(now)
                    } else {
                        Ok(vec![])
                    }
                })
                .await;

            match result {
                Ok(result) if !result.events.is_empty() => {
                    metrics::counter!("refunds_completed_total").increment(1);
                    tracing::info!(%order_id, "refund completed after settlement period");
                    let order = result.aggregate;
                    let outbox = self.settled_refund_outbox(&order, order_id);
                    completed.push(OrderOutcome { order, outbox });
                }
                Ok(_) => {}
                Err(e) => tracing::error!(%order_id, error = %e, "could not complete due refund"),
            }
        }
        Ok(completed)
    }

    /// Cancels an order, restoring stock and returning money in one commit.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, as_admin = cmd.as_admin))]
    pub async fn cancel_order(&self, cmd: CancelOrder) -> Result<OrderOutcome> {
        cmd.validate()?;
        let now = Utc::now();
        let method = cmd.refund_method.unwrap_or_default();

        let (order, refunded) =
            commit_with_retry(&self.repository, self.config.max_conflict_retries, || async {
                let mut order: Order = self.repository.get(cmd.order_id).await?;
                if !cmd.as_admin && !order.is_owned_by(cmd.requested_by) {
                    return Err(OrderError::NotOwner.into());
                }

                let mut unit = UnitOfWork::new();
                let events = order.cancel(cmd.reason.clone(), cmd.requested_by)?;
                unit.record(&mut order, events)?;
                let lines = order.lines().to_vec();
                self.inventory.release(&mut unit, cmd.order_id, &lines).await?;

                let refunded = if order.is_paid() {
                    self.stage_refund(&mut unit, &mut order, cmd.order_id, method, now)
                        .await?;
                    true
                } else {
                    let wallet_used = order.payment().wallet_used;
                    if wallet_used.is_positive() {
                        let user_id = owner(&order)?;
                        let mut wallet: Wallet =
                            self.repository.load(Wallet::aggregate_id(user_id)).await?;
                        stage_credit(
                            &mut unit,
                            &mut wallet,
                            user_id,
                            wallet_used,
                            &format!("Wallet amount returned for cancelled order {}", order.order_code()),
                            Some(cmd.order_id),
                        )?;
                    }
                    false
                };
                Ok::<_, FulfillmentError>((unit, (order, refunded)))
            })
            .await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(refunded, "order cancelled");

        let mut outbox: Vec<OutboxTask> = notify_customer(
            &order,
            cmd.order_id,
            "order",
            "Order cancelled",
            format!("Your order {} has been cancelled.", order.order_code()),
        )
        .into_iter()
        .collect();
        if refunded {
            outbox.extend(self.refund_outbox(&order, cmd.order_id, method));
        }
        if !cmd.as_admin {
            outbox.push(OutboxTask::Notify(Notification {
                recipient: Recipient::Admins,
                topic: "order".into(),
                title: format!("Order #{} cancelled", order.order_code()),
                message: cmd.reason.clone(),
                link: Some("/admin/orders".into()),
            }));
        }
        outbox.push(OutboxTask::invalidate("product:*"));
        Ok(OrderOutcome { order, outbox })
    }

    /// Places a paid copy of an order whose replacement return was received.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn create_replacement_order(&self, cmd: CreateReplacement) -> Result<OrderOutcome> {
        let new_id = replacement_id(cmd.order_id);

        let replacement =
            commit_with_retry(&self.repository, self.config.max_conflict_retries, || async {
                let mut source: Order = self.repository.get(cmd.order_id).await?;
                let place = source.replacement_order(new_id)?;

                let mut unit = UnitOfWork::new();
                self.inventory.reserve(&mut unit, new_id, &place.lines).await?;

                let mut replacement: Order = self.repository.load(new_id).await?;
                let events = replacement.place(place)?;
                unit.record(&mut replacement, events)?;

                let events = source.link_replacement(new_id)?;
                unit.record(&mut source, events)?;
                Ok::<_, FulfillmentError>((unit, replacement))
            })
            .await?;

        metrics::counter!("replacements_created_total").increment(1);
        tracing::info!(replacement_id = %new_id, "replacement order created");

        let replacement = allocate_invoice(&self.orders, &self.repository, new_id, replacement).await;
        let outbox = notify_customer(
            &replacement,
            new_id,
            "order",
            "Replacement order created",
            format!(
                "Replacement order {} has been placed for you.",
                replacement.order_code()
            ),
        )
        .into_iter()
        .chain([OutboxTask::invalidate("product:*")])
        .collect();
        Ok(OrderOutcome {
            order: replacement,
            outbox,
        })
    }

    /// Stages refund events and, for wallet refunds, the matching credit.
    async fn stage_refund(
        &self,
        unit: &mut UnitOfWork,
        order: &mut Order,
        order_id: AggregateId,
        method: RefundMethod,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let events = order.initiate_refund(method, now, self.config.refund_sla())?;
        unit.record(order, events)?;
        metrics::counter!("refunds_initiated_total", "method" => refund_label(method)).increment(1);

        if method == RefundMethod::Wallet {
            let user_id = owner(order)?;
            let mut wallet: Wallet = self.repository.load(Wallet::aggregate_id(user_id)).await?;
            stage_credit(
                unit,
                &mut wallet,
                user_id,
                order.refund_amount(),
                &format!("Refund for order {}", order.order_code()),
                Some(order_id),
            )?;
            metrics::counter!("refunds_completed_total").increment(1);
        }
        Ok(())
    }

    fn refund_outbox(
        &self,
        order: &Order,
        order_id: AggregateId,
        method: RefundMethod,
    ) -> Vec<OutboxTask> {
        let (title, message) = match method {
            RefundMethod::Wallet => (
                "Refund completed",
                format!(
                    "{} {} has been credited to your wallet.",
                    self.config.currency,
                    order.refund_amount()
                ),
            ),
            RefundMethod::Original => (
                "Refund initiated",
                format!(
                    "Your refund of {} {} to the original payment method has been initiated.",
                    self.config.currency,
                    order.refund_amount()
                ),
            ),
        };
        notify_customer(order, order_id, "refund", title, message)
            .into_iter()
            .collect()
    }

    fn settled_refund_outbox(&self, order: &Order, order_id: AggregateId) -> Vec<OutboxTask> {
        let message = "Your refund to original payment method is completed.";
        let mut outbox: Vec<OutboxTask> =
            notify_customer(order, order_id, "refund", "Refund completed", message.to_string())
                .into_iter()
                .collect();
        let email = &order.customer().email;
        if !email.is_empty() {
            outbox.push(OutboxTask::Email(Email::templated(
                email.clone(),
                "Refund completed",
                &format!("Order {}: {message}", order.order_code()),
            )));
        }
        outbox
    }
}

fn owner(order: &Order) -> Result<UserId> {
    Ok(order.user_id().ok_or(OrderError::NotPlaced)?)
}

fn refund_label(method: RefundMethod) -> &'static str {
    match method {
        RefundMethod::Wallet => "wallet",
        RefundMethod::Original => "original",
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use common::ProductId;
    use domain::{
        CreateOrder, LineItem, Money, PaymentStatus, ProductRef, RefundStatus, ReturnType, Stage,
        UpdateStage,
    };
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::checkout::CheckoutOrchestrator;
    use crate::ledger::WalletLedger;
    use crate::services::InMemoryCollaborators;

    struct Fixture {
        checkout: CheckoutOrchestrator<InMemoryEventStore>,
        returns: ReturnsWorkflow<InMemoryEventStore>,
        orders: OrderService<InMemoryEventStore>,
        inventory: InventoryGuard<InMemoryEventStore>,
        ledger: WalletLedger<InMemoryEventStore>,
        user_id: UserId,
        product_id: ProductId,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryEventStore::new();
        let fakes = InMemoryCollaborators::new();
        let user_id = fakes.users.add_customer("Ravi");
        let config = FulfillmentConfig::default();
        let inventory = InventoryGuard::new(store.clone());
        let product_id = ProductId::new();
        inventory.register(product_id, "Lamp", "Home", 5).await.unwrap();

        Fixture {
            checkout: CheckoutOrchestrator::new(
                store.clone(),
                fakes.collaborators("secret"),
                config.clone(),
            ),
            returns: ReturnsWorkflow::new(store.clone(), config),
            orders: OrderService::new(store.clone()),
            ledger: WalletLedger::new(store),
            inventory,
            user_id,
            product_id,
        }
    }

    impl Fixture {
        /// Places a two-unit order paid in full from the wallet.
        async fn paid_order(&self) -> Order {
            self.ledger
                .top_up(self.user_id, Money::from_major(1000), &format!("top-{}", AggregateId::new()))
                .await
                .unwrap();
            let line = LineItem {
                product: ProductRef::Catalog(self.product_id),
                name: "Lamp".into(),
                category: None,
                quantity: 2,
                unit_price: Money::from_major(150),
            };
            let order = self
                .checkout
                .create_order(
                    CreateOrder::new(self.user_id, vec![line], "addr")
                        .with_wallet(Money::from_major(1000)),
                )
                .await
                .unwrap()
                .order;
            assert_eq!(order.payment().status, PaymentStatus::Paid);
            order
        }

        async fn deliver(&self, order_id: AggregateId) {
            for stage in [
                Stage::Confirmed,
                Stage::Processing,
                Stage::Packed,
                Stage::Shipped,
                Stage::OutForDelivery,
                Stage::Delivered,
            ] {
                self.orders
                    .update_stage(UpdateStage {
                        order_id,
                        stage,
                        note: None,
                    })
                    .await
                    .unwrap();
            }
        }

        async fn accept_return(&self, order_id: AggregateId, return_type: ReturnType) {
            self.deliver(order_id).await;
            self.returns
                .request_return(RequestReturn {
                    order_id,
                    user_id: self.user_id,
                    reason: "Damaged".into(),
                    return_type,
                    refund_method: None,
                })
                .await
                .unwrap();
            for status in [ReturnStatus::Approved, ReturnStatus::Picked, ReturnStatus::Received] {
                self.returns
                    .update_return_status(UpdateReturnStatus {
                        order_id,
                        status,
                        note: None,
                    })
                    .await
                    .unwrap();
            }
        }

        async fn available(&self) -> u32 {
            self.inventory
                .get(self.product_id)
                .await
                .unwrap()
                .unwrap()
                .available()
        }
    }

    fn id_of(order: &Order) -> AggregateId {
        use domain::Aggregate;
        order.id().unwrap()
    }

    #[tokio::test]
    async fn cancelling_paid_order_refunds_to_wallet_and_restores_stock() {
        let fx = fixture().await;
        let order = fx.paid_order().await;
        let order_id = id_of(&order);
        assert_eq!(fx.available().await, 3);
        let balance_before = fx.ledger.balance(fx.user_id).await.unwrap();

        let outcome = fx
            .returns
            .cancel_order(CancelOrder {
                order_id,
                reason: "Changed my mind".into(),
                refund_method: None,
                requested_by: fx.user_id,
                as_admin: false,
            })
            .await
            .unwrap();

        assert_eq!(outcome.order.stage(), Stage::Cancelled);
        assert_eq!(outcome.order.refund_status(), RefundStatus::Completed);
        assert_eq!(outcome.order.return_status(), ReturnStatus::Closed);
        assert_eq!(
            fx.ledger.balance(fx.user_id).await.unwrap(),
            balance_before + order.total_price()
        );
        assert_eq!(fx.available().await, 5);
    }

    #[tokio::test]
    async fn only_the_owner_may_cancel() {
        let fx = fixture().await;
        let order = fx.paid_order().await;

        let err = fx
            .returns
            .cancel_order(CancelOrder {
                order_id: id_of(&order),
                reason: "not mine".into(),
                refund_method: None,
                requested_by: UserId::new(),
                as_admin: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Forbidden);
        assert_eq!(fx.available().await, 3);
    }

    #[tokio::test]
    async fn refund_cannot_be_initiated_twice() {
        let fx = fixture().await;
        let order = fx.paid_order().await;
        let order_id = id_of(&order);
        fx.accept_return(order_id, ReturnType::Refund).await;
        let balance_before = fx.ledger.balance(fx.user_id).await.unwrap();

        fx.returns
            .initiate_refund(InitiateRefund {
                order_id,
                method: RefundMethod::Wallet,
            })
            .await
            .unwrap();
        let err = fx
            .returns
            .initiate_refund(InitiateRefund {
                order_id,
                method: RefundMethod::Wallet,
            })
            .await
            .unwrap_err();

        assert_eq!(err.reason_code(), Some("REFUND_ALREADY_INITIATED"));
        assert_eq!(
            fx.ledger.balance(fx.user_id).await.unwrap(),
            balance_before + order.total_price()
        );
    }

    #[tokio::test]
    async fn original_refund_completes_once_due() {
        let fx = fixture().await;
        let order = fx.paid_order().await;
        let order_id = id_of(&order);
        fx.accept_return(order_id, ReturnType::Refund).await;

        let outcome = fx
            .returns
            .initiate_refund(InitiateRefund {
                order_id,
                method: RefundMethod::Original,
            })
            .await
            .unwrap();
        assert_eq!(outcome.order.refund_status(), RefundStatus::Initiated);

        assert!(fx.returns.complete_due_refunds(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + ChronoDuration::days(8);
        let completed = fx.returns.complete_due_refunds(later).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].order.refund_status(), RefundStatus::Completed);
        assert!(completed[0].outbox.iter().any(|t| t.name() == "email"));

        assert!(fx.returns.complete_due_refunds(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_refund_can_be_retried() {
        let fx = fixture().await;
        let order = fx.paid_order().await;
        let order_id = id_of(&order);
        fx.accept_return(order_id, ReturnType::Refund).await;
        fx.returns
            .initiate_refund(InitiateRefund {
                order_id,
                method: RefundMethod::Original,
            })
            .await
            .unwrap();

        let failed = fx
            .returns
            .mark_refund_failed(MarkRefundFailed {
                order_id,
                reason: "gateway declined".into(),
            })
            .await
            .unwrap();
        assert_eq!(failed.order.refund_status(), RefundStatus::Failed);

        let retried = fx
            .returns
            .initiate_refund(InitiateRefund {
                order_id,
                method: RefundMethod::Wallet,
            })
            .await
            .unwrap();
        assert_eq!(retried.order.refund_status(), RefundStatus::Completed);
    }

    #[tokio::test]
    async fn replacement_is_created_once() {
        let fx = fixture().await;
        let order = fx.paid_order().await;
        let order_id = id_of(&order);
        fx.accept_return(order_id, ReturnType::Replacement).await;
        assert_eq!(fx.available().await, 5);

        let outcome = fx
            .returns
            .create_replacement_order(CreateReplacement { order_id })
            .await
            .unwrap();
        assert_eq!(outcome.order.replacement_from_id(), Some(order_id));
        assert_eq!(outcome.order.payment().status, PaymentStatus::Paid);
        assert_eq!(fx.available().await, 3);

        let source = fx.orders.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(source.return_status(), ReturnStatus::Closed);
        assert_eq!(source.replacement_order_id(), Some(id_of(&outcome.order)));

        let err = fx
            .returns
            .create_replacement_order(CreateReplacement { order_id })
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), Some("REPLACEMENT_ALREADY_CREATED"));
    }

    #[tokio::test]
    async fn return_requires_delivery() {
        let fx = fixture().await;
        let order = fx.paid_order().await;

        let err = fx
            .returns
            .request_return(RequestReturn {
                order_id: id_of(&order),
                user_id: fx.user_id,
                reason: "Too early".into(),
                return_type: ReturnType::Refund,
                refund_method: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), Some("RETURN_NOT_ALLOWED"));
    }
}
