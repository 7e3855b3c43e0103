//! Wallet Ledger: per-user balances and their transaction log.

use common::{AggregateId, UserId};
use domain::{CommandHandler, Money, Repository, UnitOfWork, Wallet};
use event_store::EventStore;

use crate::error::Result;

#[derive(Clone)]
pub struct WalletLedger<S> {
    store: S,
    repository: Repository<S>,
    max_conflict_retries: u32,
}

impl<S: EventStore + Clone> WalletLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            repository: Repository::new(store.clone()),
            store,
            max_conflict_retries: domain::DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// The user's wallet. Users who never transacted have an empty one.
    pub async fn load(&self, user_id: UserId) -> Result<Wallet> {
        Ok(self.repository.load(Wallet::aggregate_id(user_id)).await?)
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Money> {
        Ok(self.load(user_id).await?.balance())
    }

    /// Credits a verified gateway payment. Each payment id lands once.
    #[tracing::instrument(skip(self))]
    pub async fn top_up(&self, user_id: UserId, amount: Money, payment_id: &str) -> Result<Wallet> {
        let handler: CommandHandler<S, Wallet> =
            CommandHandler::new(self.store.clone()).with_conflict_retries(self.max_conflict_retries);
        let result = handler
            .execute(Wallet::aggregate_id(user_id), |wallet| {
                wallet.top_up(user_id, amount, payment_id)
            })
            .await?;

        if result.events.is_empty() {
            tracing::info!(%user_id, payment_id, "wallet top-up already credited");
        } else {
            metrics::counter!("wallet_top_ups_total").increment(1);
            tracing::info!(%user_id, %amount, balance = %result.aggregate.balance(), "wallet topped up");
        }
        Ok(result.aggregate)
    }
}

/// Stages a debit against an already loaded wallet.
pub fn stage_debit(
    unit: &mut UnitOfWork,
    wallet: &mut Wallet,
    user_id: UserId,
    amount: Money,
    reason: &str,
    order_id: Option<AggregateId>,
) -> Result<()> {
    let events = wallet.debit(user_id, amount, reason, order_id)?;
    unit.record(wallet, events)?;
    Ok(())
}

/// Stages a credit against an already loaded wallet.
pub fn stage_credit(
    unit: &mut UnitOfWork,
    wallet: &mut Wallet,
    user_id: UserId,
    amount: Money,
    reason: &str,
    order_id: Option<AggregateId>,
) -> Result<()> {
    let events = wallet.credit(user_id, amount, reason, order_id)?;
    unit.record(wallet, events)?;
    Ok(())
}
