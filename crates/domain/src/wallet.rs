//! Per-user wallet ledger.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("insufficient wallet balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Money, available: Money },

    #[error("wallet amount must be positive, got {0}")]
    InvalidAmount(Money),
}

impl WalletError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            WalletError::InsufficientBalance { .. } => "INSUFFICIENT_WALLET_BALANCE",
            WalletError::InvalidAmount(_) => "INVALID_WALLET_AMOUNT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Credit,
    Debit,
}

/// One ledger line. Lines are never edited or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub kind: TransactionKind,
    pub amount: Money,
    pub reason: String,
    pub order_id: Option<AggregateId>,
    pub payment_id: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WalletEvent {
    WalletCredited(WalletEntryData),
    WalletDebited(WalletEntryData),
}

impl DomainEvent for WalletEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::WalletCredited(_) => "WalletCredited",
            WalletEvent::WalletDebited(_) => "WalletDebited",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEntryData {
    pub user_id: UserId,
    pub amount: Money,
    pub reason: String,
    pub order_id: Option<AggregateId>,
    pub payment_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// A user's wallet. The balance is the running sum of its ledger.
#[derive(Debug, Clone, Default)]
pub struct Wallet {
    user_id: Option<UserId>,
    version: Version,
    balance: Money,
    transactions: Vec<WalletTransaction>,
    payment_ids: HashSet<String>,
}

impl Wallet {
    pub fn aggregate_id(user_id: UserId) -> AggregateId {
        AggregateId::from(user_id)
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn transactions(&self) -> &[WalletTransaction] {
        &self.transactions
    }

    /// Most recent entries first.
    pub fn recent_transactions(&self, limit: usize) -> impl Iterator<Item = &WalletTransaction> {
        self.transactions.iter().rev().take(limit)
    }

    pub fn has_payment(&self, payment_id: &str) -> bool {
        self.payment_ids.contains(payment_id)
    }
}

// Command methods
impl Wallet {
    /// A credit must be positive and keep the balance within [`Money::LIMIT`].
    fn check_credit(&self, amount: Money) -> Result<(), WalletError> {
        let within_limit = self
            .balance
            .checked_add(amount)
            .is_some_and(|balance| balance <= Money::LIMIT);
        if !amount.is_positive() || !within_limit {
            return Err(WalletError::InvalidAmount(amount));
        }
        Ok(())
    }

    pub fn credit(
        &self,
        user_id: UserId,
        amount: Money,
        reason: impl Into<String>,
        order_id: Option<AggregateId>,
    ) -> Result<Vec<WalletEvent>, WalletError> {
        self.check_credit(amount)?;
        Ok(vec![WalletEvent::WalletCredited(WalletEntryData {
            user_id,
            amount,
            reason: reason.into(),
            order_id,
            payment_id: None,
            at: Utc::now(),
        })])
    }

    /// Credits a gateway top-up. A payment id is only ever credited once.
    pub fn top_up(
        &self,
        user_id: UserId,
        amount: Money,
        payment_id: impl Into<String>,
    ) -> Result<Vec<WalletEvent>, WalletError> {
        let payment_id = payment_id.into();
        if self.payment_ids.contains(&payment_id) {
            return Ok(vec![]);
        }
        self.check_credit(amount)?;
        Ok(vec![WalletEvent::WalletCredited(WalletEntryData {
            user_id,
            amount,
            reason: "Wallet top-up".into(),
            order_id: None,
            payment_id: Some(payment_id),
            at: Utc::now(),
        })])
    }

    pub fn debit(
        &self,
        user_id: UserId,
        amount: Money,
        reason: impl Into<String>,
        order_id: Option<AggregateId>,
    ) -> Result<Vec<WalletEvent>, WalletError> {
        if !amount.is_positive() || amount > Money::LIMIT {
            return Err(WalletError::InvalidAmount(amount));
        }
        if self.balance < amount {
            return Err(WalletError::InsufficientBalance {
                requested: amount,
                available: self.balance,
            });
        }
        Ok(vec![WalletEvent::WalletDebited(WalletEntryData {
            user_id,
            amount,
            reason: reason.into(),
            order_id,
            payment_id: None,
            at: Utc::now(),
        })])
    }
}

impl Aggregate for Wallet {
    type Event = WalletEvent;
    type Error = WalletError;

    fn aggregate_type() -> &'static str {
        "Wallet"
    }

    fn id(&self) -> Option<AggregateId> {
        self.user_id.map(AggregateId::from)
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        let (kind, data) = match event {
            WalletEvent::WalletCredited(data) => (TransactionKind::Credit, data),
            WalletEvent::WalletDebited(data) => (TransactionKind::Debit, data),
        };

        self.user_id = Some(data.user_id);
        match kind {
            TransactionKind::Credit => self.balance += data.amount,
            TransactionKind::Debit => self.balance -= data.amount,
        }
        if let Some(payment_id) = &data.payment_id {
            self.payment_ids.insert(payment_id.clone());
        }
        self.transactions.push(WalletTransaction {
            kind,
            amount: data.amount,
            reason: data.reason,
            order_id: data.order_id,
            payment_id: data.payment_id,
            at: data.at,
        });
    }
}
