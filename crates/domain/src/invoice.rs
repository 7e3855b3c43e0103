//! Invoice numbering and invoice figures.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::money::Money;
use crate::order::{CustomerSnapshot, Order, PaymentMethod, PaymentStatus};
use crate::pricing::OrderTotals;

/// Formats an invoice number as `INV-<year>-<6 digits>`.
pub fn format_invoice_number(year: i32, sequence: u64) -> String {
    format!("INV-{year}-{sequence:06}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InvoiceSequenceEvent {
    InvoiceNumberIssued(InvoiceNumberIssuedData),
}

impl DomainEvent for InvoiceSequenceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceSequenceEvent::InvoiceNumberIssued(_) => "InvoiceNumberIssued",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceNumberIssuedData {
    pub sequence_id: AggregateId,
    pub year: i32,
    pub sequence: u64,
    pub order_id: AggregateId,
    pub issued_at: DateTime<Utc>,
}

/// Per-year counter of issued invoice numbers.
///
/// Numbers are dense: every issued number is backed by the order that
/// received it in the same commit.
#[derive(Debug, Clone, Default)]
pub struct InvoiceSequence {
    id: Option<AggregateId>,
    version: Version,
    year: i32,
    last: u64,
}

impl InvoiceSequence {
    pub fn id_for_year(year: i32) -> AggregateId {
        AggregateId::derived("invoice-sequence", &year.to_string())
    }

    pub fn last_issued(&self) -> u64 {
        self.last
    }

    /// Issues the next number of `year` to an order.
    pub fn issue(
        &self,
        year: i32,
        order_id: AggregateId,
    ) -> (Vec<InvoiceSequenceEvent>, String) {
        let sequence = self.last + 1;
        let events = vec![InvoiceSequenceEvent::InvoiceNumberIssued(
            InvoiceNumberIssuedData {
                sequence_id: Self::id_for_year(year),
                year,
                sequence,
                order_id,
                issued_at: Utc::now(),
            },
        )];
        (events, format_invoice_number(year, sequence))
    }
}

impl Aggregate for InvoiceSequence {
    type Event = InvoiceSequenceEvent;
    type Error = std::convert::Infallible;

    fn aggregate_type() -> &'static str {
        "InvoiceSequence"
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
            InvoiceSequenceEvent::InvoiceNumberIssued(data) => {
                self.id = Some(data.sequence_id);
                self.year = data.year;
                self.last = data.sequence;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceLine {
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// The figures printed on an invoice. Layout is left to the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invoice {
    pub invoice_number: Option<String>,
    pub order_id: AggregateId,
    pub order_code: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub currency: String,
    pub customer: CustomerSnapshot,
    pub shipping_address: String,
    pub lines: Vec<InvoiceLine>,
    #[serde(flatten)]
    pub totals: OrderTotals,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub wallet_used: Money,
}

impl Invoice {
    /// Returns None for an order that has not been placed.
    pub fn for_order(order: &Order, currency: &str) -> Option<Self> {
        let order_id = order.id()?;
        Some(Self {
            invoice_number: order.invoice_number().map(str::to_string),
            order_id,
            order_code: order.order_code().to_string(),
            issued_at: order.created_at(),
            currency: currency.to_string(),
            customer: order.customer().clone(),
            shipping_address: order.shipping_address().to_string(),
            lines: order
                .lines()
                .iter()
                .map(|l| InvoiceLine {
                    name: l.name.clone(),
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    line_total: l.line_total(),
                })
                .collect(),
            totals: *order.totals(),
            payment_status: order.payment().status,
            payment_method: order.payment().method,
            wallet_used: order.payment().wallet_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::test_support::placed;

    #[test]
    fn invoice_number_format() {
        assert_eq!(format_invoice_number(2026, 42), "INV-2026-000042");
        assert_eq!(format_invoice_number(2026, 1_234_567), "INV-2026-1234567");
    }

    #[test]
    fn sequence_increments_per_issue() {
        let mut seq = InvoiceSequence::default();
        let (events, first) = seq.issue(2026, AggregateId::new());
        seq.apply_events(events);
        let (_, second) = seq.issue(2026, AggregateId::new());

        assert_eq!(first, "INV-2026-000001");
        assert_eq!(second, "INV-2026-000002");
        assert_eq!(seq.id(), Some(InvoiceSequence::id_for_year(2026)));
        assert_ne!(InvoiceSequence::id_for_year(2026), InvoiceSequence::id_for_year(2027));
    }

    #[test]
    fn invoice_figures_follow_order() {
        let order = placed(true);
        let invoice = Invoice::for_order(&order, "INR").unwrap();

        assert_eq!(invoice.lines.len(), 2);
        assert_eq!(
            invoice.lines.iter().map(|l| l.line_total).sum::<Money>(),
            invoice.totals.subtotal
        );
        assert_eq!(invoice.totals.total_price, order.total_price());
        assert!(Invoice::for_order(&Order::default(), "INR").is_none());
    }
}
