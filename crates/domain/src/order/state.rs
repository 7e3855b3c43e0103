//! Order stage machine and the separate return/refund status enums.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fulfillment stage of an order.
///
/// Forward edges:
/// ```text
/// Placed ─► Confirmed ─► Processing ─► Packed ─► Shipped ─► OutForDelivery ─► Delivered
///    │          │            │           │
///    └──────────┴────────────┴───────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    #[default]
    Placed,
    Confirmed,
    Processing,
    Packed,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Placed,
        Stage::Confirmed,
        Stage::Processing,
        Stage::Packed,
        Stage::Shipped,
        Stage::OutForDelivery,
        Stage::Delivered,
        Stage::Cancelled,
    ];

    /// The single forward successor, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Placed => Some(Stage::Confirmed),
            Stage::Confirmed => Some(Stage::Processing),
            Stage::Processing => Some(Stage::Packed),
            Stage::Packed => Some(Stage::Shipped),
            Stage::Shipped => Some(Stage::OutForDelivery),
            Stage::OutForDelivery => Some(Stage::Delivered),
            Stage::Delivered | Stage::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Delivered | Stage::Cancelled)
    }

    /// Once an order has left the warehouse it can no longer be cancelled.
    pub fn can_cancel(&self) -> bool {
        !matches!(
            self,
            Stage::Shipped | Stage::OutForDelivery | Stage::Delivered | Stage::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Placed => "PLACED",
            Stage::Confirmed => "CONFIRMED",
            Stage::Processing => "PROCESSING",
            Stage::Packed => "PACKED",
            Stage::Shipped => "SHIPPED",
            Stage::OutForDelivery => "OUT_FOR_DELIVERY",
            Stage::Delivered => "DELIVERED",
            Stage::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

impl FromStr for Stage {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stage = match s.trim().to_ascii_uppercase().as_str() {
            "PLACED" => Stage::Placed,
            "CONFIRMED" => Stage::Confirmed,
            "PROCESSING" => Stage::Processing,
            "PACKED" => Stage::Packed,
            "SHIPPED" => Stage::Shipped,
            "OUT_FOR_DELIVERY" => Stage::OutForDelivery,
            "DELIVERED" => Stage::Delivered,
            "CANCELLED" => Stage::Cancelled,
            _ => {
                return Err(ParseStatusError {
                    kind: "stage",
                    value: s.to_string(),
                });
            }
        };
        Ok(stage)
    }
}

/// Post-delivery return status.
///
/// ```text
/// None ─► Requested ─► Approved ─► Picked ─► Received ─► Closed
///             │            │
///             └────────────┴──► Rejected ─► (new request)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus {
    #[default]
    None,
    Requested,
    Approved,
    Picked,
    Received,
    Rejected,
    Closed,
}

impl ReturnStatus {
    /// Transitions an admin may apply through a status update.
    pub fn can_transition_to(&self, to: ReturnStatus) -> bool {
        matches!(
            (self, to),
            (ReturnStatus::Requested, ReturnStatus::Approved)
                | (ReturnStatus::Requested, ReturnStatus::Rejected)
                | (ReturnStatus::Approved, ReturnStatus::Picked)
                | (ReturnStatus::Approved, ReturnStatus::Rejected)
                | (ReturnStatus::Picked, ReturnStatus::Received)
                | (ReturnStatus::Received, ReturnStatus::Closed)
        )
    }

    /// A new return may be requested from here.
    pub fn allows_request(&self) -> bool {
        matches!(self, ReturnStatus::None | ReturnStatus::Rejected)
    }

    /// The return has been accepted and not yet settled.
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            ReturnStatus::Approved | ReturnStatus::Picked | ReturnStatus::Received
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::None => "NONE",
            ReturnStatus::Requested => "REQUESTED",
            ReturnStatus::Approved => "APPROVED",
            ReturnStatus::Picked => "PICKED",
            ReturnStatus::Received => "RECEIVED",
            ReturnStatus::Rejected => "REJECTED",
            ReturnStatus::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReturnStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => ReturnStatus::None,
            "REQUESTED" => ReturnStatus::Requested,
            "APPROVED" => ReturnStatus::Approved,
            "PICKED" => ReturnStatus::Picked,
            "RECEIVED" => ReturnStatus::Received,
            "REJECTED" => ReturnStatus::Rejected,
            "CLOSED" => ReturnStatus::Closed,
            _ => {
                return Err(ParseStatusError {
                    kind: "return status",
                    value: s.to_string(),
                });
            }
        };
        Ok(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnType {
    Refund,
    Replacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    #[default]
    None,
    Initiated,
    Completed,
    Failed,
}

impl RefundStatus {
    /// A refund is in flight or done; another must not start.
    pub fn blocks_new_refund(&self) -> bool {
        matches!(self, RefundStatus::Initiated | RefundStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundMethod {
    #[default]
    Wallet,
    Original,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Paid through the payment gateway.
    Online,
    /// Fully covered by the wallet.
    Wallet,
    /// Collected on delivery.
    #[default]
    Cod,
}
