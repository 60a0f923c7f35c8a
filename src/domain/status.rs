//! Lifecycle states
//!
//! Ticket, refund and purchase statuses as stored in TEXT columns, the
//! transitions the core allows between them, and the payment-method policy
//! that decides how a completed refund is repaid.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

// =========================================================================
// Ticket status
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Purchased,
    /// Cancellation pending: a refund has been requested
    Cancelled,
    Refunded,
    CheckedIn,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Purchased => "purchased",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Refunded => "refunded",
            TicketStatus::CheckedIn => "checked_in",
        }
    }

    /// Whether the ticket still admits its holder to the event
    pub fn is_valid_admission(&self) -> bool {
        matches!(self, TicketStatus::Purchased | TicketStatus::CheckedIn)
    }

    /// Validate a status change.
    ///
    /// Refunded is terminal. Cancelled only leaves through a refund decision
    /// (refunded, or back to the status it was requested from).
    pub fn ensure_transition(self, to: TicketStatus) -> Result<(), DomainError> {
        use TicketStatus::*;

        let allowed = matches!(
            (self, to),
            (Purchased, CheckedIn)
                | (Purchased, Cancelled)
                | (Cancelled, Refunded)
                | (Cancelled, Purchased)
                | (CheckedIn, CheckedIn)
        );

        if allowed {
            Ok(())
        } else {
            Err(DomainError::invalid_transition("ticket", self, to))
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchased" => Ok(TicketStatus::Purchased),
            "cancelled" => Ok(TicketStatus::Cancelled),
            "refunded" => Ok(TicketStatus::Refunded),
            "checked_in" => Ok(TicketStatus::CheckedIn),
            other => Err(DomainError::InvalidStatus(format!(
                "unknown ticket status '{}'",
                other
            ))),
        }
    }
}

// =========================================================================
// Refund status and decisions
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Requested,
    Completed,
    Rejected,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Requested => "requested",
            RefundStatus::Completed => "completed",
            RefundStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RefundStatus::Requested)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(RefundStatus::Requested),
            "completed" => Ok(RefundStatus::Completed),
            "rejected" => Ok(RefundStatus::Rejected),
            other => Err(DomainError::InvalidStatus(format!(
                "unknown refund status '{}'",
                other
            ))),
        }
    }
}

/// An administrator's verdict on a requested refund
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundDecision {
    Completed,
    Rejected,
}

impl RefundDecision {
    pub fn as_str(&self) -> &'static str {
        self.status().as_str()
    }

    /// The refund status this decision moves to
    pub fn status(&self) -> RefundStatus {
        match self {
            RefundDecision::Completed => RefundStatus::Completed,
            RefundDecision::Rejected => RefundStatus::Rejected,
        }
    }
}

impl fmt::Display for RefundDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundDecision {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(RefundDecision::Completed),
            "rejected" => Ok(RefundDecision::Rejected),
            other => Err(DomainError::InvalidStatus(format!(
                "refund decision must be 'completed' or 'rejected', got '{}'",
                other
            ))),
        }
    }
}

// =========================================================================
// Purchase status
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Completed,
    PartiallyRefunded,
    Refunded,
    Cancelled,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::PartiallyRefunded => "partially_refunded",
            PurchaseStatus::Refunded => "refunded",
            PurchaseStatus::Cancelled => "cancelled",
        }
    }

    /// Status rollup after a refund completes
    pub fn after_refund(refunded_tickets: i64, total_tickets: i64) -> Self {
        if total_tickets > 0 && refunded_tickets >= total_tickets {
            PurchaseStatus::Refunded
        } else {
            PurchaseStatus::PartiallyRefunded
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(PurchaseStatus::Completed),
            "partially_refunded" => Ok(PurchaseStatus::PartiallyRefunded),
            "refunded" => Ok(PurchaseStatus::Refunded),
            "cancelled" => Ok(PurchaseStatus::Cancelled),
            other => Err(DomainError::InvalidStatus(format!(
                "unknown purchase status '{}'",
                other
            ))),
        }
    }
}

// =========================================================================
// Payment method and refund routing
// =========================================================================

/// How the original purchase was paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// The platform's own credit balance
    Credit,
    Card,
    Paypal,
    BankTransfer,
    Other(String),
}

/// Where the money of a completed refund goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundRoute {
    /// Credited to the user's ledger as purchasable credit
    StoreCredit,
    /// Repaid out-of-band; the money already left the ledger
    ExternalRepayment,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentMethod::Credit => "credit",
            PaymentMethod::Card => "card",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Other(method) => method,
        }
    }

    /// Refund policy: credit and card purchases are refunded as store credit.
    pub fn refund_route(&self) -> RefundRoute {
        match self {
            PaymentMethod::Credit | PaymentMethod::Card => RefundRoute::StoreCredit,
            _ => RefundRoute::ExternalRepayment,
        }
    }
}

impl From<&str> for PaymentMethod {
    fn from(s: &str) -> Self {
        match s {
            "credit" => PaymentMethod::Credit,
            "card" => PaymentMethod::Card,
            "paypal" => PaymentMethod::Paypal,
            "bank_transfer" => PaymentMethod::BankTransfer,
            other => PaymentMethod::Other(other.to_string()),
        }
    }
}

impl From<String> for PaymentMethod {
    fn from(s: String) -> Self {
        PaymentMethod::from(s.as_str())
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
