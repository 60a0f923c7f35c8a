//! Credit transaction types and their display labels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a credit movement. Stored as free-form TEXT; unknown values
/// are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CreditTransactionType {
    Purchase,
    Refund,
    ExchangePayment,
    ExchangeRefund,
    AdminAdjustment,
    Bonus,
    Other(String),
}

/// Human-readable strings shown next to a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeLabels {
    pub type_label: &'static str,
    pub action_text: &'static str,
}

const GENERIC_LABELS: TypeLabels = TypeLabels {
    type_label: "Credit adjustment",
    action_text: "Balance adjusted",
};

impl CreditTransactionType {
    pub fn as_str(&self) -> &str {
        match self {
            CreditTransactionType::Purchase => "purchase",
            CreditTransactionType::Refund => "refund",
            CreditTransactionType::ExchangePayment => "exchange_payment",
            CreditTransactionType::ExchangeRefund => "exchange_refund",
            CreditTransactionType::AdminAdjustment => "admin_adjustment",
            CreditTransactionType::Bonus => "bonus",
            CreditTransactionType::Other(raw) => raw,
        }
    }

    pub fn labels(&self) -> TypeLabels {
        match self {
            CreditTransactionType::Purchase => TypeLabels {
                type_label: "Ticket purchase",
                action_text: "Used for ticket purchase",
            },
            CreditTransactionType::Refund => TypeLabels {
                type_label: "Ticket refund",
                action_text: "Refunded to your balance",
            },
            CreditTransactionType::ExchangePayment => TypeLabels {
                type_label: "Ticket exchange",
                action_text: "Paid for ticket exchange",
            },
            CreditTransactionType::ExchangeRefund => TypeLabels {
                type_label: "Exchange refund",
                action_text: "Refunded from ticket exchange",
            },
            CreditTransactionType::AdminAdjustment => TypeLabels {
                type_label: "Admin adjustment",
                action_text: "Adjusted by an administrator",
            },
            CreditTransactionType::Bonus => TypeLabels {
                type_label: "Bonus credit",
                action_text: "Bonus added to your balance",
            },
            CreditTransactionType::Other(_) => GENERIC_LABELS,
        }
    }
}

impl From<&str> for CreditTransactionType {
    fn from(s: &str) -> Self {
        match s {
            "purchase" => CreditTransactionType::Purchase,
            "refund" => CreditTransactionType::Refund,
            "exchange_payment" => CreditTransactionType::ExchangePayment,
            "exchange_refund" => CreditTransactionType::ExchangeRefund,
            "admin_adjustment" => CreditTransactionType::AdminAdjustment,
            "bonus" => CreditTransactionType::Bonus,
            other => CreditTransactionType::Other(other.to_string()),
        }
    }
}

impl From<String> for CreditTransactionType {
    fn from(s: String) -> Self {
        CreditTransactionType::from(s.as_str())
    }
}

impl From<CreditTransactionType> for String {
    fn from(t: CreditTransactionType) -> Self {
        match t {
            CreditTransactionType::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for CreditTransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
