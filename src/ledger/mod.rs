//! Ledger module
//!
//! Per-user credit ledger: balance, history and append-only recording.

mod labels;
mod service;

pub use labels::{CreditTransactionType, TypeLabels};
pub use service::{
    CreditHistory, CreditHistoryEntry, CreditLedger, CreditTransaction, NewCreditTransaction,
};
