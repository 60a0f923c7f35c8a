//! Domain module
//!
//! Core domain types and business rules, free of persistence concerns.

pub mod amount;
pub mod context;
pub mod error;
pub mod pagination;
pub mod status;

pub use amount::{AmountError, CreditAmount};
pub use context::{RequestContext, Role};
pub use error::DomainError;
pub use pagination::{PageRequest, Pagination};
pub use status::{
    PaymentMethod, PurchaseStatus, RefundDecision, RefundRoute, RefundStatus, TicketStatus,
};
