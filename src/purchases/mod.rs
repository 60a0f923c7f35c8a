//! Purchases module

mod aggregate;

pub use aggregate::{
    EventSummary, Purchase, PurchaseAggregate, PurchaseDetails, PurchaseHistory, PurchaseItem,
    PurchaseSummary,
};
