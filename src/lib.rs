//! ticket_ledger Library
//!
//! Credit ledger, refund workflow and ticket consistency rules for an event
//! ticketing platform. Every operation runs through a [`TransactionRunner`]
//! unit of work; no store handle crosses the public API.

pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
mod error;
pub mod jobs;
pub mod ledger;
pub mod purchases;
pub mod refunds;
pub mod telemetry;
pub mod tickets;
pub mod transaction;

pub use config::Config;
pub use domain::{CreditAmount, DomainError, PageRequest, Pagination, RequestContext, Role};
pub use error::{AppError, AppResult, ErrorKind};
pub use ledger::CreditLedger;
pub use purchases::PurchaseAggregate;
pub use refunds::{LogNotifier, NotificationDispatcher, RefundWorkflow};
pub use tickets::TicketStore;
pub use transaction::{IsolationLevel, Scope, TransactionRunner};
