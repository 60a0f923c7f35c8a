//! Transaction module
//!
//! Units of work over the shared Postgres pool.

mod runner;

pub use runner::{IsolationLevel, Scope, TransactionRunner};
