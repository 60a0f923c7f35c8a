//! Refunds module
//!
//! Refund request/decision workflow and the notification seam it reports to.

mod notification;
mod workflow;

pub use notification::{LogNotifier, NotificationDispatcher, NotificationError, NotificationKind};
pub use workflow::{Refund, RefundDecisionOutcome, RefundWorkflow};
