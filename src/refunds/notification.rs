//! Notification dispatch
//!
//! Delivery (email templates, transports) lives outside the core. The refund
//! workflow only asks a dispatcher to send a templated notification after its
//! unit of work has committed.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Notification templates the core requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RefundCompleted,
    RefundRejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::RefundCompleted => "refund_completed",
            NotificationKind::RefundRejected => "refund_rejected",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("Notification transport failed: {0}")]
    Transport(String),
}

/// Seam to the notification collaborator.
///
/// Failures are reported to the caller, who logs them. They never affect a
/// committed financial transaction.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_notification(
        &self,
        kind: NotificationKind,
        data: serde_json::Value,
    ) -> Result<(), NotificationError>;
}

/// Dispatcher that records the request in the log. Default for binaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn send_notification(
        &self,
        kind: NotificationKind,
        data: serde_json::Value,
    ) -> Result<(), NotificationError> {
        info!(kind = %kind, data = %data, "Notification requested");
        Ok(())
    }
}
