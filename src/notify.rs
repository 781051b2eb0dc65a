//! User-facing notifications on check-state transitions.

use crate::db::Service;
use std::sync::Arc;

const NOTIFICATION_TITLE: &str = "Server Check";

/// Delivery channel for user notifications. Fire-and-forget; the engine never
/// consumes a return value from delivery.
pub trait Notifier: Send + Sync {
    /// Raise or replace the notification with the given id.
    fn notify(&self, id: i64, title: &str, message: &str);
    /// Clear the notification with the given id, if any.
    fn cancel(&self, id: i64);
}

/// Notifier that writes to the log. Default for headless deployments.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, id: i64, title: &str, message: &str) {
        tracing::warn!("[notification {}] {}: {}", id, title, message);
    }

    fn cancel(&self, id: i64) {
        tracing::debug!("[notification {}] cleared", id);
    }
}

/// Decides, per check result, whether to raise or clear a notification.
///
/// Failures raise a notification keyed by the service id, so repeat failures
/// replace rather than stack. An `"ok"` result only ever clears; a healthy
/// service never creates a notification.
pub struct NotificationGate {
    notifier: Arc<dyn Notifier>,
}

impl NotificationGate {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn on_result(&self, service: &Service, status: &str) {
        if status == "ok" {
            self.notifier.cancel(service.id);
        } else {
            self.notifier.notify(
                service.id,
                NOTIFICATION_TITLE,
                &format!("Server is down: {} ({})", service.url, status),
            );
        }
    }
}
