//! Local user notifications.

use tracing::info;

/// Where "training finished" notices go.
pub trait Notifier: Send + Sync {
    /// Whether the user allowed notifications.
    fn permission_granted(&self) -> bool;

    fn notify(&self, title: &str, body: &str);
}

/// Emits notifications as log events. Permission follows configuration.
pub struct TracingNotifier {
    enabled: bool,
}

impl TracingNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Notifier for TracingNotifier {
    fn permission_granted(&self) -> bool {
        self.enabled
    }

    fn notify(&self, title: &str, body: &str) {
        info!(title = %title, "{}", body);
    }
}
