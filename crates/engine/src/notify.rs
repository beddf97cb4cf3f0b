use commitstreak_types::{NotificationSink, Result};
use tracing::info;

/// Emits badge announcements as log events. Used by the CLI, which has no
/// push channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<()> {
        info!(target: "commitstreak::notify", title, body, "badge announcement");
        Ok(())
    }
}
