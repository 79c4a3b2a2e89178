use anyhow::Context;
use tracing::debug;

use crate::hub::HubHandle;
use crate::message::ImageChangeEvent;

/// Thin adapter between the watcher and the hub: serializes a detected
/// change and submits it to the broadcast inlet.
#[derive(Clone)]
pub struct ChangeNotifier {
    hub: HubHandle,
}

impl ChangeNotifier {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    /// Fails only if the event cannot be serialized. Slow clients never
    /// block this call; the hub's per-client queues isolate them.
    pub async fn notify(&self, event: &ImageChangeEvent) -> anyhow::Result<()> {
        let payload =
            serde_json::to_string(event).context("Failed to serialize image change event")?;
        debug!("Submitting broadcast payload {}", payload);
        self.hub.broadcast(payload).await;
        Ok(())
    }
}
