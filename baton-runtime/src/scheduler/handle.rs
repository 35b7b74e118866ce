use tokio::task::JoinHandle;
use tracing::warn;

use crate::lifecycle::StopTrigger;

/// Loops spawned by one `start()`, with the flag that stops them.
pub(crate) struct RunHandle {
    pub(crate) trigger: StopTrigger,
    pub(crate) loops: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// Ask every loop to exit at its next wake point.
    pub(crate) fn stop(&self) {
        self.trigger.trigger();
    }

    /// Stop and wait for every loop to exit. In-flight handlers run to completion.
    pub(crate) async fn join(self) {
        self.stop();
        for handle in self.loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler loop ended abnormally");
            }
        }
    }
}
