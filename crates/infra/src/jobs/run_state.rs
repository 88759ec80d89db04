//! Running/Stopped flag shared between the coordinator and its loops.

use tokio::sync::watch;

/// Writer side of the pipeline run state. Owned by the coordinator.
#[derive(Debug)]
pub struct RunState {
    tx: watch::Sender<bool>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// Starts out Stopped.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn is_running(&self) -> bool {
        *self.tx.borrow()
    }

    /// Set the flag; returns `true` only for the caller that actually changed it.
    pub fn set_running(&self, running: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == running {
                false
            } else {
                *current = running;
                true
            }
        })
    }

    pub fn subscribe(&self) -> RunStateRx {
        RunStateRx(self.tx.subscribe())
    }
}

/// Reader side handed to workers and the scheduler.
#[derive(Debug, Clone)]
pub struct RunStateRx(watch::Receiver<bool>);

impl RunStateRx {
    pub fn is_running(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the pipeline is Stopped (immediately if it already is, or
    /// if the coordinator is gone).
    pub async fn stopped(&self) {
        let mut rx = self.0.clone();
        let _ = rx.wait_for(|running| !*running).await;
    }
}
