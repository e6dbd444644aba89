//! In-process stand-in for the streaming client.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use whist_core::HostSpinUpResult;

use super::{Launch, ProtocolError, ProtocolExit, StreamLauncher};

/// Records every launch. The "process" runs until [`MockLauncher::exit`]
/// or [`StreamLauncher::shutdown`].
#[derive(Default)]
pub struct MockLauncher {
    running: Mutex<Option<oneshot::Sender<ProtocolExit>>>,
    launches: Mutex<Vec<HostSpinUpResult>>,
    spawns: Mutex<usize>,
    error: Option<ProtocolError>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every launch fails with `error`.
    pub fn failing(error: ProtocolError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// End the running process with `code`.
    pub fn exit(&self, code: i32) {
        if let Some(tx) = self.running.lock().take() {
            let _ = tx.send(ProtocolExit { code: Some(code) });
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Hosts passed to `launch`, in call order.
    pub fn launches(&self) -> Vec<HostSpinUpResult> {
        self.launches.lock().clone()
    }

    pub fn spawn_count(&self) -> usize {
        *self.spawns.lock()
    }
}

#[async_trait]
impl StreamLauncher for MockLauncher {
    async fn launch(&self, host: &HostSpinUpResult) -> Result<Launch, ProtocolError> {
        self.launches.lock().push(host.clone());
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.is_running() {
            return Ok(Launch::Updated);
        }
        let (tx, rx) = oneshot::channel();
        *self.running.lock() = Some(tx);
        *self.spawns.lock() += 1;
        Ok(Launch::Spawned(
            rx.map(|exit| exit.unwrap_or_default()).boxed(),
        ))
    }

    async fn shutdown(&self) {
        self.exit(0);
    }
}
