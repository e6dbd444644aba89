//! Owns the streaming client subprocess.
//!
//! At most one client runs at a time. A launch while it is alive feeds it the
//! new connection block instead of spawning a second process.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, info, warn};
use whist_core::HostSpinUpResult;
use whist_settings::ProtocolSettings;

use super::handshake::{self, HandshakeLine};
use super::{Launch, ProtocolError, ProtocolExit, StreamLauncher};

struct Running {
    stdin: Option<ChildStdin>,
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<ProtocolExit>>,
}

impl Running {
    fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    async fn write(&mut self, text: &str) -> Result<(), ProtocolError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ProtocolError::Io("stdin already closed".into()))?;
        stdin.write_all(text.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn force_kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

async fn wait_exit(mut exit: watch::Receiver<Option<ProtocolExit>>) -> ProtocolExit {
    match exit.wait_for(Option::is_some).await {
        Ok(value) => (*value).unwrap_or_default(),
        Err(_) => ProtocolExit::default(),
    }
}

async fn monitor(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exit: watch::Sender<Option<ProtocolExit>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill => {
            if let Err(err) = child.start_kill() {
                warn!(error = %err, "could not kill protocol");
            }
            child.wait().await
        }
    };
    let code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(error = %err, "lost track of protocol process");
            None
        }
    };
    info!(?code, "protocol exited");
    let _ = exit.send(Some(ProtocolExit { code }));
}

/// Spawns the client binary from [`ProtocolSettings`].
pub struct ProtocolLauncher {
    settings: ProtocolSettings,
    running: Mutex<Option<Running>>,
}

impl ProtocolLauncher {
    pub fn new(settings: ProtocolSettings) -> Self {
        Self {
            settings,
            running: Mutex::new(None),
        }
    }

    fn spawn(&self) -> Result<Running, ProtocolError> {
        let mut child = Command::new(&self.settings.binary_path)
            .args(&self.settings.args)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProtocolError::Spawn(format!("{}: {e}", self.settings.binary_path)))?;
        info!(pid = ?child.id(), binary = %self.settings.binary_path, "protocol spawned");

        let stdin = child.stdin.take();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        drop(tokio::spawn(monitor(child, kill_rx, exit_tx)));
        Ok(Running {
            stdin,
            kill: Some(kill_tx),
            exit: exit_rx,
        })
    }
}

#[async_trait]
impl StreamLauncher for ProtocolLauncher {
    async fn launch(&self, host: &HostSpinUpResult) -> Result<Launch, ProtocolError> {
        let block = handshake::encode(host).map_err(|e| ProtocolError::Handshake(e.to_string()))?;
        let mut running = self.running.lock().await;

        if let Some(current) = running.as_mut().filter(|r| r.is_alive()) {
            current.write(&block).await?;
            info!(ip = %host.mandelbox_ip, "sent new connection to running protocol");
            return Ok(Launch::Updated);
        }

        let mut fresh = self.spawn()?;
        if let Err(err) = fresh.write(&block).await {
            fresh.force_kill();
            return Err(err);
        }
        debug!(ip = %host.mandelbox_ip, "handshake written");
        let exit = wait_exit(fresh.exit.clone()).boxed();
        *running = Some(fresh);
        Ok(Launch::Spawned(exit))
    }

    async fn shutdown(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            return;
        };
        if !running.is_alive() {
            return;
        }
        if let Err(err) = running.write(&format!("{}\n", HandshakeLine::Kill)).await {
            debug!(error = %err, "could not send kill request");
        }
        drop(running.stdin.take());

        let grace = Duration::from_millis(self.settings.kill_grace_ms);
        if let Ok(exit) = tokio::time::timeout(grace, wait_exit(running.exit.clone())).await {
            info!(code = ?exit.code, "protocol shut down");
            return;
        }
        warn!(grace_ms = self.settings.kill_grace_ms, "protocol ignored kill request, force-killing");
        running.force_kill();
        let exit = wait_exit(running.exit.clone()).await;
        info!(code = ?exit.code, "protocol killed");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
