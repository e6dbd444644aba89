//! Protocol stage: hand a configured host to the streaming client.
//!
//! The client is an external process driven over stdin (see [`handshake`]).
//! `launched` fires once the connection block has been written, `closed` when
//! the process exits cleanly, `failure` when it cannot start or exits with
//! anything but 0.

pub mod handshake;
pub mod launcher;
pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, FuturesUnordered};
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use whist_core::{AttemptId, HostSpinUpResult, Scoped};
use whist_flow::{AttemptTracker, Channel, Flow, FlowError, FlowOutputs, flow};

pub use handshake::{HandshakeError, HandshakeLine};
pub use launcher::ProtocolLauncher;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolError {
    #[error("could not start protocol: {0}")]
    Spawn(String),
    #[error("protocol I/O failed: {0}")]
    Io(String),
    #[error("could not encode handshake: {0}")]
    Handshake(String),
    #[error("protocol exited with {}", code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    Exited { code: Option<i32> },
    #[error(transparent)]
    Faulted(FlowError),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// How the client process ended. `code` is `None` when it was killed by a signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolExit {
    pub code: Option<i32>,
}

impl ProtocolExit {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

/// Outcome of [`StreamLauncher::launch`].
pub enum Launch {
    /// A new process; the future resolves when it exits.
    Spawned(BoxFuture<'static, ProtocolExit>),
    /// An already-running process received the new connection.
    Updated,
}

impl std::fmt::Debug for Launch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawned(_) => f.write_str("Spawned(..)"),
            Self::Updated => f.write_str("Updated"),
        }
    }
}

/// Starts (or re-targets) the streaming client.
#[async_trait]
pub trait StreamLauncher: Send + Sync {
    async fn launch(&self, host: &HostSpinUpResult) -> Result<Launch, ProtocolError>;

    /// Ask the client to exit, forcing it after a grace period.
    async fn shutdown(&self);
}

/// Failure output of the protocol stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolFailure {
    pub attempt: Option<AttemptId>,
    pub error: ProtocolError,
}

impl From<FlowError> for ProtocolFailure {
    fn from(err: FlowError) -> Self {
        Self {
            attempt: None,
            error: ProtocolError::Faulted(err),
        }
    }
}

pub struct ProtocolOutputs {
    pub launched: Channel<Scoped<HostSpinUpResult>>,
    pub closed: Channel<Scoped<ProtocolExit>>,
    pub failure: Channel<ProtocolFailure>,
}

impl FlowOutputs for ProtocolOutputs {
    fn faulted(flow: &Flow, error: FlowError) -> Self {
        Self {
            launched: Channel::closed(format!("{}.launched", flow.name())),
            closed: Channel::closed(format!("{}.closed", flow.name())),
            failure: Channel::once(format!("{}.failure", flow.name()), error.into()),
        }
    }
}

#[derive(Clone, Debug)]
enum ProtocolEvent {
    Launched(Scoped<HostSpinUpResult>),
    Closed(Scoped<ProtocolExit>),
    Failed(ProtocolFailure),
}

enum Step {
    Input(Option<Scoped<HostSpinUpResult>>),
    Exited(u64, ProtocolExit),
}

/// Exit of one spawned process, keyed by its spawn generation.
type ExitFuture = BoxFuture<'static, (u64, ProtocolExit)>;

/// Which attempt owns each live process.
///
/// An update hands the running process to the updating attempt, so its exit
/// is reported against the newest attempt that drove it.
#[derive(Debug, Default)]
struct Owners {
    latest: u64,
    by_generation: HashMap<u64, AttemptId>,
}

impl Owners {
    fn spawned(&mut self, attempt: AttemptId) -> u64 {
        self.latest += 1;
        self.by_generation.insert(self.latest, attempt);
        self.latest
    }

    fn updated(&mut self, attempt: AttemptId) {
        self.by_generation.insert(self.latest, attempt);
    }

    fn exited(&mut self, generation: u64) -> Option<AttemptId> {
        self.by_generation.remove(&generation)
    }
}

/// The protocol flow. Launches are sequential; process exits are watched
/// alongside new input so a running client never blocks the next launch.
pub fn protocol_flow(
    input: BoxStream<'static, Scoped<HostSpinUpResult>>,
    launcher: Arc<dyn StreamLauncher>,
    tracker: AttemptTracker,
) -> ProtocolOutputs {
    flow("protocol", input, move |ctx, mut input| {
        let events = async_stream::stream! {
            let mut exits: FuturesUnordered<ExitFuture> = FuturesUnordered::new();
            let mut owners = Owners::default();
            let mut input_done = false;
            loop {
                let step = tokio::select! {
                    item = input.next(), if !input_done => Step::Input(item),
                    Some((generation, exit)) = exits.next(), if !exits.is_empty() => Step::Exited(generation, exit),
                    else => break,
                };
                match step {
                    Step::Input(None) => input_done = true,
                    Step::Input(Some(Scoped { attempt, value })) => {
                        if !tracker.is_current(&attempt) {
                            debug!(%attempt, "attempt superseded before protocol launch");
                            continue;
                        }
                        match launcher.launch(&value).await {
                            Ok(Launch::Spawned(exit)) => {
                                let generation = owners.spawned(attempt.clone());
                                exits.push(exit.map(move |exit| (generation, exit)).boxed());
                                info!(%attempt, ip = %value.mandelbox_ip, "protocol launched");
                                yield ProtocolEvent::Launched(Scoped::new(attempt, value));
                            }
                            Ok(Launch::Updated) => {
                                owners.updated(attempt.clone());
                                info!(%attempt, ip = %value.mandelbox_ip, "running protocol updated");
                                yield ProtocolEvent::Launched(Scoped::new(attempt, value));
                            }
                            Err(error) => {
                                warn!(%attempt, %error, "protocol launch failed");
                                yield ProtocolEvent::Failed(ProtocolFailure { attempt: Some(attempt), error });
                            }
                        }
                    }
                    Step::Exited(generation, exit) => {
                        let Some(attempt) = owners.exited(generation) else {
                            warn!(generation, "exit of an untracked protocol process");
                            continue;
                        };
                        if exit.success() {
                            yield ProtocolEvent::Closed(Scoped::new(attempt, exit));
                        } else {
                            warn!(%attempt, code = ?exit.code, "protocol exited unexpectedly");
                            yield ProtocolEvent::Failed(ProtocolFailure {
                                attempt: Some(attempt),
                                error: ProtocolError::Exited { code: exit.code },
                            });
                        }
                    }
                }
            }
        };
        let events = Channel::from_stream("protocol.events", events);

        let launched = ctx.channel(
            "launched",
            events.subscribe().filter_map(|e| {
                std::future::ready(match e {
                    ProtocolEvent::Launched(s) => Some(s),
                    _ => None,
                })
            }),
        );
        let closed = ctx.channel(
            "closed",
            events.subscribe().filter_map(|e| {
                std::future::ready(match e {
                    ProtocolEvent::Closed(s) => Some(s),
                    _ => None,
                })
            }),
        );
        let failure = ctx.channel(
            "failure",
            events.subscribe().filter_map(|e| {
                std::future::ready(match e {
                    ProtocolEvent::Failed(f) => Some(f),
                    _ => None,
                })
            }),
        );
        Ok(ProtocolOutputs {
            launched,
            closed,
            failure,
        })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
