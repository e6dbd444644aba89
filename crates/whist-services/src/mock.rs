//! Scripted service fakes for deterministic tests without network access.
//!
//! Each fake answers from a script in call order. Once the script runs out the
//! last reply repeats, so "fails on every attempt" is a one-entry script.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use whist_core::AwsRegion;

use crate::auth::{TokenRefresher, TokenResponse};
use crate::errors::ServiceError;
use crate::host::{HostConfigRequest, HostConfigurer, HostResponse, HostResult};
use crate::ping::RegionProber;
use crate::scaling::{AssignBody, AssignRequest, AssignResponse, MandelboxAssigner};

/// One pre-programmed reply.
#[derive(Clone, Debug)]
pub enum MockReply<T> {
    Ok(T),
    /// Fail before any response arrives.
    Transport(String),
    /// Non-200 from the token endpoint.
    Rejected { status: u16, message: String },
    /// Wait, then answer with the inner reply.
    Delay(Duration, Box<MockReply<T>>),
}

impl<T> MockReply<T> {
    pub fn delayed(delay: Duration, inner: Self) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

struct Script<T> {
    replies: Vec<MockReply<T>>,
    call_count: AtomicUsize,
}

impl<T: Clone> Script<T> {
    fn new(replies: Vec<MockReply<T>>) -> Self {
        Self {
            replies,
            call_count: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn next(&self) -> Result<T, ServiceError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let Some(mut reply) = self.replies.get(idx).or(self.replies.last()).cloned() else {
            return Err(ServiceError::Transport(format!("no reply scripted for call {idx}")));
        };
        loop {
            match reply {
                MockReply::Ok(value) => return Ok(value),
                MockReply::Transport(message) => return Err(ServiceError::Transport(message)),
                MockReply::Rejected { status, message } => {
                    return Err(ServiceError::OAuth { status, message });
                }
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token endpoint
// ─────────────────────────────────────────────────────────────────────────────

pub struct MockRefresher {
    script: Script<TokenResponse>,
    seen: Mutex<Vec<String>>,
}

impl MockRefresher {
    pub fn new(replies: Vec<MockReply<TokenResponse>>) -> Self {
        Self {
            script: Script::new(replies),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always issue `access_token`, rotating nothing.
    pub fn issuing(access_token: &str) -> Self {
        Self::new(vec![MockReply::Ok(TokenResponse {
            access_token: access_token.to_string(),
            refresh_token: None,
            id_token: None,
            expires_in: None,
        })])
    }

    pub fn call_count(&self) -> usize {
        self.script.calls()
    }

    /// Refresh tokens received, in call order.
    pub fn refresh_tokens(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ServiceError> {
        self.seen.lock().push(refresh_token.to_string());
        self.script.next().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scaling service
// ─────────────────────────────────────────────────────────────────────────────

pub struct MockAssigner {
    script: Script<AssignResponse>,
    seen: Mutex<Vec<AssignRequest>>,
}

impl MockAssigner {
    pub fn new(replies: Vec<MockReply<AssignResponse>>) -> Self {
        Self {
            script: Script::new(replies),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A 200 reply assigning `mandelbox_id` at `ip`.
    pub fn assigned(mandelbox_id: &str, ip: &str) -> MockReply<AssignResponse> {
        MockReply::Ok(AssignResponse {
            status: 200,
            body: AssignBody {
                mandelbox_id: Some(mandelbox_id.to_string()),
                ip: Some(ip.to_string()),
                error: None,
            },
        })
    }

    /// An error reply with an optional error code.
    pub fn refused(status: u16, error: Option<&str>) -> MockReply<AssignResponse> {
        MockReply::Ok(AssignResponse {
            status,
            body: AssignBody {
                error: error.map(str::to_string),
                ..AssignBody::default()
            },
        })
    }

    pub fn call_count(&self) -> usize {
        self.script.calls()
    }

    pub fn requests(&self) -> Vec<AssignRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl MandelboxAssigner for MockAssigner {
    async fn assign(
        &self,
        _access_token: &str,
        request: &AssignRequest,
    ) -> Result<AssignResponse, ServiceError> {
        self.seen.lock().push(request.clone());
        self.script.next().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host service
// ─────────────────────────────────────────────────────────────────────────────

pub struct MockHostConfigurer {
    script: Script<HostResponse>,
    seen: Mutex<Vec<(String, HostConfigRequest)>>,
}

impl MockHostConfigurer {
    pub fn new(replies: Vec<MockReply<HostResponse>>) -> Self {
        Self {
            script: Script::new(replies),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A 200 reply carrying `result`.
    pub fn answering(result: HostResult) -> MockReply<HostResponse> {
        MockReply::Ok(HostResponse {
            status: 200,
            result: Some(result),
            error: None,
        })
    }

    /// A complete host result with consecutive ports from `base`.
    pub fn complete(base: u16, aes_key: &str) -> HostResult {
        HostResult {
            port_32262: Some(base),
            port_32263: Some(base + 1),
            port_32273: Some(base + 2),
            aes_key: Some(aes_key.to_string()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.script.calls()
    }

    /// `(mandelbox_ip, request)` pairs, in call order.
    pub fn requests(&self) -> Vec<(String, HostConfigRequest)> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl HostConfigurer for MockHostConfigurer {
    async fn configure(
        &self,
        mandelbox_ip: &str,
        request: &HostConfigRequest,
    ) -> Result<HostResponse, ServiceError> {
        self.seen.lock().push((mandelbox_ip.to_string(), request.clone()));
        self.script.next().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Region probes
// ─────────────────────────────────────────────────────────────────────────────

/// Per-region latency samples in milliseconds; `None` is a failed probe.
/// Regions without samples always fail.
#[derive(Default)]
pub struct MockProber {
    samples: HashMap<AwsRegion, Vec<Option<u64>>>,
    calls: Mutex<HashMap<AwsRegion, usize>>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every probe of `region` answers after `ms`.
    #[must_use]
    pub fn with_latency(self, region: AwsRegion, ms: u64) -> Self {
        self.with_samples(region, vec![Some(ms)])
    }

    /// Probes of `region` answer from `samples` in order, repeating the last.
    #[must_use]
    pub fn with_samples(mut self, region: AwsRegion, samples: Vec<Option<u64>>) -> Self {
        let _ = self.samples.insert(region, samples);
        self
    }

    pub fn probes_of(&self, region: AwsRegion) -> usize {
        self.calls.lock().get(&region).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RegionProber for MockProber {
    async fn probe(&self, region: AwsRegion) -> Result<Duration, ServiceError> {
        let idx = {
            let mut calls = self.calls.lock();
            let count = calls.entry(region).or_insert(0);
            *count += 1;
            *count - 1
        };
        let sample = self
            .samples
            .get(&region)
            .and_then(|s| s.get(idx).or(s.last()).copied().flatten());
        match sample {
            Some(ms) => Ok(Duration::from_millis(ms)),
            None => Err(ServiceError::ProbeTimeout(0)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
