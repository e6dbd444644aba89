//! Top-level wiring of the launch pipeline.
//!
//! ```text
//! launch_requested ─┬─> auth ──────────┐
//!                   └─> region ─ordering┴─> mandelbox ─┬─> host ─> protocol
//!                         auth.success ────────────────┘
//! every failure ─> stale filter ─> error dispatch ─> error_window
//! ```
//!
//! Each `launch_requested` trigger starts a new attempt and supersedes the
//! previous one. Stage inputs are joined by attempt id, and failures from a
//! superseded attempt are never shown.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use whist_core::{AuthInfo, AuthInput, ImportedData, Scoped, TriggerName};
use whist_flow::{AttemptTracker, Channel, TriggerBus, join_by_key};
use whist_services::{
    HostClient, HostConfigurer, HttpProber, KeyValueStore, MandelboxAssigner, RegionProber,
    ScalingClient, ServiceError, StoreKey, TokenClient, TokenRefresher,
};
use whist_settings::WhistSettings;

use crate::dispatch::{ErrorWindow, StageFailure, error_dispatch};
use crate::flows::{
    AuthOutputs, HostDeps, HostOutputs, HostRequest, MandelboxDeps, MandelboxOutputs,
    MandelboxRequest, RegionOutputs, auth_flow, host_flow, mandelbox_flow, region_flow,
};
use crate::protocol::{ProtocolLauncher, ProtocolOutputs, StreamLauncher, protocol_flow};

/// Payload of the `launch_requested` trigger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub auth: AuthInput,
    #[serde(default)]
    pub imported: ImportedData,
}

/// Every external collaborator the pipeline talks to.
#[derive(Clone)]
pub struct Services {
    pub refresher: Arc<dyn TokenRefresher>,
    pub prober: Arc<dyn RegionProber>,
    pub assigner: Arc<dyn MandelboxAssigner>,
    pub configurer: Arc<dyn HostConfigurer>,
    pub launcher: Arc<dyn StreamLauncher>,
    pub store: Arc<dyn KeyValueStore>,
}

impl Services {
    /// The production clients described by `settings`.
    pub fn from_settings(
        settings: &WhistSettings,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            refresher: Arc::new(TokenClient::new(&settings.auth)?),
            prober: Arc::new(HttpProber::new(&settings.regions)?),
            assigner: Arc::new(ScalingClient::new(&settings.scaling)?),
            configurer: Arc::new(HostClient::new(&settings.host)?),
            launcher: Arc::new(ProtocolLauncher::new(settings.protocol.clone())),
            store,
        })
    }
}

/// The wired pipeline's output channels.
pub struct Pipeline {
    pub auth: AuthOutputs,
    pub region: RegionOutputs,
    pub mandelbox: MandelboxOutputs,
    pub host: HostOutputs,
    pub protocol: ProtocolOutputs,
    /// Failures of the current attempt, from every stage.
    pub failures: Channel<StageFailure>,
    pub errors: Channel<ErrorWindow>,
    tracker: AttemptTracker,
    launcher: Arc<dyn StreamLauncher>,
}

impl Pipeline {
    /// Wire every stage onto `bus`.
    ///
    /// Must be called from within a Tokio runtime, before any trigger the
    /// pipeline should see is published.
    pub fn wire(
        bus: &TriggerBus,
        services: Services,
        settings: &WhistSettings,
        tracker: AttemptTracker,
    ) -> Self {
        let launches = {
            let tracker = tracker.clone();
            bus.from_trigger_as::<LaunchRequest>(TriggerName::LaunchRequested)
                .map(move |request| {
                    let (attempt, _) = tracker.begin();
                    info!(%attempt, user = %request.auth.user_email, "launch requested");
                    Scoped::new(attempt, request)
                })
        };
        let launches = Channel::from_stream("pipeline.launches", launches);

        let auth = auth_flow(
            launches.subscribe().map(|s| s.map(|r| r.auth)).boxed(),
            services.refresher,
        );
        let region = region_flow(
            launches.subscribe().map(|s| s.attempt).boxed(),
            services.prober,
            services.store,
            settings.regions.clone(),
        );

        // Credentials paired with the imported data of the same launch.
        let authorized: Channel<Scoped<(AuthInfo, ImportedData)>> = Channel::from_stream(
            "pipeline.authorized",
            join_by_key(
                launches.subscribe(),
                auth.success.subscribe(),
                |l| l.attempt.clone(),
                |a| a.attempt.clone(),
            )
            .map(|(launch, auth)| auth.map(|info| (info, launch.value.imported))),
        );

        let mandelbox = mandelbox_flow(
            join_by_key(
                authorized.subscribe(),
                region.ordering.subscribe(),
                |a| a.attempt.clone(),
                |r| r.attempt.clone(),
            )
            .map(|(auth, regions)| {
                auth.map(|(auth, _)| MandelboxRequest {
                    auth,
                    regions: regions.value,
                })
            })
            .boxed(),
            MandelboxDeps {
                assigner: services.assigner,
                policy: settings.scaling.retry.clone(),
                client: settings.client.clone(),
                tracker: tracker.clone(),
            },
        );

        let host = host_flow(
            join_by_key(
                authorized.subscribe(),
                mandelbox.success.subscribe(),
                |a| a.attempt.clone(),
                |m| m.attempt.clone(),
            )
            .map(|(auth, mandelbox)| {
                auth.map(|(auth, imported)| HostRequest {
                    auth,
                    mandelbox: mandelbox.value,
                    imported,
                })
            })
            .boxed(),
            HostDeps {
                configurer: services.configurer,
                preferences: settings.session.clone(),
                tracker: tracker.clone(),
            },
        );

        let protocol = protocol_flow(
            host.success.subscribe(),
            Arc::clone(&services.launcher),
            tracker.clone(),
        );

        let auth = AuthOutputs {
            success: bus.create_trigger(TriggerName::AuthFlowSuccess, auth.success),
            failure: bus.create_trigger(TriggerName::AuthFlowFailure, auth.failure),
        };
        let region = RegionOutputs {
            cached: bus.create_trigger(TriggerName::RegionCached, region.cached),
            refresh: bus.create_trigger(TriggerName::RegionRefresh, region.refresh),
            offline: bus.create_trigger(TriggerName::RegionOffline, region.offline),
            ..region
        };
        let mandelbox = MandelboxOutputs {
            success: bus.create_trigger(TriggerName::MandelboxCreateSuccess, mandelbox.success),
            failure: bus.create_trigger(TriggerName::MandelboxCreateFailure, mandelbox.failure),
        };
        let host = HostOutputs {
            success: bus.create_trigger(TriggerName::HostSpinUpSuccess, host.success),
            failure: bus.create_trigger(TriggerName::HostSpinUpFailure, host.failure),
        };
        let protocol = ProtocolOutputs {
            launched: bus.create_trigger(TriggerName::ProtocolLaunched, protocol.launched),
            closed: bus.create_trigger(TriggerName::ProtocolClosed, protocol.closed),
            failure: bus.create_trigger(TriggerName::ProtocolFailure, protocol.failure),
        };

        let merged = Channel::merge(
            "pipeline.failures.all",
            &[
                auth.failure.map("pipeline.failures.auth", StageFailure::from),
                region.failure.map("pipeline.failures.region", StageFailure::Region),
                mandelbox.failure.map("pipeline.failures.mandelbox", StageFailure::from),
                host.failure.map("pipeline.failures.host", StageFailure::from),
                protocol.failure.map("pipeline.failures.protocol", StageFailure::from),
            ],
        );
        let failures = {
            let tracker = tracker.clone();
            Channel::from_stream(
                "pipeline.failures",
                merged.subscribe().filter(move |failure| {
                    let current = failure.attempt().is_none_or(|a| tracker.is_current(a));
                    if !current {
                        debug!(stage = failure.stage(), "dropping failure of a superseded attempt");
                    }
                    std::future::ready(current)
                }),
            )
        };
        let errors = error_dispatch(bus, &failures);

        Self {
            auth,
            region,
            mandelbox,
            host,
            protocol,
            failures,
            errors,
            tracker,
            launcher: services.launcher,
        }
    }

    /// Supersede the current attempt and stop the streaming client.
    pub async fn shutdown(&self) {
        self.tracker.cancel_current();
        self.launcher.shutdown().await;
    }
}

/// Write credentials from every `auth_flow_success` back to `store`.
///
/// A refreshed access token, a rotated refresh token and a newly generated
/// config token all survive to the next launch.
pub fn persist_auth(bus: &TriggerBus, store: Arc<dyn KeyValueStore>) -> JoinHandle<()> {
    bus.on(TriggerName::AuthFlowSuccess, move |payload| {
        let info = match serde_json::from_value::<Scoped<AuthInfo>>(payload) {
            Ok(scoped) => scoped.value,
            Err(err) => {
                warn!(error = %err, "undecodable auth payload, not persisted");
                return;
            }
        };
        let mut writes = vec![
            (StoreKey::UserEmail, info.user_email.as_str()),
            (StoreKey::AccessToken, info.access_token.as_str()),
            (StoreKey::ConfigToken, info.config_token.as_str()),
        ];
        if let Some(refresh) = info.refresh_token.as_deref() {
            writes.push((StoreKey::RefreshToken, refresh));
        }
        for (key, value) in writes {
            if let Err(err) = store.set(key, value) {
                warn!(%key, error = %err, "could not persist credential");
            }
        }
        debug!(new_config_token = info.is_new_config_token, "credentials persisted");
    })
}

/// Load stored credentials into a launch request.
///
/// Returns `None` when no user has signed in on this machine.
pub fn stored_credentials(store: &dyn KeyValueStore) -> Result<Option<AuthInput>, ServiceError> {
    let Some(user_email) = store.get(StoreKey::UserEmail)? else {
        return Ok(None);
    };
    Ok(Some(AuthInput {
        user_email,
        access_token: store.get(StoreKey::AccessToken)?.unwrap_or_default(),
        refresh_token: store.get(StoreKey::RefreshToken)?,
        config_token: store.get(StoreKey::ConfigToken)?,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
