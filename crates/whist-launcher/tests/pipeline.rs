//! End-to-end launches through the wired pipeline, with every external
//! service replaced by a scripted fake.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use jsonwebtoken::{EncodingKey, Header};
use serde::de::DeserializeOwned;
use whist_core::{
    AuthInput, AwsRegion, ErrorCategory, HostSpinUpResult, ImportedData, MandelboxInfo,
    MandelboxPorts, RetryPolicy, Scoped, TriggerName,
};
use whist_flow::{AttemptTracker, TriggerBus};
use whist_launcher::protocol::mock::MockLauncher;
use whist_launcher::{ErrorWindow, LaunchRequest, Pipeline, Services};
use whist_services::mock::{MockAssigner, MockHostConfigurer, MockProber, MockRefresher, MockReply};
use whist_services::scaling::NO_INSTANCE_AVAILABLE;
use whist_services::{AssignResponse, HostResponse, HostResult, KeyValueStore, MemoryStore, StoreKey};
use whist_settings::WhistSettings;

const FUTURE: i64 = 4_000_000_000;

fn jwt(exp: i64) -> String {
    jsonwebtoken::encode(
        &Header::default(),
        &serde_json::json!({ "exp": exp }),
        &EncodingKey::from_secret(b"test"),
    )
    .unwrap()
}

fn settings() -> WhistSettings {
    let mut settings = WhistSettings::default();
    settings.regions.candidates = vec![AwsRegion::UsEast1, AwsRegion::EuWest1];
    settings.regions.allow_cross_border = true;
    settings.scaling.retry = RetryPolicy::fixed(10, 1000);
    settings
}

struct Harness {
    bus: TriggerBus,
    pipeline: Pipeline,
    assigner: Arc<MockAssigner>,
    configurer: Arc<MockHostConfigurer>,
    launcher: Arc<MockLauncher>,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new(
        assign: Vec<MockReply<AssignResponse>>,
        host: Vec<MockReply<HostResponse>>,
    ) -> Self {
        let bus = TriggerBus::new();
        let assigner = Arc::new(MockAssigner::new(assign));
        let configurer = Arc::new(MockHostConfigurer::new(host));
        let launcher = Arc::new(MockLauncher::new());
        let store = Arc::new(MemoryStore::new());
        let services = Services {
            refresher: Arc::new(MockRefresher::issuing("unused")),
            prober: Arc::new(
                MockProber::new()
                    .with_latency(AwsRegion::UsEast1, 10)
                    .with_latency(AwsRegion::EuWest1, 80),
            ),
            assigner: assigner.clone(),
            configurer: configurer.clone(),
            launcher: launcher.clone(),
            store: store.clone(),
        };
        let pipeline = Pipeline::wire(&bus, services, &settings(), AttemptTracker::default());
        Self {
            bus,
            pipeline,
            assigner,
            configurer,
            launcher,
            store,
        }
    }

    fn watch<T: DeserializeOwned + Send + 'static>(&self, name: TriggerName) -> BoxStream<'static, T> {
        self.bus.from_trigger_as(name)
    }

    fn launch(&self, access_token: String) {
        self.bus.signal(TriggerName::AppReady);
        self.bus
            .emit(
                TriggerName::LaunchRequested,
                &LaunchRequest {
                    auth: AuthInput {
                        user_email: "user@example.com".into(),
                        access_token,
                        refresh_token: None,
                        config_token: Some("ct".into()),
                    },
                    imported: ImportedData {
                        bookmarks: Some("b".into()),
                        ..ImportedData::default()
                    },
                },
            )
            .unwrap();
    }
}

#[tokio::test]
async fn scenario_a_happy_path_reaches_the_protocol() {
    let h = Harness::new(
        vec![MockAssigner::assigned("m1", "1.2.3.4")],
        vec![MockHostConfigurer::answering(MockHostConfigurer::complete(40_000, "aes"))],
    );
    let mut mandelbox = h.watch::<Scoped<MandelboxInfo>>(TriggerName::MandelboxCreateSuccess);
    let mut launched = h.watch::<Scoped<HostSpinUpResult>>(TriggerName::ProtocolLaunched);

    h.launch(jwt(FUTURE));

    let created = mandelbox.next().await.unwrap();
    assert_eq!(created.value.mandelbox_id, "m1");

    let launched = launched.next().await.unwrap();
    assert_eq!(launched.attempt, created.attempt);
    assert_eq!(
        launched.value,
        HostSpinUpResult {
            mandelbox_ip: "1.2.3.4".into(),
            mandelbox_secret: "aes".into(),
            mandelbox_ports: MandelboxPorts {
                port_32262: 40_000,
                port_32263: 40_001,
                port_32273: 40_002,
            },
        }
    );

    assert_eq!(h.assigner.call_count(), 1);
    assert_eq!(
        h.assigner.requests()[0].regions,
        vec![AwsRegion::UsEast1, AwsRegion::EuWest1]
    );
    let (ip, sent) = h.configurer.requests().remove(0);
    assert_eq!(ip, "1.2.3.4");
    assert_eq!(sent.mandelbox_id, "m1");
    assert_eq!(sent.config_encryption_token, "ct");
    assert_eq!(sent.imported.bookmarks.as_deref(), Some("b"));
    assert_eq!(h.launcher.spawn_count(), 1);

    let saved: Option<Vec<AwsRegion>> = (h.store.clone() as Arc<dyn KeyValueStore>)
        .get_json(StoreKey::RegionOrdering)
        .unwrap();
    assert_eq!(saved, Some(vec![AwsRegion::UsEast1, AwsRegion::EuWest1]));
    assert!(h.bus.latest(TriggerName::ErrorWindow).is_none());

    h.pipeline.shutdown().await;
    assert!(!h.launcher.is_running());
}

#[tokio::test(start_paused = true)]
async fn scenario_b_no_capacity_after_bounded_retries() {
    let h = Harness::new(
        vec![MockAssigner::refused(503, Some(NO_INSTANCE_AVAILABLE))],
        vec![MockHostConfigurer::answering(MockHostConfigurer::complete(40_000, "aes"))],
    );
    let mut failures = h.watch::<serde_json::Value>(TriggerName::MandelboxCreateFailure);
    let mut windows = h.watch::<ErrorWindow>(TriggerName::ErrorWindow);

    h.launch(jwt(FUTURE));

    let failure = failures.next().await.unwrap();
    assert_eq!(failure["attempts"], 10);
    assert_eq!(failure["error"]["refused"]["status"], 503);

    let window = windows.next().await.unwrap();
    assert_eq!(window.category, ErrorCategory::NoCapacity);
    assert_eq!(window.stage, "mandelbox");

    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    assert_eq!(h.assigner.call_count(), 10);
    assert_eq!(h.configurer.call_count(), 0);
    assert!(h.launcher.launches().is_empty());
}

#[tokio::test]
async fn scenario_c_host_without_aes_key_fails() {
    let h = Harness::new(
        vec![MockAssigner::assigned("m1", "1.2.3.4")],
        vec![MockHostConfigurer::answering(HostResult {
            aes_key: None,
            ..MockHostConfigurer::complete(40_000, "unused")
        })],
    );
    let mut host_failures = h.watch::<serde_json::Value>(TriggerName::HostSpinUpFailure);
    let mut windows = h.watch::<ErrorWindow>(TriggerName::ErrorWindow);

    h.launch(jwt(FUTURE));

    let failure = host_failures.next().await.unwrap();
    assert_eq!(failure["mandelbox_id"], "m1");
    assert_eq!(failure["error"]["incomplete"]["status"], 200);

    let window = windows.next().await.unwrap();
    assert_eq!(window.category, ErrorCategory::Internal);
    assert_eq!(window.stage, "host");
    assert!(h.launcher.launches().is_empty());
}

#[tokio::test]
async fn crash_of_a_retargeted_client_reaches_the_error_window() {
    let h = Harness::new(
        vec![MockAssigner::assigned("m1", "1.2.3.4")],
        vec![MockHostConfigurer::answering(MockHostConfigurer::complete(40_000, "aes"))],
    );
    let mut launched = h.watch::<Scoped<HostSpinUpResult>>(TriggerName::ProtocolLaunched);
    let mut windows = h.watch::<ErrorWindow>(TriggerName::ErrorWindow);

    h.launch(jwt(FUTURE));
    let first = launched.next().await.unwrap();
    h.launch(jwt(FUTURE));
    let second = launched.next().await.unwrap();
    assert_ne!(first.attempt, second.attempt);
    assert_eq!(h.launcher.spawn_count(), 1);

    h.launcher.exit(139);
    let window = tokio::time::timeout(std::time::Duration::from_secs(5), windows.next())
        .await
        .expect("no error window for the crashed client")
        .unwrap();
    assert_eq!(window.category, ErrorCategory::ProtocolCrash);
    assert_eq!(window.stage, "protocol");
    assert_eq!(window.attempt, Some(second.attempt));
}

#[tokio::test]
async fn unreadable_token_stops_before_the_scaling_service() {
    let h = Harness::new(
        vec![MockAssigner::assigned("m1", "1.2.3.4")],
        vec![MockHostConfigurer::answering(MockHostConfigurer::complete(40_000, "aes"))],
    );
    let mut windows = h.watch::<ErrorWindow>(TriggerName::ErrorWindow);

    h.launch("not-a-jwt".into());

    let window = windows.next().await.unwrap();
    assert_eq!(window.category, ErrorCategory::Unauthorized);
    assert_eq!(window.stage, "auth");
    assert_eq!(h.assigner.call_count(), 0);
}
