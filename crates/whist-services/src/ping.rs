//! Region latency probes.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;
use whist_core::AwsRegion;
use whist_settings::RegionSettings;

use crate::errors::ServiceError;

/// Measures one round trip to a region.
#[async_trait]
pub trait RegionProber: Send + Sync {
    async fn probe(&self, region: AwsRegion) -> Result<Duration, ServiceError>;
}

/// Times a GET against each region's public ping endpoint.
#[derive(Clone, Debug)]
pub struct HttpProber {
    http: reqwest::Client,
    settings: RegionSettings,
}

impl HttpProber {
    pub fn new(settings: &RegionSettings) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.probe_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            settings: settings.clone(),
        })
    }
}

#[async_trait]
impl RegionProber for HttpProber {
    async fn probe(&self, region: AwsRegion) -> Result<Duration, ServiceError> {
        let started = Instant::now();
        let response = self.http.get(self.settings.probe_url(region)).send().await.map_err(|err| {
            if err.is_timeout() {
                ServiceError::ProbeTimeout(self.settings.probe_timeout_ms)
            } else {
                ServiceError::Http(err)
            }
        })?;
        let elapsed = started.elapsed();
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::ProbeStatus(status.as_u16()));
        }
        trace!(%region, elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX), "probe");
        Ok(elapsed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn prober_for(server: &MockServer, timeout_ms: u64) -> HttpProber {
        HttpProber::new(&RegionSettings {
            probe_url_template: format!("{}/ping/{{region}}", server.uri()),
            probe_timeout_ms: timeout_ms,
            ..RegionSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn probe_hits_region_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping/eu-west-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let elapsed = prober_for(&server, 2000).probe(AwsRegion::EuWest1).await.unwrap();
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn error_status_fails_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = prober_for(&server, 2000).probe(AwsRegion::UsEast1).await.unwrap_err();
        assert_matches!(err, ServiceError::ProbeStatus(503));
    }

    #[tokio::test]
    async fn slow_region_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let err = prober_for(&server, 50).probe(AwsRegion::UsEast1).await.unwrap_err();
        assert_matches!(err, ServiceError::ProbeTimeout(50));
    }
}
