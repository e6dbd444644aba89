//! Cloud region candidates, eligibility filtering and latency ranking.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A region the scaling service can place a mandelbox in.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AwsRegion {
    #[serde(rename = "us-east-1")]
    UsEast1,
    #[serde(rename = "us-east-2")]
    UsEast2,
    #[serde(rename = "us-west-1")]
    UsWest1,
    #[serde(rename = "us-west-2")]
    UsWest2,
    #[serde(rename = "ca-central-1")]
    CaCentral1,
    #[serde(rename = "eu-central-1")]
    EuCentral1,
    #[serde(rename = "eu-west-1")]
    EuWest1,
    #[serde(rename = "ap-south-1")]
    ApSouth1,
}

impl AwsRegion {
    /// Every known region, in the default candidate order.
    pub const ALL: [Self; 8] = [
        Self::UsEast1,
        Self::UsEast2,
        Self::UsWest1,
        Self::UsWest2,
        Self::CaCentral1,
        Self::EuCentral1,
        Self::EuWest1,
        Self::ApSouth1,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UsEast1 => "us-east-1",
            Self::UsEast2 => "us-east-2",
            Self::UsWest1 => "us-west-1",
            Self::UsWest2 => "us-west-2",
            Self::CaCentral1 => "ca-central-1",
            Self::EuCentral1 => "eu-central-1",
            Self::EuWest1 => "eu-west-1",
            Self::ApSouth1 => "ap-south-1",
        }
    }

    /// ISO 3166 alpha-2 code of the country hosting the region.
    pub const fn country(self) -> &'static str {
        match self {
            Self::UsEast1 | Self::UsEast2 | Self::UsWest1 | Self::UsWest2 => "US",
            Self::CaCentral1 => "CA",
            Self::EuCentral1 => "DE",
            Self::EuWest1 => "IE",
            Self::ApSouth1 => "IN",
        }
    }
}

impl fmt::Display for AwsRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised region name.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown region: {0}")]
pub struct UnknownRegion(pub String);

impl FromStr for AwsRegion {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRegion(s.to_string()))
    }
}

/// One region's measured latency. `ping_ms` is `None` when every probe failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionLatency {
    pub region: AwsRegion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<u64>,
}

/// Apply the geographic eligibility policy to `candidates`.
///
/// Regions outside `home_country` are dropped unless `allow_cross_border`.
/// When nothing survives, the full candidate list is returned so a launch is
/// never left with zero regions.
pub fn eligible_regions(
    candidates: &[AwsRegion],
    home_country: &str,
    allow_cross_border: bool,
) -> Vec<AwsRegion> {
    if allow_cross_border {
        return candidates.to_vec();
    }
    let local: Vec<AwsRegion> = candidates
        .iter()
        .copied()
        .filter(|r| r.country().eq_ignore_ascii_case(home_country))
        .collect();
    if local.is_empty() {
        candidates.to_vec()
    } else {
        local
    }
}

/// Order measured regions by ascending latency.
///
/// Unmeasured regions are excluded. The sort is stable, so ties keep the
/// order of `samples`.
pub fn rank_by_latency(samples: &[RegionLatency]) -> Vec<RegionLatency> {
    let mut measured: Vec<RegionLatency> =
        samples.iter().copied().filter(|s| s.ping_ms.is_some()).collect();
    measured.sort_by_key(|s| s.ping_ms);
    measured
}
