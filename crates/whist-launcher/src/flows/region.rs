//! Region stage: order candidate regions by measured latency.
//!
//! For each trigger the stored ordering (if any) is emitted at once as
//! `cached`. The eligible regions are then probed in parallel, taking the
//! minimum of several samples per region. A ranking where every region
//! answered is `refresh` and replaces the stored ordering; otherwise the
//! partial ranking goes out as `offline`. No retry happens here.
//!
//! `ordering` carries the first usable ordering per attempt, which is what the
//! mandelbox stage consumes.

use std::sync::Arc;

use futures::future::join_all;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info, warn};
use whist_core::{AttemptId, AwsRegion, RegionLatency, Scoped, eligible_regions, rank_by_latency};
use whist_flow::{Channel, Flow, FlowError, FlowOutputs, flow};
use whist_services::{KeyValueStore, RegionProber, StoreKey};
use whist_settings::RegionSettings;

/// A ranking and whether every region was measured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ranking {
    /// Every region answered; ascending latency.
    Complete(Vec<RegionLatency>),
    /// Measured regions in ascending latency, then unmeasured ones in candidate order.
    Partial(Vec<RegionLatency>),
}

#[derive(Clone, Debug)]
enum RegionEvent {
    Cached(Scoped<Vec<AwsRegion>>),
    Refresh(Scoped<Vec<RegionLatency>>),
    Offline(Scoped<Vec<RegionLatency>>),
}

impl RegionEvent {
    fn attempt(&self) -> &AttemptId {
        match self {
            Self::Cached(s) => &s.attempt,
            Self::Refresh(s) | Self::Offline(s) => &s.attempt,
        }
    }

    fn ordering(&self) -> Vec<AwsRegion> {
        match self {
            Self::Cached(s) => s.value.clone(),
            Self::Refresh(s) | Self::Offline(s) => s.value.iter().map(|l| l.region).collect(),
        }
    }
}

/// Passes the first non-empty ordering of each attempt. Events of one
/// attempt arrive together, so only the last attempt served is kept.
#[derive(Debug, Default)]
struct FirstOrdering {
    served: Option<AttemptId>,
}

impl FirstOrdering {
    fn admit(&mut self, event: &RegionEvent) -> Option<Scoped<Vec<AwsRegion>>> {
        let attempt = event.attempt();
        if self.served.as_ref() == Some(attempt) {
            return None;
        }
        let regions = event.ordering();
        if regions.is_empty() {
            return None;
        }
        self.served = Some(attempt.clone());
        Some(Scoped::new(attempt.clone(), regions))
    }
}

pub struct RegionOutputs {
    pub cached: Channel<Scoped<Vec<AwsRegion>>>,
    pub refresh: Channel<Scoped<Vec<RegionLatency>>>,
    pub offline: Channel<Scoped<Vec<RegionLatency>>>,
    /// First non-empty ordering per attempt.
    pub ordering: Channel<Scoped<Vec<AwsRegion>>>,
    pub failure: Channel<FlowError>,
}

impl FlowOutputs for RegionOutputs {
    fn faulted(flow: &Flow, error: FlowError) -> Self {
        let name = flow.name();
        Self {
            cached: Channel::closed(format!("{name}.cached")),
            refresh: Channel::closed(format!("{name}.refresh")),
            offline: Channel::closed(format!("{name}.offline")),
            ordering: Channel::closed(format!("{name}.ordering")),
            failure: Channel::once(format!("{name}.failure"), error),
        }
    }
}

/// Probe `region` `samples` times; the fastest successful sample wins.
pub async fn measure(prober: &dyn RegionProber, region: AwsRegion, samples: u32) -> RegionLatency {
    let mut best: Option<u64> = None;
    for _ in 0..samples.max(1) {
        match prober.probe(region).await {
            Ok(elapsed) => {
                let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                best = Some(best.map_or(ms, |b| b.min(ms)));
            }
            Err(err) => debug!(%region, error = %err, "probe failed"),
        }
    }
    RegionLatency {
        region,
        ping_ms: best,
    }
}

/// Measure every region concurrently, preserving input order.
pub async fn ping_regions(
    prober: &dyn RegionProber,
    regions: &[AwsRegion],
    samples: u32,
) -> Vec<RegionLatency> {
    join_all(regions.iter().map(|&region| measure(prober, region, samples))).await
}

/// Rank measurements, flagging whether any region went unmeasured.
pub fn rank(samples: &[RegionLatency]) -> Ranking {
    let ranked = rank_by_latency(samples);
    if ranked.len() == samples.len() {
        return Ranking::Complete(ranked);
    }
    let mut partial = ranked;
    partial.extend(samples.iter().copied().filter(|s| s.ping_ms.is_none()));
    Ranking::Partial(partial)
}

fn load_cached(store: &dyn KeyValueStore) -> Option<Vec<AwsRegion>> {
    match store.get_json::<Vec<AwsRegion>>(StoreKey::RegionOrdering) {
        Ok(Some(regions)) if !regions.is_empty() => Some(regions),
        Ok(_) => None,
        Err(err) => {
            warn!(error = %err, "could not read cached region ordering");
            None
        }
    }
}

fn save_ordering(store: &dyn KeyValueStore, regions: &[AwsRegion]) {
    if let Err(err) = store.set_json(StoreKey::RegionOrdering, regions) {
        warn!(error = %err, "could not persist region ordering");
    }
}

/// The region flow. Triggers are handled one at a time.
pub fn region_flow(
    input: BoxStream<'static, AttemptId>,
    prober: Arc<dyn RegionProber>,
    store: Arc<dyn KeyValueStore>,
    settings: RegionSettings,
) -> RegionOutputs {
    flow("region", input, move |ctx, input| {
        let candidates = eligible_regions(
            &settings.candidates,
            &settings.home_country,
            settings.allow_cross_border,
        );
        if candidates.is_empty() {
            return Err(FlowError::build(ctx.name(), "no candidate regions configured"));
        }
        let samples = settings.samples;

        let events = input.flat_map(move |attempt| {
            let prober = Arc::clone(&prober);
            let store = Arc::clone(&store);
            let candidates = candidates.clone();
            async_stream::stream! {
                if let Some(cached) = load_cached(store.as_ref()) {
                    yield RegionEvent::Cached(Scoped::new(attempt.clone(), cached));
                }
                let measured = ping_regions(prober.as_ref(), &candidates, samples).await;
                match rank(&measured) {
                    Ranking::Complete(ranked) => {
                        info!(%attempt, fastest = ?ranked.first().map(|l| l.region), "regions ranked");
                        let regions: Vec<AwsRegion> = ranked.iter().map(|l| l.region).collect();
                        save_ordering(store.as_ref(), &regions);
                        yield RegionEvent::Refresh(Scoped::new(attempt, ranked));
                    }
                    Ranking::Partial(partial) => {
                        let unreachable = partial.iter().filter(|l| l.ping_ms.is_none()).count();
                        warn!(%attempt, unreachable, "some regions did not answer, network may be offline");
                        yield RegionEvent::Offline(Scoped::new(attempt, partial));
                    }
                }
            }
        });
        let events = Channel::from_stream("region.events", events);

        let cached = ctx.channel(
            "cached",
            events.subscribe().filter_map(|e| {
                std::future::ready(match e {
                    RegionEvent::Cached(s) => Some(s),
                    _ => None,
                })
            }),
        );
        let refresh = ctx.channel(
            "refresh",
            events.subscribe().filter_map(|e| {
                std::future::ready(match e {
                    RegionEvent::Refresh(s) => Some(s),
                    _ => None,
                })
            }),
        );
        let offline = ctx.channel(
            "offline",
            events.subscribe().filter_map(|e| {
                std::future::ready(match e {
                    RegionEvent::Offline(s) => Some(s),
                    _ => None,
                })
            }),
        );

        let mut first = FirstOrdering::default();
        let ordering = ctx.channel(
            "ordering",
            events
                .subscribe()
                .filter_map(move |e| std::future::ready(first.admit(&e))),
        );

        Ok(RegionOutputs {
            cached,
            refresh,
            offline,
            ordering,
            failure: Channel::closed(format!("{}.failure", ctx.name())),
        })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
