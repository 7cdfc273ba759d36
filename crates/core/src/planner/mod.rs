//! Demand-driven planning of extractor passes.
//!
//! The filter is resolved once into the pool keys its categories read; the
//! producers of those keys plus their upstream closure form the active
//! computations. Every output port of an active computation is routed
//! explicitly, either into the pool, into active consumers, or discarded.

mod graph;

pub use graph::{reads, Computation, Pass, Port};

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::extractor::FeatureExtractor;
use crate::{AnalysisConfig, EventFilter, FeaturePool, Result, TracksError};

/// Destination of one output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// Store the series in the pool under this key.
    Pool(&'static str),
    /// Stream into a downstream computation of the same pass.
    Feed(Computation),
    /// Nothing consumes the port; the extractor must drain it.
    Discard,
}

/// Wiring of one output port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub from: Computation,
    pub port: &'static str,
    pub sinks: Vec<Sink>,
}

impl Route {
    pub fn is_discarded(&self) -> bool {
        self.sinks == [Sink::Discard]
    }
}

/// Everything one extractor pass has to compute and where results go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    pub pass: Pass,
    /// Active computations in topological order.
    pub nodes: Vec<Computation>,
    pub routes: Vec<Route>,
}

impl PassPlan {
    pub fn runs(&self, computation: Computation) -> bool {
        self.nodes.contains(&computation)
    }

    pub fn route(&self, computation: Computation, port: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| route.from == computation && route.port == port)
    }

    /// Whether the output `port` of `computation` must be stored.
    pub fn stores(&self, computation: Computation, port: &str) -> bool {
        self.route(computation, port)
            .map(|route| route.sinks.iter().any(|sink| matches!(sink, Sink::Pool(_))))
            .unwrap_or(false)
    }

    /// Keys this pass is expected to write.
    pub fn pool_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.routes.iter().flat_map(|route| {
            route.sinks.iter().filter_map(|sink| match sink {
                Sink::Pool(key) => Some(*key),
                _ => None,
            })
        })
    }
}

/// Ordered set of passes for one analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    passes: Vec<PassPlan>,
}

impl Plan {
    pub fn for_filter(filter: &EventFilter) -> Self {
        let needed: BTreeSet<&'static str> = filter
            .iter()
            .flat_map(|category| reads(category).iter().copied())
            .collect();

        let mut active = BTreeSet::new();
        for key in &needed {
            if let Some((producer, _)) = Computation::producer_of(key) {
                activate(producer, &mut active);
            }
        }

        let unsupported: Vec<_> = filter
            .iter()
            .filter(|category| reads(*category).is_empty())
            .map(|category| category.name())
            .collect();
        if !unsupported.is_empty() {
            debug!(?unsupported, "categories without extractor support");
        }

        let mut passes: Vec<PassPlan> = Vec::new();
        for computation in Computation::ALL.iter().copied().filter(|c| active.contains(c)) {
            let pass = computation.pass();
            let index = match passes.iter().position(|plan| plan.pass == pass) {
                Some(index) => index,
                None => {
                    passes.push(PassPlan {
                        pass,
                        nodes: Vec::new(),
                        routes: Vec::new(),
                    });
                    passes.len() - 1
                }
            };
            passes[index].nodes.push(computation);
            passes[index]
                .routes
                .extend(route_outputs(computation, &active, &needed));
        }

        if !passes.iter().any(|plan| plan.pass.yields_duration()) {
            passes.push(PassPlan {
                pass: Pass::Decode,
                nodes: Vec::new(),
                routes: Vec::new(),
            });
        }
        passes.sort_by_key(|plan| plan.pass);

        Self { passes }
    }

    pub fn passes(&self) -> &[PassPlan] {
        &self.passes
    }

    pub fn pass(&self, pass: Pass) -> Option<&PassPlan> {
        self.passes.iter().find(|plan| plan.pass == pass)
    }

    pub fn runs(&self, computation: Computation) -> bool {
        self.passes.iter().any(|plan| plan.runs(computation))
    }
}

fn activate(computation: Computation, active: &mut BTreeSet<Computation>) {
    if active.insert(computation) {
        for input in computation.inputs() {
            activate(*input, active);
        }
    }
}

fn route_outputs(
    computation: Computation,
    active: &BTreeSet<Computation>,
    needed: &BTreeSet<&'static str>,
) -> Vec<Route> {
    computation
        .outputs()
        .iter()
        .map(|port| {
            let mut sinks = Vec::new();
            if let Some(key) = port.key.filter(|key| needed.contains(key)) {
                sinks.push(Sink::Pool(key));
            }
            if port.stream {
                sinks.extend(
                    active
                        .iter()
                        .filter(|consumer| consumer.inputs().contains(&computation))
                        .map(|consumer| Sink::Feed(*consumer)),
                );
            }
            if sinks.is_empty() {
                sinks.push(Sink::Discard);
            }
            Route {
                from: computation,
                port: port.name,
                sinks,
            }
        })
        .collect()
}

/// Plans the passes `filter` needs, runs them through `extractor` and
/// collects the results. Returns the populated pool and the track duration
/// in seconds.
pub fn plan_and_run(
    filter: &EventFilter,
    source: &Path,
    analysis: &AnalysisConfig,
    extractor: &mut dyn FeatureExtractor,
) -> Result<(FeaturePool, f64)> {
    let plan = Plan::for_filter(filter);
    let mut pool = FeaturePool::new();
    let mut duration = None;

    for pass_plan in plan.passes() {
        info!(pass = pass_plan.pass.name(), nodes = pass_plan.nodes.len(), "analyzing");
        debug!(routes = ?pass_plan.routes, "pass wiring");

        let output = extractor.run_pass(source, pass_plan)?;
        let expected: BTreeSet<_> = pass_plan.pool_keys().collect();

        for (key, series) in output.series {
            if !expected.contains(key.as_str()) {
                warn!(key = %key, pass = pass_plan.pass.name(), "unrequested series dropped");
                continue;
            }
            debug!(key = %key, kind = series.kind(), len = series.len(), "stored feature");
            pool.put(key, series)?;
        }

        if pass_plan.pass.yields_duration() && duration.is_none() {
            let samples = output.samples_decoded.ok_or_else(|| TracksError::Extractor {
                pass: pass_plan.pass.name(),
                reason: "pass did not report the decoded sample count".to_string(),
            })?;
            duration = Some(samples as f64 / analysis.sample_rate as f64);
        }
    }

    let duration = duration.ok_or_else(|| TracksError::msg("no pass reported a duration"))?;
    info!(duration, features = pool.len(), "analysis complete");
    Ok((pool, duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventCategory;

    fn plan_for(categories: &[EventCategory]) -> Plan {
        Plan::for_filter(&EventFilter::from_categories(categories.iter().copied()))
    }

    #[test]
    fn beat_only_runs_the_rhythm_pass() {
        let plan = plan_for(&[EventCategory::Beat]);
        let passes: Vec<_> = plan.passes().iter().map(|p| p.pass).collect();
        assert_eq!(passes, vec![Pass::Rhythm]);
    }

    #[test]
    fn decode_pass_supplies_duration_when_rhythm_is_unused() {
        let plan = plan_for(&[EventCategory::Onset]);
        let passes: Vec<_> = plan.passes().iter().map(|p| p.pass).collect();
        assert_eq!(passes, vec![Pass::Decode, Pass::Onset]);
        assert!(plan.pass(Pass::Decode).unwrap().nodes.is_empty());
    }

    #[test]
    fn unused_auxiliary_outputs_are_discarded() {
        let plan = plan_for(&[EventCategory::Onset]);
        let onset = plan.pass(Pass::Onset).unwrap();
        assert!(onset
            .route(Computation::OnsetRate, "onsetRate")
            .unwrap()
            .is_discarded());
        assert!(onset.stores(Computation::OnsetRate, "onsetTimes"));

        let plan = plan_for(&[EventCategory::Onset, EventCategory::OnsetRate]);
        let onset = plan.pass(Pass::Onset).unwrap();
        assert!(onset.stores(Computation::OnsetRate, "onsetRate"));
    }

    #[test]
    fn spectrum_fans_out_only_to_requested_consumers() {
        let plan = plan_for(&[EventCategory::Mfcc, EventCategory::BandsMel]);
        let spectral = plan.pass(Pass::Spectral).unwrap();

        assert_eq!(
            spectral.nodes,
            vec![Computation::Spectrum, Computation::Mfcc, Computation::MelBands]
        );
        let spectrum = spectral.route(Computation::Spectrum, "spectrum").unwrap();
        assert_eq!(
            spectrum.sinks,
            vec![Sink::Feed(Computation::Mfcc), Sink::Feed(Computation::MelBands)]
        );
        assert!(spectral.route(Computation::Mfcc, "bands").unwrap().is_discarded());
        assert!(!plan.runs(Computation::SpectralPeaks));
    }

    #[test]
    fn timbre_and_segmentation_share_one_mfcc() {
        let plan = plan_for(&[EventCategory::TimbreChange, EventCategory::SegmentBoundary]);
        let spectral = plan.pass(Pass::Spectral).unwrap();
        let keys: Vec<_> = spectral.pool_keys().collect();
        assert_eq!(keys, vec!["spectral.mfcc"]);
    }

    #[test]
    fn key_detection_pulls_in_the_whole_tonal_chain() {
        let plan = plan_for(&[EventCategory::KeyChange]);
        let spectral = plan.pass(Pass::Spectral).unwrap();

        assert_eq!(
            spectral.nodes,
            vec![
                Computation::Spectrum,
                Computation::SpectralPeaks,
                Computation::Hpcp,
                Computation::Key
            ]
        );
        let hpcp = spectral.route(Computation::Hpcp, "hpcp").unwrap();
        assert_eq!(hpcp.sinks, vec![Sink::Feed(Computation::Key)]);

        let plan = plan_for(&[EventCategory::KeyChange, EventCategory::Chroma]);
        let hpcp = plan
            .pass(Pass::Spectral)
            .unwrap()
            .route(Computation::Hpcp, "hpcp")
            .unwrap()
            .clone();
        assert_eq!(
            hpcp.sinks,
            vec![Sink::Pool("tonal.hpcp"), Sink::Feed(Computation::Key)]
        );
    }

    #[test]
    fn dissonance_uses_filtered_peaks_without_tonal_chain() {
        let plan = plan_for(&[EventCategory::Dissonance]);
        assert!(plan.runs(Computation::FilteredPeaks));
        assert!(!plan.runs(Computation::SpectralPeaks));
        assert!(!plan.runs(Computation::Inharmonicity));
    }

    #[test]
    fn every_requested_category_is_scheduled() {
        let filter = EventFilter::all();
        let plan = Plan::for_filter(&filter);
        let stored: BTreeSet<_> = plan.passes().iter().flat_map(|p| p.pool_keys()).collect();

        for category in filter.iter() {
            for key in reads(category) {
                assert!(stored.contains(key), "{category} needs {key}");
            }
        }
    }

    #[test]
    fn unsupported_categories_schedule_nothing() {
        let plan = plan_for(&[EventCategory::Click, EventCategory::FadeIn]);
        let passes: Vec<_> = plan.passes().iter().map(|p| p.pass).collect();
        assert_eq!(passes, vec![Pass::Decode]);
    }
}
