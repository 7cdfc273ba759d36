//! Core library for the tracks event broadcaster.
//!
//! An audio file is analysed once into named feature series, the series are
//! turned into a timestamped timeline of semantic events, and the timeline is
//! played back in real time as datagrams. Each module owns one stage:
//! [`planner`] decides which extractor passes run, [`pool`] holds what they
//! produce, [`synth`] derives events, [`emitter`] paces them onto a
//! [`transport`]. [`receiver`] is the listening counterpart.

pub mod config;
pub mod emitter;
pub mod error;
pub mod events;
pub mod extractor;
pub mod planner;
pub mod pool;
pub mod receiver;
pub mod synth;
pub mod timeline;
pub mod transport;

use std::path::Path;

pub use config::{AnalysisConfig, Config, EventsConfig, NetworkConfig, Thresholds, TransportConfig};
pub use emitter::{CancellationToken, EmitOutcome, Emitter, EmitterState};
pub use error::{Result, TracksError};
pub use events::{
    list_categories, Event, EventCategory, EventFilter, Family, Payload, ABORT_USER_INTERRUPT,
};
pub use extractor::{FeatureExtractor, NativeExtractor, NoveltySegmenter, PassOutput, Segmenter};
pub use planner::{plan_and_run, Plan, PassPlan, Route, Sink};
pub use pool::{FeaturePool, Series};
pub use receiver::{ReceiveOutcome, ReceiveSummary, Receiver};
pub use synth::{synthesize, TrackInfo};
pub use timeline::Timeline;
pub use transport::{MemoryTransport, Transport, UdpTransport};

/// Runs the extractor passes `config` asks for on `source` and synthesizes
/// the resulting timeline. `filename` is what track.start reports.
pub fn analyze(
    config: &Config,
    source: &Path,
    filename: &str,
    extractor: &mut dyn FeatureExtractor,
    segmenter: &dyn Segmenter,
) -> Result<Timeline> {
    tracing::info!(
        source = %source.display(),
        extractor = extractor.name(),
        events = %config.events.enabled,
        "analysis started"
    );
    let (pool, duration) = plan_and_run(&config.events.enabled, source, &config.analysis, extractor)?;
    Ok(synthesize(
        &pool,
        config,
        &TrackInfo::new(filename, duration),
        segmenter,
    ))
}
