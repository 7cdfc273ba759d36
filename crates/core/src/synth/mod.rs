//! Turns the feature pool of one run into a timeline.
//!
//! Every selected category is derived by exactly one rule in [`rules`].
//! Missing pool keys mean the feature was not produced this run; the
//! category is skipped and the rest of the timeline is still built.

mod rules;

pub use rules::Throttle;

use tracing::{debug, info};

use crate::extractor::Segmenter;
use crate::{Config, Event, FeaturePool, Payload, Timeline};

/// Facts about the analysed source carried by track.start.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub filename: String,
    /// Seconds of decoded audio.
    pub duration: f64,
}

impl TrackInfo {
    pub fn new(filename: impl Into<String>, duration: f64) -> Self {
        Self {
            filename: filename.into(),
            duration,
        }
    }
}

/// Derives the events of every category enabled in `config` and frames
/// them with track.start, track.position heartbeats and track.end.
///
/// Pure: the same pool and settings always give the same timeline.
pub fn synthesize(
    pool: &FeaturePool,
    config: &Config,
    track: &TrackInfo,
    segmenter: &dyn Segmenter,
) -> Timeline {
    let duration = track.duration.max(0.0);
    let rules = rules::Rules {
        pool,
        analysis: &config.analysis,
        thresholds: &config.events.thresholds,
        interval: config.events.continuous_interval,
        duration,
        segmenter,
    };

    let mut timeline = Timeline::new();
    timeline.push(Event::new(
        0.0,
        Payload::TrackStart {
            filename: track.filename.clone(),
            duration,
            sample_rate: config.analysis.sample_rate,
            channels: 1,
        },
    ));

    for category in config.events.enabled.iter() {
        let events = rules.derive(category);
        if !events.is_empty() {
            debug!(category = category.name(), count = events.len(), "derived events");
        }
        for mut event in events {
            if !event.timestamp.is_finite() {
                debug!(category = category.name(), "dropping event with non-finite timestamp");
                continue;
            }
            // `<=` also folds -0.0, which would otherwise sort before track.start.
            event.timestamp = if event.timestamp <= 0.0 {
                0.0
            } else {
                event.timestamp.min(duration)
            };
            timeline.push(event);
        }
    }

    let interval = config.transport.position_interval;
    if interval > 0.0 {
        let mut step = 1;
        loop {
            let position = step as f64 * interval;
            if position >= duration {
                break;
            }
            timeline.push(Event::new(position, Payload::TrackPosition { position }));
            step += 1;
        }
    }

    timeline.push(Event::new(duration, Payload::TrackEnd));
    timeline.sort();

    info!(events = timeline.len(), duration, "timeline built");
    timeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::NoveltySegmenter;
    use crate::{EventCategory, EventFilter, Series};

    fn config(categories: &[EventCategory]) -> Config {
        let mut config = Config::default();
        config.analysis.sample_rate = 100;
        config.analysis.hop_size = 10;
        config.events.enabled = EventFilter::from_categories(categories.iter().copied());
        config
    }

    fn pool(entries: Vec<(&str, Series)>) -> FeaturePool {
        let mut pool = FeaturePool::new();
        for (key, series) in entries {
            pool.put(key, series).unwrap();
        }
        pool
    }

    #[test]
    fn timeline_is_framed_by_start_and_end() {
        let config = config(&[EventCategory::Beat, EventCategory::Loudness]);
        let pool = pool(vec![
            ("rhythm.ticks", Series::Scalar(vec![0.0, 0.5, 2.9])),
            ("rhythm.confidence", Series::Scalar(vec![0.9, 0.8, 0.7])),
            ("loudness.values", Series::Scalar(vec![0.2; 40])),
        ]);
        let timeline = synthesize(
            &pool,
            &config,
            &TrackInfo::new("song.wav", 3.0),
            &NoveltySegmenter::default(),
        );

        let events = timeline.events();
        assert_eq!(events[0].category(), EventCategory::TrackStart);
        assert_eq!(events[0].timestamp, 0.0);
        let last = events.last().unwrap();
        assert_eq!(last.category(), EventCategory::TrackEnd);
        assert_eq!(last.timestamp, 3.0);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn heartbeats_cover_the_open_interval() {
        let config = config(&[EventCategory::Beat]);
        let timeline = synthesize(
            &FeaturePool::new(),
            &config,
            &TrackInfo::new("song.wav", 3.0),
            &NoveltySegmenter::default(),
        );

        let positions: Vec<_> = timeline
            .of(EventCategory::TrackPosition)
            .map(|event| event.timestamp)
            .collect();
        assert_eq!(positions, vec![1.0, 2.0]);
    }

    #[test]
    fn missing_features_only_skip_their_category() {
        let config = config(&[EventCategory::Beat, EventCategory::Onset]);
        let pool = pool(vec![("rhythm.onsetTimes", Series::Scalar(vec![0.25, 1.5]))]);
        let timeline = synthesize(
            &pool,
            &config,
            &TrackInfo::new("song.wav", 2.0),
            &NoveltySegmenter::default(),
        );

        assert_eq!(timeline.count(EventCategory::Beat), 0);
        assert_eq!(timeline.count(EventCategory::Onset), 2);
    }

    #[test]
    fn events_past_the_end_are_clamped() {
        let config = config(&[EventCategory::Onset]);
        let pool = pool(vec![("rhythm.onsetTimes", Series::Scalar(vec![2.5]))]);
        let timeline = synthesize(
            &pool,
            &config,
            &TrackInfo::new("song.wav", 2.0),
            &NoveltySegmenter::default(),
        );

        let events = timeline.events();
        assert_eq!(events[events.len() - 2].category(), EventCategory::Onset);
        assert_eq!(events[events.len() - 2].timestamp, 2.0);
        assert_eq!(events.last().unwrap().category(), EventCategory::TrackEnd);
    }

    #[test]
    fn negative_zero_onsets_follow_track_start() {
        let config = config(&[EventCategory::Onset]);
        let pool = pool(vec![("rhythm.onsetTimes", Series::Scalar(vec![-0.0, 1.0]))]);
        let timeline = synthesize(
            &pool,
            &config,
            &TrackInfo::new("song.wav", 2.0),
            &NoveltySegmenter::default(),
        );

        let events = timeline.events();
        assert_eq!(events[0].category(), EventCategory::TrackStart);
        assert_eq!(events[1].category(), EventCategory::Onset);
        assert!(events[1].timestamp.is_sign_positive());
    }

    #[test]
    fn non_finite_timestamps_are_dropped() {
        let config = config(&[EventCategory::Onset]);
        let pool = pool(vec![(
            "rhythm.onsetTimes",
            Series::Scalar(vec![0.5, f32::NAN, f32::INFINITY]),
        )]);
        let timeline = synthesize(
            &pool,
            &config,
            &TrackInfo::new("song.wav", 2.0),
            &NoveltySegmenter::default(),
        );

        assert_eq!(timeline.count(EventCategory::Onset), 1);
        assert_eq!(timeline.events().last().unwrap().category(), EventCategory::TrackEnd);
        assert!(timeline.iter().all(|event| event.timestamp.is_finite()));
    }

    #[test]
    fn start_carries_track_facts() {
        let config = config(&[EventCategory::Beat]);
        let timeline = synthesize(
            &FeaturePool::new(),
            &config,
            &TrackInfo::new("/music/song.wav", 1.5),
            &NoveltySegmenter::default(),
        );

        assert_eq!(
            timeline.events()[0].payload,
            Payload::TrackStart {
                filename: "/music/song.wav".to_string(),
                duration: 1.5,
                sample_rate: 100,
                channels: 1,
            }
        );
    }
}
