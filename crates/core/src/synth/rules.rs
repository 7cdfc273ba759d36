use tracing::debug;

use crate::config::Thresholds;
use crate::extractor::Segmenter;
use crate::{AnalysisConfig, Event, EventCategory, FeaturePool, Payload};

/// Rate limiter for continuous categories: admits an instant only when at
/// least `interval` seconds passed since the last admitted one. The first
/// instant is always admitted.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: f64,
    last: Option<f64>,
}

impl Throttle {
    pub fn new(interval: f64) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&self, time: f64) -> bool {
        self.last
            .map(|last| time - last >= self.interval)
            .unwrap_or(true)
    }

    pub fn mark(&mut self, time: f64) {
        self.last = Some(time);
    }
}

pub(super) struct Rules<'a> {
    pub pool: &'a FeaturePool,
    pub analysis: &'a AnalysisConfig,
    pub thresholds: &'a Thresholds,
    pub interval: f64,
    pub duration: f64,
    pub segmenter: &'a dyn Segmenter,
}

impl Rules<'_> {
    pub fn derive(&self, category: EventCategory) -> Vec<Event> {
        use EventCategory as C;
        match category {
            C::Beat => self.beats(),
            C::Onset => self.instants("rhythm.onsetTimes", |_| Payload::Onset { strength: 1.0 }),
            C::OnsetRate => self.summary("rhythm.onsetRate", |rate| Payload::OnsetRate { rate }),

            C::SilenceStart | C::SilenceEnd | C::Gap => self.silence(category),

            C::Loudness => self.scalar("loudness.values", |value| Payload::Loudness { value }),
            C::LoudnessPeak => self.loudness_peaks(),
            C::DynamicChange => self.dynamic_changes(),
            C::Energy => self.scalar("energy.values", |value| Payload::Energy { value }),

            C::SpectralCentroid => {
                self.scalar("spectral.centroid", |value| Payload::SpectralCentroid { value })
            }
            C::SpectralFlux => self.scalar("spectral.flux", |value| Payload::SpectralFlux { value }),
            C::SpectralComplexity => self.scalar("spectral.complexity", |value| {
                Payload::SpectralComplexity { value }
            }),
            C::SpectralRolloff => {
                self.scalar("spectral.rolloff", |value| Payload::SpectralRolloff { value })
            }
            C::Hfc => self.scalar("spectral.hfc", |value| Payload::Hfc { value }),
            C::SpectralContrast => {
                self.vector("spectral.contrast", |values| Payload::SpectralContrast { values })
            }
            C::Mfcc => self.vector("spectral.mfcc", |values| Payload::Mfcc { values }),
            C::TimbreChange => self.timbre_changes(),

            C::BandsMel => self.vector("bands.mel", |values| Payload::BandsMel { values }),
            C::BandsBark => self.vector("bands.bark", |values| Payload::BandsBark { values }),
            C::BandsErb => self.vector("bands.erb", |values| Payload::BandsErb { values }),

            C::Chroma => self.vector("tonal.hpcp", |values| Payload::Chroma { values }),
            C::KeyChange => self.key(),
            C::ChordChange => self.chord_changes(),
            C::Tuning => self.scalar("tonal.tuning", |frequency| Payload::Tuning { frequency }),
            C::Dissonance => self.scalar("tonal.dissonance", |value| Payload::Dissonance { value }),
            C::Inharmonicity => {
                self.scalar("tonal.inharmonicity", |value| Payload::Inharmonicity { value })
            }

            C::Pitch => self.pitch(),
            C::PitchChange => self.pitch_changes(),
            C::Melody => self.melody(),

            C::SegmentBoundary => self.segment_boundaries(),

            other => {
                debug!(category = other.name(), "no derivation available, skipped");
                Vec::new()
            }
        }
    }

    fn missing(&self, key: &str) -> Vec<Event> {
        debug!(key, "feature unavailable this run");
        Vec::new()
    }

    /// Walks `frames` frame times up to the track end and keeps the payloads
    /// the throttle admits. Frames for which `payload` returns `None` do not
    /// count towards the throttle.
    fn throttled(&self, frames: usize, mut payload: impl FnMut(usize) -> Option<Payload>) -> Vec<Event> {
        let mut throttle = Throttle::new(self.interval);
        let mut events = Vec::new();

        for index in 0..frames {
            let time = self.analysis.frame_time(index);
            if time > self.duration {
                break;
            }
            if !throttle.ready(time) {
                continue;
            }
            if let Some(payload) = payload(index) {
                throttle.mark(time);
                events.push(Event::new(time, payload));
            }
        }
        events
    }

    fn scalar(&self, key: &str, make: impl Fn(f64) -> Payload) -> Vec<Event> {
        let Some(values) = self.pool.scalars(key) else {
            return self.missing(key);
        };
        self.throttled(values.len(), |index| Some(make(values[index] as f64)))
    }

    fn vector(&self, key: &str, make: impl Fn(Vec<f32>) -> Payload) -> Vec<Event> {
        let Some(frames) = self.pool.vectors(key) else {
            return self.missing(key);
        };
        self.throttled(frames.len(), |index| Some(make(frames[index].clone())))
    }

    /// One event per entry of a series of instants (seconds).
    fn instants(&self, key: &str, make: impl Fn(usize) -> Payload) -> Vec<Event> {
        let Some(times) = self.pool.scalars(key) else {
            return self.missing(key);
        };
        times
            .iter()
            .enumerate()
            .map(|(index, time)| Event::new(*time as f64, make(index)))
            .collect()
    }

    /// One event at t=0 carrying the last value of the series.
    fn summary(&self, key: &str, make: impl Fn(f64) -> Payload) -> Vec<Event> {
        match self.pool.scalars(key).and_then(|values| values.last()) {
            Some(value) => vec![Event::new(0.0, make(*value as f64))],
            None => self.missing(key),
        }
    }

    fn beats(&self) -> Vec<Event> {
        let confidence = self.pool.scalars("rhythm.confidence").unwrap_or_default();
        self.instants("rhythm.ticks", |index| Payload::Beat {
            confidence: confidence.get(index).map(|value| *value as f64),
        })
    }

    fn silence(&self, category: EventCategory) -> Vec<Event> {
        let (Some(starts), Some(stops)) = (
            self.pool.scalars("silence.startFrame"),
            self.pool.scalars("silence.stopFrame"),
        ) else {
            return self.missing("silence.startFrame");
        };
        let (Some(start_frame), Some(stop_frame)) = (starts.last(), stops.last()) else {
            return Vec::new();
        };

        let guard = self.thresholds.silence_guard;
        let start_frame = start_frame.max(0.0) as usize;
        let start_time = self.analysis.frame_time(start_frame);
        let stop_time = self.analysis.frame_time(stop_frame.max(0.0) as usize);

        let mut regions = Vec::with_capacity(2);
        if start_frame > 0 && start_time > guard {
            regions.push((0.0, start_time));
        }
        if stop_time < self.duration - guard {
            regions.push((stop_time, self.duration));
        }

        regions
            .into_iter()
            .map(|(begin, end)| match category {
                EventCategory::SilenceStart => Event::new(begin, Payload::SilenceStart),
                EventCategory::SilenceEnd => Event::new(end, Payload::SilenceEnd),
                _ => Event::new(
                    begin,
                    Payload::Gap {
                        duration: end - begin,
                    },
                ),
            })
            .collect()
    }

    fn loudness_peaks(&self) -> Vec<Event> {
        let Some(values) = self.pool.scalars("loudness.values") else {
            return self.missing("loudness.values");
        };
        let threshold = global_max(values) * self.thresholds.loudness_peak_ratio;

        let mut events = Vec::new();
        for index in 1..values.len().saturating_sub(1) {
            let time = self.analysis.frame_time(index);
            if time > self.duration {
                break;
            }
            let value = values[index] as f64;
            if values[index] > values[index - 1]
                && values[index] > values[index + 1]
                && value >= threshold
            {
                events.push(Event::new(time, Payload::LoudnessPeak { value }));
            }
        }
        events
    }

    fn dynamic_changes(&self) -> Vec<Event> {
        let Some(values) = self.pool.scalars("loudness.values") else {
            return self.missing("loudness.values");
        };
        let threshold = global_max(values) * self.thresholds.dynamic_change_ratio;
        if !(threshold > 0.0) {
            return Vec::new();
        }

        let mut events = Vec::new();
        for index in 1..values.len() {
            let time = self.analysis.frame_time(index);
            if time > self.duration {
                break;
            }
            let magnitude = (values[index] as f64 - values[index - 1] as f64).abs();
            if magnitude > threshold {
                events.push(Event::new(time, Payload::DynamicChange { magnitude }));
            }
        }
        events
    }

    fn timbre_changes(&self) -> Vec<Event> {
        let Some(frames) = self.pool.vectors("spectral.mfcc") else {
            return self.missing("spectral.mfcc");
        };

        let mut events = Vec::new();
        for index in 1..frames.len() {
            let time = self.analysis.frame_time(index);
            if time > self.duration {
                break;
            }
            let distance = frames[index]
                .iter()
                .zip(&frames[index - 1])
                .map(|(a, b)| {
                    let d = *a as f64 - *b as f64;
                    d * d
                })
                .sum::<f64>()
                .sqrt();
            if distance > self.thresholds.timbre_distance {
                events.push(Event::new(time, Payload::TimbreChange { distance }));
            }
        }
        events
    }

    fn chord_changes(&self) -> Vec<Event> {
        let Some(chords) = self.pool.labels("tonal.chords") else {
            return self.missing("tonal.chords");
        };
        let strength = self.pool.scalars("tonal.chordStrength").unwrap_or_default();

        let mut events = Vec::new();
        let mut previous: Option<&str> = None;
        for (index, chord) in chords.iter().enumerate() {
            let time = self.analysis.frame_time(index);
            if time > self.duration {
                break;
            }
            if previous != Some(chord.as_str()) {
                events.push(Event::new(
                    time,
                    Payload::ChordChange {
                        chord: chord.clone(),
                        strength: strength.get(index).map(|value| *value as f64),
                    },
                ));
                previous = Some(chord);
            }
        }
        events
    }

    fn key(&self) -> Vec<Event> {
        let Some(key) = self.pool.labels("tonal.key").and_then(|keys| keys.last()) else {
            return self.missing("tonal.key");
        };
        let scale = self
            .pool
            .labels("tonal.scale")
            .and_then(|scales| scales.last())
            .cloned()
            .unwrap_or_default();
        let strength = self
            .pool
            .scalars("tonal.keyStrength")
            .and_then(|values| values.last())
            .map(|value| *value as f64)
            .unwrap_or(0.0);

        vec![Event::new(
            0.0,
            Payload::KeyChange {
                key: key.clone(),
                scale,
                strength,
            },
        )]
    }

    fn pitch(&self) -> Vec<Event> {
        let (Some(frequency), Some(confidence)) = (
            self.pool.scalars("pitch.values"),
            self.pool.scalars("pitch.confidence"),
        ) else {
            return self.missing("pitch.values");
        };
        let gate = self.thresholds.pitch_tracking_confidence;

        self.throttled(frequency.len().min(confidence.len()), |index| {
            let confidence = confidence[index] as f64;
            (confidence > gate).then(|| Payload::Pitch {
                frequency: frequency[index] as f64,
                confidence,
            })
        })
    }

    fn pitch_changes(&self) -> Vec<Event> {
        let (Some(frequency), Some(confidence)) = (
            self.pool.scalars("pitch.values"),
            self.pool.scalars("pitch.confidence"),
        ) else {
            return self.missing("pitch.values");
        };
        let thresholds = self.thresholds;

        let mut events = Vec::new();
        let mut reference = 0.0_f64;
        for index in 0..frequency.len().min(confidence.len()) {
            let time = self.analysis.frame_time(index);
            if time > self.duration {
                break;
            }
            let hz = frequency[index] as f64;
            let conf = confidence[index] as f64;

            if conf > thresholds.pitch_change_confidence && index > 0 && reference > 0.0 && hz > 0.0
            {
                let ratio = hz / reference;
                if ratio < thresholds.pitch_ratio_low || ratio > thresholds.pitch_ratio_high {
                    events.push(Event::new(
                        time,
                        Payload::PitchChange {
                            from_hz: reference,
                            to_hz: hz,
                        },
                    ));
                }
            }
            if conf > thresholds.pitch_tracking_confidence {
                reference = hz;
            }
        }
        events
    }

    fn melody(&self) -> Vec<Event> {
        let Some(frequency) = self.pool.scalars("melody.pitch") else {
            return self.missing("melody.pitch");
        };
        self.throttled(frequency.len(), |index| {
            let hz = frequency[index] as f64;
            (hz > 0.0).then_some(Payload::Melody { frequency: hz })
        })
    }

    fn segment_boundaries(&self) -> Vec<Event> {
        let Some(frames) = self.pool.vectors("spectral.mfcc") else {
            return self.missing("spectral.mfcc");
        };
        if frames.len() < self.thresholds.min_segment_frames {
            debug!(frames = frames.len(), "too few frames for segmentation");
            return Vec::new();
        }

        let boundaries = self.segmenter.segment(frames);
        let interior = match boundaries.len() {
            0..=2 => &[][..],
            len => &boundaries[1..len - 1],
        };
        interior
            .iter()
            .map(|frame| self.analysis.frame_time(*frame))
            .filter(|time| *time > 0.0 && *time < self.duration)
            .map(|time| Event::new(time, Payload::SegmentBoundary))
            .collect()
    }
}

fn global_max(values: &[f32]) -> f64 {
    values
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64
}
