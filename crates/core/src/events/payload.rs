use std::fmt;

use serde::{Deserialize, Serialize};

use super::EventCategory;
use crate::Result;

/// Reason attached to aborts raised by a user interrupt.
pub const ABORT_USER_INTERRUPT: &str = "user_interrupt";

/// One timestamped event. Serialized, it is the envelope sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Seconds from the start of the file. Negative only for pre-roll
    /// announcements and aborts raised during pre-roll.
    pub timestamp: f64,
    #[serde(rename = "event")]
    pub payload: Payload,
}

impl Event {
    pub fn new(timestamp: f64, payload: Payload) -> Self {
        Self { timestamp, payload }
    }

    pub fn category(&self) -> EventCategory {
        self.payload.category()
    }

    /// True for the events after which a receiver expects nothing more.
    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, Payload::TrackEnd | Payload::TrackAbort { .. })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Per-category payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    #[serde(rename = "track.start")]
    TrackStart {
        filename: String,
        duration: f64,
        sample_rate: u32,
        channels: u32,
    },
    #[serde(rename = "track.end")]
    TrackEnd,
    #[serde(rename = "track.position")]
    TrackPosition { position: f64 },
    #[serde(rename = "track.abort")]
    TrackAbort { reason: String },
    #[serde(rename = "track.prepare")]
    TrackPrepare { filename: String, countdown: f64 },

    #[serde(rename = "beat")]
    Beat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },
    #[serde(rename = "tempo.change")]
    TempoChange { bpm: f64 },
    #[serde(rename = "downbeat")]
    Downbeat { confidence: f64 },

    #[serde(rename = "onset")]
    Onset { strength: f64 },
    #[serde(rename = "onset.rate")]
    OnsetRate { rate: f64 },
    #[serde(rename = "novelty")]
    Novelty { value: f64 },

    #[serde(rename = "key.change")]
    KeyChange {
        key: String,
        scale: String,
        strength: f64,
    },
    #[serde(rename = "chord.change")]
    ChordChange {
        chord: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strength: Option<f64>,
    },
    #[serde(rename = "chroma")]
    Chroma { values: Vec<f32> },
    #[serde(rename = "tuning")]
    Tuning { frequency: f64 },
    #[serde(rename = "dissonance")]
    Dissonance { value: f64 },
    #[serde(rename = "inharmonicity")]
    Inharmonicity { value: f64 },

    #[serde(rename = "pitch")]
    Pitch { frequency: f64, confidence: f64 },
    #[serde(rename = "pitch.change")]
    PitchChange { from_hz: f64, to_hz: f64 },
    #[serde(rename = "melody")]
    Melody { frequency: f64 },

    #[serde(rename = "loudness")]
    Loudness { value: f64 },
    #[serde(rename = "loudness.peak")]
    LoudnessPeak { value: f64 },
    #[serde(rename = "energy")]
    Energy { value: f64 },
    #[serde(rename = "dynamic.change")]
    DynamicChange { magnitude: f64 },

    #[serde(rename = "silence.start")]
    SilenceStart,
    #[serde(rename = "silence.end")]
    SilenceEnd,
    #[serde(rename = "gap")]
    Gap { duration: f64 },

    #[serde(rename = "spectral.centroid")]
    SpectralCentroid { value: f64 },
    #[serde(rename = "spectral.flux")]
    SpectralFlux { value: f64 },
    #[serde(rename = "spectral.complexity")]
    SpectralComplexity { value: f64 },
    #[serde(rename = "spectral.contrast")]
    SpectralContrast { values: Vec<f32> },
    #[serde(rename = "spectral.rolloff")]
    SpectralRolloff { value: f64 },
    #[serde(rename = "mfcc")]
    Mfcc { values: Vec<f32> },
    #[serde(rename = "timbre.change")]
    TimbreChange { distance: f64 },

    #[serde(rename = "bands.mel")]
    BandsMel { values: Vec<f32> },
    #[serde(rename = "bands.bark")]
    BandsBark { values: Vec<f32> },
    #[serde(rename = "bands.erb")]
    BandsErb { values: Vec<f32> },
    #[serde(rename = "hfc")]
    Hfc { value: f64 },

    #[serde(rename = "segment.boundary")]
    SegmentBoundary,
    #[serde(rename = "fade.in")]
    FadeIn { end_time: f64 },
    #[serde(rename = "fade.out")]
    FadeOut { start_time: f64 },

    #[serde(rename = "click")]
    Click,
    #[serde(rename = "discontinuity")]
    Discontinuity,
    #[serde(rename = "noise.burst")]
    NoiseBurst,
    #[serde(rename = "saturation")]
    Saturation { duration: f64 },
    #[serde(rename = "hum")]
    Hum { frequency: f64 },

    #[serde(rename = "envelope")]
    Envelope { value: f64 },
    #[serde(rename = "attack")]
    Attack { log_attack_time: f64 },
    #[serde(rename = "decay")]
    Decay { value: f64 },
}

impl Payload {
    pub fn category(&self) -> EventCategory {
        use EventCategory as C;
        match self {
            Payload::TrackStart { .. } => C::TrackStart,
            Payload::TrackEnd => C::TrackEnd,
            Payload::TrackPosition { .. } => C::TrackPosition,
            Payload::TrackAbort { .. } => C::TrackAbort,
            Payload::TrackPrepare { .. } => C::TrackPrepare,
            Payload::Beat { .. } => C::Beat,
            Payload::TempoChange { .. } => C::TempoChange,
            Payload::Downbeat { .. } => C::Downbeat,
            Payload::Onset { .. } => C::Onset,
            Payload::OnsetRate { .. } => C::OnsetRate,
            Payload::Novelty { .. } => C::Novelty,
            Payload::KeyChange { .. } => C::KeyChange,
            Payload::ChordChange { .. } => C::ChordChange,
            Payload::Chroma { .. } => C::Chroma,
            Payload::Tuning { .. } => C::Tuning,
            Payload::Dissonance { .. } => C::Dissonance,
            Payload::Inharmonicity { .. } => C::Inharmonicity,
            Payload::Pitch { .. } => C::Pitch,
            Payload::PitchChange { .. } => C::PitchChange,
            Payload::Melody { .. } => C::Melody,
            Payload::Loudness { .. } => C::Loudness,
            Payload::LoudnessPeak { .. } => C::LoudnessPeak,
            Payload::Energy { .. } => C::Energy,
            Payload::DynamicChange { .. } => C::DynamicChange,
            Payload::SilenceStart => C::SilenceStart,
            Payload::SilenceEnd => C::SilenceEnd,
            Payload::Gap { .. } => C::Gap,
            Payload::SpectralCentroid { .. } => C::SpectralCentroid,
            Payload::SpectralFlux { .. } => C::SpectralFlux,
            Payload::SpectralComplexity { .. } => C::SpectralComplexity,
            Payload::SpectralContrast { .. } => C::SpectralContrast,
            Payload::SpectralRolloff { .. } => C::SpectralRolloff,
            Payload::Mfcc { .. } => C::Mfcc,
            Payload::TimbreChange { .. } => C::TimbreChange,
            Payload::BandsMel { .. } => C::BandsMel,
            Payload::BandsBark { .. } => C::BandsBark,
            Payload::BandsErb { .. } => C::BandsErb,
            Payload::Hfc { .. } => C::Hfc,
            Payload::SegmentBoundary => C::SegmentBoundary,
            Payload::FadeIn { .. } => C::FadeIn,
            Payload::FadeOut { .. } => C::FadeOut,
            Payload::Click => C::Click,
            Payload::Discontinuity => C::Discontinuity,
            Payload::NoiseBurst => C::NoiseBurst,
            Payload::Saturation { .. } => C::Saturation,
            Payload::Hum { .. } => C::Hum,
            Payload::Envelope { .. } => C::Envelope,
            Payload::Attack { .. } => C::Attack,
            Payload::Decay { .. } => C::Decay,
        }
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, values: &[f32]) -> fmt::Result {
    const MAX_SHOWN: usize = 4;

    f.write_str("values=[")?;
    for (index, value) in values.iter().take(MAX_SHOWN).enumerate() {
        if index > 0 {
            f.write_str(",")?;
        }
        write!(f, "{value:.3}")?;
    }
    if values.len() > MAX_SHOWN {
        write!(f, ",...{} total", values.len())?;
    }
    f.write_str("]")
}

/// Console rendering used by the receiver: `[   1.234] beat  confidence=0.870`.
impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:8.3}] {:<18}", self.timestamp, self.category().name())?;
        match &self.payload {
            Payload::TrackStart {
                filename,
                duration,
                sample_rate,
                channels,
            } => write!(
                f,
                "file={filename} duration={duration:.2}s sr={sample_rate} ch={channels}"
            ),
            Payload::TrackPosition { position } => write!(f, "pos={position:.3}s"),
            Payload::TrackAbort { reason } => write!(f, "reason={reason}"),
            Payload::TrackPrepare {
                filename,
                countdown,
            } => write!(f, "file={filename} countdown={countdown:.1}s"),
            Payload::Beat { confidence } => match confidence {
                Some(confidence) => write!(f, "confidence={confidence:.3}"),
                None => Ok(()),
            },
            Payload::TempoChange { bpm } => write!(f, "bpm={bpm:.1}"),
            Payload::Downbeat { confidence } => write!(f, "confidence={confidence:.3}"),
            Payload::Onset { strength } => write!(f, "strength={strength:.3}"),
            Payload::OnsetRate { rate } => write!(f, "rate={rate:.2}/s"),
            Payload::KeyChange {
                key,
                scale,
                strength,
            } => write!(f, "key={key} scale={scale} strength={strength:.3}"),
            Payload::ChordChange { chord, strength } => {
                write!(f, "chord={chord} strength={:.3}", strength.unwrap_or(0.0))
            }
            Payload::Tuning { frequency }
            | Payload::Melody { frequency }
            | Payload::Hum { frequency } => write!(f, "freq={frequency:.1}Hz"),
            Payload::Pitch {
                frequency,
                confidence,
            } => write!(f, "freq={frequency:.1}Hz confidence={confidence:.3}"),
            Payload::PitchChange { from_hz, to_hz } => {
                write!(f, "from={from_hz:.1}Hz to={to_hz:.1}Hz")
            }
            Payload::Loudness { value } | Payload::LoudnessPeak { value } => {
                write!(f, "value={value:.2}")
            }
            Payload::SpectralCentroid { value } | Payload::SpectralRolloff { value } => {
                write!(f, "value={value:.1}")
            }
            Payload::Novelty { value }
            | Payload::Dissonance { value }
            | Payload::Inharmonicity { value }
            | Payload::Energy { value }
            | Payload::SpectralFlux { value }
            | Payload::SpectralComplexity { value }
            | Payload::Hfc { value }
            | Payload::Envelope { value }
            | Payload::Decay { value } => write!(f, "value={value:.4}"),
            Payload::DynamicChange { magnitude } => write!(f, "magnitude={magnitude:.3}"),
            Payload::Gap { duration } | Payload::Saturation { duration } => {
                write!(f, "duration={duration:.3}s")
            }
            Payload::TimbreChange { distance } => write!(f, "distance={distance:.4}"),
            Payload::FadeIn { end_time } => write!(f, "end={end_time:.3}s"),
            Payload::FadeOut { start_time } => write!(f, "start={start_time:.3}s"),
            Payload::Attack { log_attack_time } => write!(f, "log_time={log_attack_time:.4}"),
            Payload::Chroma { values }
            | Payload::SpectralContrast { values }
            | Payload::Mfcc { values }
            | Payload::BandsMel { values }
            | Payload::BandsBark { values }
            | Payload::BandsErb { values } => write_values(f, values),
            Payload::TrackEnd
            | Payload::SilenceStart
            | Payload::SilenceEnd
            | Payload::SegmentBoundary
            | Payload::Click
            | Payload::Discontinuity
            | Payload::NoiseBurst => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_timestamp_and_tagged_payload() {
        let event = Event::new(
            1.5,
            Payload::KeyChange {
                key: "A".into(),
                scale: "minor".into(),
                strength: 0.8,
            },
        );
        let json: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();

        assert_eq!(json["timestamp"], 1.5);
        assert_eq!(json["event"]["type"], "key.change");
        assert_eq!(json["event"]["scale"], "minor");
    }

    #[test]
    fn decodes_unit_and_optional_payloads() {
        let silence = Event::decode(br#"{"timestamp":2.0,"event":{"type":"silence.start"}}"#)
            .unwrap();
        assert_eq!(silence.payload, Payload::SilenceStart);

        let beat = Event::decode(br#"{"timestamp":0.5,"event":{"type":"beat"}}"#).unwrap();
        assert_eq!(beat.payload, Payload::Beat { confidence: None });
    }

    #[test]
    fn rejects_unknown_payload_tags() {
        assert!(Event::decode(br#"{"timestamp":0.0,"event":{"type":"laser"}}"#).is_err());
        assert!(Event::decode(b"not json").is_err());
    }

    #[test]
    fn tag_matches_category_name() {
        let event = Event::new(0.0, Payload::Mfcc { values: vec![1.0] });
        let json: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(json["event"]["type"], event.category().name());
    }

    #[test]
    fn renders_console_line() {
        let event = Event::new(1.234, Payload::Beat { confidence: Some(0.87) });
        assert_eq!(event.to_string(), "[   1.234] beat              confidence=0.870");

        let bands = Event::new(
            0.0,
            Payload::BandsMel {
                values: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            },
        );
        assert!(bands.to_string().ends_with("values=[1.000,2.000,3.000,4.000,...5 total]"));
    }

    #[test]
    fn terminal_events_are_end_and_abort() {
        assert!(Event::new(3.0, Payload::TrackEnd).is_terminal());
        assert!(Event::new(
            1.0,
            Payload::TrackAbort {
                reason: ABORT_USER_INTERRUPT.into()
            }
        )
        .is_terminal());
        assert!(!Event::new(1.0, Payload::TrackPosition { position: 1.0 }).is_terminal());
    }
}
