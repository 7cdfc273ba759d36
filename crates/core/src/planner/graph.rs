//! Static dataflow graph of the extractor: passes, computations, their
//! output ports, and which pool keys each event category reads.

use crate::EventCategory;

/// One decode of the source feeding a group of related computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pass {
    /// Loader only; run solely to learn the track duration.
    Decode,
    Rhythm,
    Onset,
    Silence,
    Loudness,
    Spectral,
    Melody,
}

impl Pass {
    pub fn name(self) -> &'static str {
        match self {
            Pass::Decode => "decode",
            Pass::Rhythm => "rhythm",
            Pass::Onset => "onset",
            Pass::Silence => "silence",
            Pass::Loudness => "loudness",
            Pass::Spectral => "spectral",
            Pass::Melody => "melody",
        }
    }

    /// Whether the pass reports how many samples it decoded.
    pub fn yields_duration(self) -> bool {
        matches!(self, Pass::Decode | Pass::Rhythm)
    }
}

/// An output port of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub name: &'static str,
    /// Pool key the port can be stored under.
    pub key: Option<&'static str>,
    /// Whether downstream computations consume this port.
    pub stream: bool,
}

// Macros rather than `const fn` so each port list is a promotable literal.
macro_rules! feature {
    ($name:literal, $key:literal) => {
        Port {
            name: $name,
            key: Some($key),
            stream: false,
        }
    };
}

macro_rules! stream {
    ($name:literal) => {
        Port {
            name: $name,
            key: None,
            stream: true,
        }
    };
}

macro_rules! auxiliary {
    ($name:literal) => {
        Port {
            name: $name,
            key: None,
            stream: false,
        }
    };
}

/// A named computation request understood by a feature extractor.
///
/// Declaration order is a topological order of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Computation {
    BeatTracker,
    OnsetRate,
    StartStopSilence,
    Loudness,
    Energy,
    Spectrum,
    SpectralCentroidTime,
    Mfcc,
    MelBands,
    BarkBands,
    ErbBands,
    SpectralComplexity,
    SpectralContrast,
    Flux,
    RollOff,
    Hfc,
    SpectralPeaks,
    Hpcp,
    Key,
    Chords,
    TuningFrequency,
    FilteredPeaks,
    Dissonance,
    Inharmonicity,
    PitchYinFft,
    Melodia,
}

impl Computation {
    pub const ALL: &'static [Computation] = &[
        Computation::BeatTracker,
        Computation::OnsetRate,
        Computation::StartStopSilence,
        Computation::Loudness,
        Computation::Energy,
        Computation::Spectrum,
        Computation::SpectralCentroidTime,
        Computation::Mfcc,
        Computation::MelBands,
        Computation::BarkBands,
        Computation::ErbBands,
        Computation::SpectralComplexity,
        Computation::SpectralContrast,
        Computation::Flux,
        Computation::RollOff,
        Computation::Hfc,
        Computation::SpectralPeaks,
        Computation::Hpcp,
        Computation::Key,
        Computation::Chords,
        Computation::TuningFrequency,
        Computation::FilteredPeaks,
        Computation::Dissonance,
        Computation::Inharmonicity,
        Computation::PitchYinFft,
        Computation::Melodia,
    ];

    pub fn pass(self) -> Pass {
        use Computation::*;
        match self {
            BeatTracker => Pass::Rhythm,
            OnsetRate => Pass::Onset,
            StartStopSilence => Pass::Silence,
            Loudness | Energy => Pass::Loudness,
            Melodia => Pass::Melody,
            _ => Pass::Spectral,
        }
    }

    /// Upstream computations whose stream port this one consumes. Empty means
    /// the computation reads decoded audio or raw frames.
    pub fn inputs(self) -> &'static [Computation] {
        use Computation::*;
        match self {
            Mfcc | MelBands | BarkBands | ErbBands | SpectralComplexity | SpectralContrast
            | Flux | RollOff | Hfc | SpectralPeaks | FilteredPeaks | PitchYinFft => &[Spectrum],
            Hpcp | TuningFrequency => &[SpectralPeaks],
            Key | Chords => &[Hpcp],
            Dissonance | Inharmonicity => &[FilteredPeaks],
            _ => &[],
        }
    }

    pub fn outputs(self) -> &'static [Port] {
        use Computation::*;
        match self {
            BeatTracker => &[
                feature!("ticks", "rhythm.ticks"),
                feature!("confidence", "rhythm.confidence"),
            ],
            OnsetRate => &[
                feature!("onsetTimes", "rhythm.onsetTimes"),
                feature!("onsetRate", "rhythm.onsetRate"),
            ],
            StartStopSilence => &[
                feature!("startFrame", "silence.startFrame"),
                feature!("stopFrame", "silence.stopFrame"),
            ],
            Loudness => &[feature!("loudness", "loudness.values")],
            Energy => &[feature!("energy", "energy.values")],
            Spectrum => &[stream!("spectrum")],
            SpectralCentroidTime => &[feature!("centroid", "spectral.centroid")],
            Mfcc => &[feature!("mfcc", "spectral.mfcc"), auxiliary!("bands")],
            MelBands => &[feature!("bands", "bands.mel")],
            BarkBands => &[feature!("bands", "bands.bark")],
            ErbBands => &[feature!("bands", "bands.erb")],
            SpectralComplexity => &[feature!("spectralComplexity", "spectral.complexity")],
            SpectralContrast => &[
                feature!("spectralContrast", "spectral.contrast"),
                auxiliary!("spectralValley"),
            ],
            Flux => &[feature!("flux", "spectral.flux")],
            RollOff => &[feature!("rollOff", "spectral.rolloff")],
            Hfc => &[feature!("hfc", "spectral.hfc")],
            SpectralPeaks | FilteredPeaks => &[stream!("peaks")],
            Hpcp => &[Port {
                name: "hpcp",
                key: Some("tonal.hpcp"),
                stream: true,
            }],
            Key => &[
                feature!("key", "tonal.key"),
                feature!("scale", "tonal.scale"),
                feature!("strength", "tonal.keyStrength"),
            ],
            Chords => &[
                feature!("chords", "tonal.chords"),
                feature!("strength", "tonal.chordStrength"),
            ],
            TuningFrequency => &[
                feature!("tuningFrequency", "tonal.tuning"),
                auxiliary!("tuningCents"),
            ],
            Dissonance => &[feature!("dissonance", "tonal.dissonance")],
            Inharmonicity => &[feature!("inharmonicity", "tonal.inharmonicity")],
            PitchYinFft => &[
                feature!("pitch", "pitch.values"),
                feature!("pitchConfidence", "pitch.confidence"),
            ],
            Melodia => &[
                feature!("pitch", "melody.pitch"),
                feature!("pitchConfidence", "melody.confidence"),
            ],
        }
    }

    /// The computation and port that store `key`, if any.
    pub fn producer_of(key: &str) -> Option<(Computation, Port)> {
        Self::ALL.iter().find_map(|computation| {
            computation
                .outputs()
                .iter()
                .find(|port| port.key == Some(key))
                .map(|port| (*computation, *port))
        })
    }
}

/// Pool keys a category's derivation rule reads.
///
/// Categories with no entry have no extractor support; selecting them
/// schedules nothing.
pub fn reads(category: EventCategory) -> &'static [&'static str] {
    use EventCategory::*;
    match category {
        Beat => &["rhythm.ticks", "rhythm.confidence"],
        Onset => &["rhythm.onsetTimes"],
        OnsetRate => &["rhythm.onsetRate"],
        SilenceStart | SilenceEnd | Gap => &["silence.startFrame", "silence.stopFrame"],
        Loudness | LoudnessPeak | DynamicChange => &["loudness.values"],
        Energy => &["energy.values"],
        SpectralCentroid => &["spectral.centroid"],
        SpectralFlux => &["spectral.flux"],
        SpectralComplexity => &["spectral.complexity"],
        SpectralContrast => &["spectral.contrast"],
        SpectralRolloff => &["spectral.rolloff"],
        Hfc => &["spectral.hfc"],
        Mfcc | TimbreChange | SegmentBoundary => &["spectral.mfcc"],
        BandsMel => &["bands.mel"],
        BandsBark => &["bands.bark"],
        BandsErb => &["bands.erb"],
        Chroma => &["tonal.hpcp"],
        KeyChange => &["tonal.key", "tonal.scale", "tonal.keyStrength"],
        ChordChange => &["tonal.chords", "tonal.chordStrength"],
        Tuning => &["tonal.tuning"],
        Dissonance => &["tonal.dissonance"],
        Inharmonicity => &["tonal.inharmonicity"],
        Pitch | PitchChange => &["pitch.values", "pitch.confidence"],
        Melody => &["melody.pitch"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_order_is_topological() {
        for (index, computation) in Computation::ALL.iter().enumerate() {
            for input in computation.inputs() {
                let position = Computation::ALL.iter().position(|c| c == input).unwrap();
                assert!(position < index, "{computation:?} precedes its input {input:?}");
                assert_eq!(input.pass(), computation.pass());
            }
        }
    }

    #[test]
    fn every_read_key_has_a_producer() {
        for category in EventCategory::selectable() {
            for key in reads(category) {
                assert!(Computation::producer_of(key).is_some(), "no producer for {key}");
            }
        }
    }

    #[test]
    fn port_lists_outlive_their_lookup() {
        let ports: Vec<&'static [Port]> = Computation::ALL.iter().map(|c| c.outputs()).collect();
        assert!(ports.iter().all(|list| !list.is_empty()));
        assert_eq!(
            Computation::Spectrum.outputs(),
            &[Port {
                name: "spectrum",
                key: None,
                stream: true,
            }]
        );
        assert_eq!(
            Computation::producer_of("spectral.mfcc").map(|(c, _)| c),
            Some(Computation::Mfcc)
        );
    }

    #[test]
    fn pool_keys_are_unique() {
        let mut keys: Vec<_> = Computation::ALL
            .iter()
            .flat_map(|c| c.outputs().iter().filter_map(|port| port.key))
            .collect();
        let total = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), total);
    }
}
