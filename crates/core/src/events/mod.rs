//! Event taxonomy: the closed set of categories, the filter that selects
//! among them and the payload carried on the wire.

mod filter;
mod payload;

pub use filter::EventFilter;
pub use payload::{Event, Payload, ABORT_USER_INTERRUPT};

use std::fmt;

/// Coarse grouping of categories, used for listings and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Transport,
    Rhythm,
    Onset,
    Tonal,
    Pitch,
    Loudness,
    Silence,
    Spectral,
    Bands,
    Structure,
    Quality,
    Envelope,
}

impl Family {
    pub fn name(self) -> &'static str {
        match self {
            Family::Transport => "transport",
            Family::Rhythm => "rhythm",
            Family::Onset => "onset",
            Family::Tonal => "tonal",
            Family::Pitch => "pitch/melody",
            Family::Loudness => "loudness/energy",
            Family::Silence => "silence/gap",
            Family::Spectral => "spectral",
            Family::Bands => "bands",
            Family::Structure => "structure",
            Family::Quality => "quality",
            Family::Envelope => "envelope/transient",
        }
    }
}

macro_rules! categories {
    ($($variant:ident => $name:literal, $family:ident;)+) => {
        /// Every kind of event the system knows how to emit.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventCategory {
            $($variant,)+
        }

        impl EventCategory {
            /// All categories in declaration order.
            pub const ALL: &'static [EventCategory] = &[$(EventCategory::$variant,)+];

            /// Lower-case dotted name used by filters and as the wire tag.
            pub fn name(self) -> &'static str {
                match self {
                    $(EventCategory::$variant => $name,)+
                }
            }

            pub fn family(self) -> Family {
                match self {
                    $(EventCategory::$variant => Family::$family,)+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(EventCategory::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

categories! {
    TrackStart => "track.start", Transport;
    TrackEnd => "track.end", Transport;
    TrackPosition => "track.position", Transport;
    TrackAbort => "track.abort", Transport;
    TrackPrepare => "track.prepare", Transport;

    Beat => "beat", Rhythm;
    TempoChange => "tempo.change", Rhythm;
    Downbeat => "downbeat", Rhythm;

    Onset => "onset", Onset;
    OnsetRate => "onset.rate", Onset;
    Novelty => "novelty", Onset;

    KeyChange => "key.change", Tonal;
    ChordChange => "chord.change", Tonal;
    Chroma => "chroma", Tonal;
    Tuning => "tuning", Tonal;
    Dissonance => "dissonance", Tonal;
    Inharmonicity => "inharmonicity", Tonal;

    Pitch => "pitch", Pitch;
    PitchChange => "pitch.change", Pitch;
    Melody => "melody", Pitch;

    Loudness => "loudness", Loudness;
    LoudnessPeak => "loudness.peak", Loudness;
    Energy => "energy", Loudness;
    DynamicChange => "dynamic.change", Loudness;

    SilenceStart => "silence.start", Silence;
    SilenceEnd => "silence.end", Silence;
    Gap => "gap", Silence;

    SpectralCentroid => "spectral.centroid", Spectral;
    SpectralFlux => "spectral.flux", Spectral;
    SpectralComplexity => "spectral.complexity", Spectral;
    SpectralContrast => "spectral.contrast", Spectral;
    SpectralRolloff => "spectral.rolloff", Spectral;
    Mfcc => "mfcc", Spectral;
    TimbreChange => "timbre.change", Spectral;

    BandsMel => "bands.mel", Bands;
    BandsBark => "bands.bark", Bands;
    BandsErb => "bands.erb", Bands;
    Hfc => "hfc", Bands;

    SegmentBoundary => "segment.boundary", Structure;
    FadeIn => "fade.in", Structure;
    FadeOut => "fade.out", Structure;

    Click => "click", Quality;
    Discontinuity => "discontinuity", Quality;
    NoiseBurst => "noise.burst", Quality;
    Saturation => "saturation", Quality;
    Hum => "hum", Quality;

    Envelope => "envelope", Envelope;
    Attack => "attack", Envelope;
    Decay => "decay", Envelope;
}

impl EventCategory {
    /// Transport-framing categories are always emitted and never filterable.
    pub fn is_transport(self) -> bool {
        self.family() == Family::Transport
    }

    /// Categories a filter may contain.
    pub fn selectable() -> impl Iterator<Item = EventCategory> {
        Self::ALL.iter().copied().filter(|category| !category.is_transport())
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selectable category names, sorted alphabetically.
pub fn list_categories() -> Vec<&'static str> {
    let mut names: Vec<_> = EventCategory::selectable().map(EventCategory::name).collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_lookup() {
        for category in EventCategory::ALL {
            assert_eq!(EventCategory::from_name(category.name()), Some(*category));
        }
        assert_eq!(EventCategory::from_name("tempo"), None);
    }

    #[test]
    fn exactly_the_framing_categories_are_transport() {
        let transport: Vec<_> = EventCategory::ALL
            .iter()
            .filter(|category| category.is_transport())
            .collect();
        assert_eq!(transport.len(), 5);
        assert!(EventCategory::TrackPosition.is_transport());
        assert!(!EventCategory::Beat.is_transport());
    }

    #[test]
    fn listing_is_sorted_and_excludes_transport() {
        let names = list_categories();
        assert!(names.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(!names.contains(&"track.start"));
        assert_eq!(names.len(), EventCategory::ALL.len() - 5);
    }
}
