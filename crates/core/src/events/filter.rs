use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::EventCategory;
use crate::{Result, TracksError};

/// Set of non-transport categories selected for analysis and emission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventFilter {
    categories: BTreeSet<EventCategory>,
}

impl EventFilter {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Beat and onset only.
    pub fn default_preset() -> Self {
        Self::from_categories([EventCategory::Beat, EventCategory::Onset])
    }

    /// Rhythm, onset, silence and loudness/energy: the primary categories.
    pub fn tier1() -> Self {
        use EventCategory::*;
        Self::from_categories([
            Beat,
            Onset,
            SilenceStart,
            SilenceEnd,
            Gap,
            Loudness,
            LoudnessPeak,
            Energy,
            DynamicChange,
        ])
    }

    /// Tier 1 plus tonal, pitch, rhythm extras, spectral, bands and structure.
    pub fn tier2() -> Self {
        use EventCategory::*;
        let mut filter = Self::tier1();
        filter.extend([
            KeyChange,
            ChordChange,
            Chroma,
            Tuning,
            Dissonance,
            Inharmonicity,
            Pitch,
            PitchChange,
            Melody,
            TempoChange,
            Downbeat,
            OnsetRate,
            Novelty,
            SpectralCentroid,
            SpectralFlux,
            SpectralComplexity,
            SpectralContrast,
            SpectralRolloff,
            Mfcc,
            TimbreChange,
            BandsMel,
            BandsBark,
            BandsErb,
            Hfc,
            SegmentBoundary,
            FadeIn,
            FadeOut,
        ]);
        filter
    }

    /// Every selectable category.
    pub fn all() -> Self {
        Self::from_categories(EventCategory::selectable())
    }

    pub fn from_categories(categories: impl IntoIterator<Item = EventCategory>) -> Self {
        let mut filter = Self::empty();
        filter.extend(categories);
        filter
    }

    /// Parses a comma-separated list of category names.
    ///
    /// Unknown and transport names are dropped with a warning; the result may
    /// be empty, which callers treat as an invalid selection.
    pub fn parse_list(csv: &str) -> Self {
        let mut filter = Self::empty();
        for token in csv.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            match EventCategory::from_name(token) {
                None => warn!(token, "unknown event type, skipping"),
                Some(category) if category.is_transport() => {
                    warn!(token, "transport event is always enabled, skipping")
                }
                Some(category) => {
                    filter.categories.insert(category);
                }
            }
        }
        filter
    }

    /// Resolves a preset name or an explicit category list.
    pub fn from_spec(spec: &str) -> Result<Self> {
        let filter = match spec.trim() {
            "default" => Self::default_preset(),
            "tier1" | "primary" => Self::tier1(),
            "tier2" => Self::tier2(),
            "all" => Self::all(),
            list => Self::parse_list(list),
        };

        if filter.is_empty() {
            return Err(TracksError::config(format!(
                "no valid events specified in `{spec}`"
            )));
        }
        Ok(filter)
    }

    /// Adds categories, silently ignoring transport ones.
    pub fn extend(&mut self, categories: impl IntoIterator<Item = EventCategory>) {
        self.categories
            .extend(categories.into_iter().filter(|category| !category.is_transport()));
    }

    pub fn contains(&self, category: EventCategory) -> bool {
        self.categories.contains(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = EventCategory> + '_ {
        self.categories.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(EventCategory::name).collect();
        f.write_str(&names.join(","))
    }
}

impl TryFrom<String> for EventFilter {
    type Error = TracksError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_spec(&value)
    }
}

impl From<EventFilter> for String {
    fn from(value: EventFilter) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_and_drops_unknown_and_transport_names() {
        let filter = EventFilter::parse_list(" beat, bogus ,track.start,key.change,,beat");
        assert_eq!(filter.len(), 2);
        assert!(filter.contains(EventCategory::Beat));
        assert!(filter.contains(EventCategory::KeyChange));
        assert!(!filter.contains(EventCategory::TrackStart));
    }

    #[test]
    fn empty_selection_is_a_configuration_error() {
        let err = EventFilter::from_spec("bogus,track.end").unwrap_err();
        assert!(matches!(err, TracksError::Config(_)));
    }

    #[test]
    fn presets_nest_and_exclude_transport() {
        let default = EventFilter::default_preset();
        let tier1 = EventFilter::tier1();
        let tier2 = EventFilter::tier2();
        let all = EventFilter::all();

        assert_eq!(default.len(), 2);
        assert!(default.iter().all(|c| tier1.contains(c)));
        assert!(tier1.iter().all(|c| tier2.contains(c)));
        assert!(tier2.iter().all(|c| all.contains(c)));
        assert!(all.iter().all(|c| !c.is_transport()));
        assert_eq!(EventFilter::from_spec("primary").unwrap(), tier1);
    }

    #[test]
    fn extend_ignores_transport_categories() {
        let filter = EventFilter::from_categories([EventCategory::TrackAbort, EventCategory::Gap]);
        assert_eq!(filter.len(), 1);
        assert!(filter.contains(EventCategory::Gap));
        assert!(!filter.contains(EventCategory::TrackAbort));
    }

    #[test]
    fn serializes_as_a_category_list() {
        let filter = EventFilter::from_categories([EventCategory::Onset, EventCategory::Beat]);
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, "\"beat,onset\"");

        let back: EventFilter = serde_json::from_str("\"tier1\"").unwrap();
        assert_eq!(back, EventFilter::tier1());
    }
}
