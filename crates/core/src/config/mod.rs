use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{EventFilter, Result, TracksError};

/// Locations probed for a configuration file when none is given explicitly.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["config/tracks-default.yaml", "tracks-default.yaml"];

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub analysis: AnalysisConfig,
    pub transport: TransportConfig,
    pub events: EventsConfig,
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded configuration file");
        Self::from_yaml_str(&text)
    }

    /// Loads the first default configuration file that exists, falling back
    /// to built-in defaults.
    pub fn load_default() -> Result<Self> {
        match DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).find(|path| path.is_file()) {
            Some(path) => Self::from_yaml_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Rejects settings the analysis and emission stages cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.analysis.sample_rate == 0 {
            return Err(TracksError::config("sample_rate must be positive"));
        }
        if self.analysis.frame_size == 0 || self.analysis.hop_size == 0 {
            return Err(TracksError::config("frame_size and hop_size must be positive"));
        }
        let position = self.transport.position_interval;
        if !(position > 0.0 && position.is_finite()) {
            return Err(TracksError::config("position_interval must be positive and finite"));
        }
        let continuous = self.events.continuous_interval;
        if !(continuous > 0.0 && continuous.is_finite()) {
            return Err(TracksError::config("continuous_interval must be positive and finite"));
        }
        let prepare = self.transport.prepare_time;
        if !(prepare >= 0.0 && prepare.is_finite()) {
            return Err(TracksError::config("prepare_time must be finite and not negative"));
        }
        if self.events.enabled.is_empty() {
            return Err(TracksError::config("no events enabled"));
        }
        Ok(())
    }
}

/// Where and how envelopes are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Multicast group, or a broadcast address.
    pub multicast_group: Ipv4Addr,
    pub port: u16,
    pub ttl: u32,
    pub loopback: bool,
    /// Outbound interface address; unspecified lets the OS choose.
    pub interface: Ipv4Addr,
    /// Secondary unicast destination: an address, or `auto` to probe the
    /// default-route gateway.
    pub unicast_target: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_group: Ipv4Addr::new(239, 255, 0, 1),
            port: 5000,
            ttl: 1,
            loopback: true,
            interface: Ipv4Addr::UNSPECIFIED,
            unicast_target: None,
        }
    }
}

/// Framing of the analysis signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
}

impl AnalysisConfig {
    /// Start time of the frame at `index`.
    pub fn frame_time(&self, index: usize) -> f64 {
        index as f64 * self.hop_size as f64 / self.sample_rate as f64
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 2048,
            hop_size: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Seconds between track.position heartbeats.
    pub position_interval: f64,
    /// Pre-roll seconds announced with track.prepare; zero disables it.
    pub prepare_time: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            position_interval: 1.0,
            prepare_time: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Minimum seconds between two emissions of one continuous category.
    pub continuous_interval: f64,
    pub enabled: EventFilter,
    pub thresholds: Thresholds,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            continuous_interval: 0.1,
            enabled: EventFilter::default_preset(),
            thresholds: Thresholds::default(),
        }
    }
}

/// Heuristic constants of the derivation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Silence shorter than this at either end of the track is ignored.
    pub silence_guard: f64,
    /// Fraction of the global maximum a loudness peak must reach.
    pub loudness_peak_ratio: f64,
    /// Fraction of the global maximum a frame-to-frame jump must exceed.
    pub dynamic_change_ratio: f64,
    /// Euclidean MFCC distance that counts as a timbre change.
    pub timbre_distance: f64,
    /// Confidence a frame needs to report a pitch change.
    pub pitch_change_confidence: f64,
    /// Confidence a frame needs to be tracked as the reference pitch and to
    /// be emitted as continuous pitch.
    pub pitch_tracking_confidence: f64,
    /// Frequency ratios inside `[low, high]` are not a pitch change.
    pub pitch_ratio_low: f64,
    pub pitch_ratio_high: f64,
    /// Segmentation is skipped for shorter feature series.
    pub min_segment_frames: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            silence_guard: 0.05,
            loudness_peak_ratio: 0.9,
            dynamic_change_ratio: 0.3,
            timbre_distance: 50.0,
            pitch_change_confidence: 0.5,
            pitch_tracking_confidence: 0.3,
            pitch_ratio_low: 0.94,
            pitch_ratio_high: 1.06,
            min_segment_frames: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventCategory;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.network.multicast_group, Ipv4Addr::new(239, 255, 0, 1));
        assert_eq!(config.network.port, 5000);
        assert_eq!(config.analysis.hop_size, 1024);
        assert_eq!(config.events.enabled, EventFilter::default_preset());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let config = Config::from_yaml_str(
            "network:\n  port: 6000\nevents:\n  continuous_interval: 0.25\n  enabled: beat,key.change\n",
        )
        .unwrap();

        assert_eq!(config.network.port, 6000);
        assert_eq!(config.network.ttl, 1);
        assert_eq!(config.events.continuous_interval, 0.25);
        assert!(config.events.enabled.contains(EventCategory::KeyChange));
        assert_eq!(config.events.thresholds.timbre_distance, 50.0);
    }

    #[test]
    fn thresholds_are_overridable() {
        let config =
            Config::from_yaml_str("events:\n  thresholds:\n    timbre_distance: 12.5\n").unwrap();
        assert_eq!(config.events.thresholds.timbre_distance, 12.5);
        assert_eq!(config.events.thresholds.dynamic_change_ratio, 0.3);
    }

    #[test]
    fn empty_event_list_fails_to_load() {
        assert!(Config::from_yaml_str("events:\n  enabled: nonsense\n").is_err());
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        let mut config = Config::default();
        config.analysis.hop_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.prepare_time = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_infinite_timings() {
        let config = Config::from_yaml_str("transport:\n  prepare_time: .inf\n").unwrap();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.position_interval = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.events.continuous_interval = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn frame_time_uses_hop_and_rate() {
        let analysis = AnalysisConfig {
            sample_rate: 1000,
            frame_size: 200,
            hop_size: 100,
        };
        assert_eq!(analysis.frame_time(5), 0.5);
    }
}
