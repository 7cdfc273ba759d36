use std::collections::BTreeSet;
use std::f32::consts::PI;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use tracing::{debug, warn};

use super::{FeatureExtractor, PassOutput};
use crate::planner::{Computation, Pass, PassPlan};
use crate::{AnalysisConfig, Result, Series, TracksError};

const BEAT_GAIN: f32 = 12.0;
const BEAT_THRESHOLD: f32 = 0.6;
const MIN_BEAT_INTERVAL: f64 = 0.2;
const SILENCE_THRESHOLD_DB: f32 = -60.0;
const ONSET_WINDOW: usize = 8;
const ONSET_SENSITIVITY: f32 = 1.5;
const MIN_ONSET_INTERVAL: f64 = 0.05;
const ROLLOFF_FRACTION: f32 = 0.85;
const MEL_BANDS: usize = 24;
const MFCC_FILTERS: usize = 40;
const MFCC_COEFFICIENTS: usize = 13;
const PITCH_MIN_HZ: f32 = 50.0;
const PITCH_MAX_HZ: f32 = 2000.0;
const MELODY_VOICING: f32 = 0.3;

/// Built-in extractor for WAV sources.
///
/// Supports the time-domain rhythm, onset, silence and loudness passes and
/// the spectrum-fed centroid, flux, roll-off, HFC, mel band, MFCC and pitch
/// computations. Anything else in a plan is reported once and yields no
/// series, so the matching categories are skipped downstream.
pub struct NativeExtractor {
    sample_rate: u32,
    frame_size: usize,
    hop_size: usize,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
    decoded: Option<(PathBuf, Arc<Vec<f32>>)>,
    reported: BTreeSet<Computation>,
}

impl NativeExtractor {
    pub fn new(analysis: &AnalysisConfig) -> Self {
        Self {
            sample_rate: analysis.sample_rate,
            frame_size: analysis.frame_size,
            hop_size: analysis.hop_size,
            fft_planner: RealFftPlanner::new(),
            fft: None,
            decoded: None,
            reported: BTreeSet::new(),
        }
    }

    fn supports(computation: Computation) -> bool {
        use Computation::*;
        matches!(
            computation,
            BeatTracker
                | OnsetRate
                | StartStopSilence
                | Loudness
                | Energy
                | Spectrum
                | SpectralCentroidTime
                | Mfcc
                | MelBands
                | Flux
                | RollOff
                | Hfc
                | PitchYinFft
                | Melodia
        )
    }

    fn frame_time(&self, index: usize) -> f64 {
        index as f64 * self.hop_size as f64 / self.sample_rate as f64
    }

    /// Mono signal at the analysis rate. The last decode is cached, since
    /// every pass of one run reads the same source.
    fn signal(&mut self, source: &Path) -> Result<Arc<Vec<f32>>> {
        if let Some((path, signal)) = &self.decoded {
            if path == source {
                return Ok(signal.clone());
            }
        }

        let signal = Arc::new(decode_wav(source, self.sample_rate)?);
        debug!(path = %source.display(), samples = signal.len(), "decoded source");
        self.decoded = Some((source.to_path_buf(), signal.clone()));
        Ok(signal)
    }

    fn framing(&self) -> Framing {
        Framing {
            frame_size: self.frame_size,
            hop_size: self.hop_size,
        }
    }

    fn rhythm_pass(&self, signal: &[f32], plan: &PassPlan, output: &mut PassOutput) {
        let mut ticks = Vec::new();
        let mut confidences = Vec::new();
        let mut last_rms = 0.0;

        for (index, frame) in self.framing().frames(signal).enumerate() {
            let rms = compute_rms(&frame);
            let confidence = ((rms - last_rms).max(0.0) * BEAT_GAIN).clamp(0.0, 1.0);
            last_rms = rms;

            let time = self.frame_time(index);
            let spaced = ticks
                .last()
                .map(|last: &f32| time - *last as f64 >= MIN_BEAT_INTERVAL)
                .unwrap_or(true);
            if confidence >= BEAT_THRESHOLD && spaced {
                ticks.push(time as f32);
                confidences.push(confidence);
            }
        }

        debug!(beats = ticks.len(), "beat tracking finished");
        store(plan, output, Computation::BeatTracker, "ticks", || Series::Scalar(ticks));
        store(plan, output, Computation::BeatTracker, "confidence", || {
            Series::Scalar(confidences)
        });
    }

    fn onset_pass(&mut self, signal: &[f32], plan: &PassPlan, output: &mut PassOutput) -> Result<()> {
        let mut flux = Vec::new();
        let mut previous: Option<Vec<f32>> = None;
        for frame in self.framing().frames(signal) {
            let spectrum = self.magnitude_spectrum(&frame)?;
            flux.push(match &previous {
                Some(previous) => rectified_flux(previous, &spectrum),
                None => 0.0,
            });
            previous = Some(spectrum);
        }

        let mut onsets: Vec<f32> = Vec::new();
        for index in 1..flux.len().saturating_sub(1) {
            let lo = index.saturating_sub(ONSET_WINDOW);
            let hi = (index + ONSET_WINDOW + 1).min(flux.len());
            let local_mean = flux[lo..hi].iter().sum::<f32>() / (hi - lo) as f32;
            let is_peak = flux[index] > flux[index - 1] && flux[index] >= flux[index + 1];
            let time = self.frame_time(index);
            let spaced = onsets
                .last()
                .map(|last| time - *last as f64 >= MIN_ONSET_INTERVAL)
                .unwrap_or(true);

            if is_peak && flux[index] > local_mean * ONSET_SENSITIVITY && spaced {
                onsets.push(time as f32);
            }
        }

        let duration = signal.len() as f64 / self.sample_rate as f64;
        let rate = if duration > 0.0 {
            (onsets.len() as f64 / duration) as f32
        } else {
            0.0
        };

        debug!(onsets = onsets.len(), rate, "onset detection finished");
        store(plan, output, Computation::OnsetRate, "onsetTimes", || Series::Scalar(onsets));
        store(plan, output, Computation::OnsetRate, "onsetRate", || {
            Series::Scalar(vec![rate])
        });
        Ok(())
    }

    fn silence_pass(&self, signal: &[f32], plan: &PassPlan, output: &mut PassOutput) {
        let loud: Vec<usize> = self
            .framing()
            .frames(signal)
            .enumerate()
            .filter(|(_, frame)| power_db(frame) > SILENCE_THRESHOLD_DB)
            .map(|(index, _)| index)
            .collect();

        let start = loud.first().copied().unwrap_or(0) as f32;
        let stop = loud.last().copied().unwrap_or(0) as f32;
        store(plan, output, Computation::StartStopSilence, "startFrame", || {
            Series::Scalar(vec![start])
        });
        store(plan, output, Computation::StartStopSilence, "stopFrame", || {
            Series::Scalar(vec![stop])
        });
    }

    fn loudness_pass(&self, signal: &[f32], plan: &PassPlan, output: &mut PassOutput) {
        let energy: Vec<f32> = self
            .framing()
            .frames(signal)
            .map(|frame| frame.iter().map(|sample| sample * sample).sum())
            .collect();

        if plan.runs(Computation::Loudness) {
            let loudness = energy.iter().map(|energy| energy.powf(0.67)).collect();
            store(plan, output, Computation::Loudness, "loudness", || Series::Scalar(loudness));
        }
        if plan.runs(Computation::Energy) {
            store(plan, output, Computation::Energy, "energy", || Series::Scalar(energy));
        }
    }

    fn spectral_pass(&mut self, signal: &[f32], plan: &PassPlan, output: &mut PassOutput) -> Result<()> {
        let bins = self.frame_size / 2 + 1;
        let bin_hz = self.sample_rate as f32 / self.frame_size as f32;
        let mel = plan
            .runs(Computation::MelBands)
            .then(|| mel_filterbank(MEL_BANDS, bins, bin_hz));
        let mfcc_bank = plan
            .runs(Computation::Mfcc)
            .then(|| mel_filterbank(MFCC_FILTERS, bins, bin_hz));

        let mut centroid = Vec::new();
        let mut flux = Vec::new();
        let mut rolloff = Vec::new();
        let mut hfc = Vec::new();
        let mut mel_bands = Vec::new();
        let mut mfcc = Vec::new();
        let mut pitch = Vec::new();
        let mut pitch_confidence = Vec::new();
        let mut previous: Option<Vec<f32>> = None;

        for frame in self.framing().frames(signal) {
            let mut windowed = frame;
            let len = windowed.len();
            for (index, sample) in windowed.iter_mut().enumerate() {
                *sample *= hann_value(index, len);
            }
            let spectrum = self.magnitude_spectrum(&windowed)?;

            if plan.runs(Computation::SpectralCentroidTime) {
                centroid.push(spectral_centroid(&spectrum, bin_hz));
            }
            if plan.runs(Computation::Flux) {
                flux.push(match &previous {
                    Some(previous) => l2_distance(previous, &spectrum),
                    None => 0.0,
                });
            }
            if plan.runs(Computation::RollOff) {
                rolloff.push(spectral_rolloff(&spectrum, bin_hz));
            }
            if plan.runs(Computation::Hfc) {
                hfc.push(
                    spectrum
                        .iter()
                        .enumerate()
                        .map(|(k, magnitude)| k as f32 * magnitude * magnitude)
                        .sum(),
                );
            }
            if let Some(bank) = &mel {
                mel_bands.push(apply_filterbank(bank, &spectrum));
            }
            if let Some(bank) = &mfcc_bank {
                mfcc.push(cepstrum(&apply_filterbank(bank, &spectrum)));
            }
            if plan.runs(Computation::PitchYinFft) {
                let (frequency, confidence) = spectral_pitch(&spectrum, bin_hz);
                pitch.push(frequency);
                pitch_confidence.push(confidence);
            }
            previous = Some(spectrum);
        }

        use Computation as C;
        store(plan, output, C::SpectralCentroidTime, "centroid", || Series::Scalar(centroid));
        store(plan, output, C::Flux, "flux", || Series::Scalar(flux));
        store(plan, output, C::RollOff, "rollOff", || Series::Scalar(rolloff));
        store(plan, output, C::Hfc, "hfc", || Series::Scalar(hfc));
        store(plan, output, C::MelBands, "bands", || Series::Vector(mel_bands));
        store(plan, output, C::Mfcc, "mfcc", || Series::Vector(mfcc));
        store(plan, output, C::PitchYinFft, "pitch", || Series::Scalar(pitch));
        store(plan, output, C::PitchYinFft, "pitchConfidence", || {
            Series::Scalar(pitch_confidence)
        });
        Ok(())
    }

    fn melody_pass(&mut self, signal: &[f32], plan: &PassPlan, output: &mut PassOutput) -> Result<()> {
        let bin_hz = self.sample_rate as f32 / self.frame_size as f32;
        let mut melody = Vec::new();
        let mut confidences = Vec::new();

        for frame in self.framing().frames(signal) {
            let mut windowed = frame;
            let len = windowed.len();
            for (index, sample) in windowed.iter_mut().enumerate() {
                *sample *= hann_value(index, len);
            }
            let spectrum = self.magnitude_spectrum(&windowed)?;
            let (frequency, confidence) = spectral_pitch(&spectrum, bin_hz);
            melody.push(if confidence > MELODY_VOICING { frequency } else { 0.0 });
            confidences.push(confidence);
        }

        store(plan, output, Computation::Melodia, "pitch", || Series::Scalar(melody));
        store(plan, output, Computation::Melodia, "pitchConfidence", || {
            Series::Scalar(confidences)
        });
        Ok(())
    }

    fn magnitude_spectrum(&mut self, frame: &[f32]) -> Result<Vec<f32>> {
        let fft = self.prepare_fft(frame.len())?;
        fft.input.copy_from_slice(frame);
        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;
        Ok(fft.spectrum.iter().map(|bin| bin.norm()).collect())
    }

    fn prepare_fft(&mut self, size: usize) -> Result<&mut FftResources> {
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            let plan = self.fft_planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            self.fft = Some(FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            });
        }

        self.fft
            .as_mut()
            .ok_or_else(|| TracksError::msg("fft resources were not initialised"))
    }
}

impl FeatureExtractor for NativeExtractor {
    fn run_pass(&mut self, source: &Path, plan: &PassPlan) -> Result<PassOutput> {
        for computation in plan.nodes.iter().copied() {
            if !Self::supports(computation) && self.reported.insert(computation) {
                warn!(?computation, "not supported by the native extractor, no output");
            }
        }

        let signal = self.signal(source)?;
        let mut output = PassOutput {
            series: Vec::new(),
            samples_decoded: Some(signal.len() as u64),
        };

        match plan.pass {
            Pass::Decode => {}
            Pass::Rhythm => self.rhythm_pass(&signal, plan, &mut output),
            Pass::Onset => self.onset_pass(&signal, plan, &mut output)?,
            Pass::Silence => self.silence_pass(&signal, plan, &mut output),
            Pass::Loudness => self.loudness_pass(&signal, plan, &mut output),
            Pass::Spectral => self.spectral_pass(&signal, plan, &mut output)?,
            Pass::Melody => self.melody_pass(&signal, plan, &mut output)?,
        }
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

fn store(
    plan: &PassPlan,
    output: &mut PassOutput,
    computation: Computation,
    port: &str,
    series: impl FnOnce() -> Series,
) {
    if !plan.stores(computation, port) {
        return;
    }
    let key = computation
        .outputs()
        .iter()
        .find(|candidate| candidate.name == port)
        .and_then(|candidate| candidate.key);
    if let Some(key) = key {
        output.push(key, series());
    }
}

/// Hop-spaced frames of the signal, zero-padded at the tail.
#[derive(Debug, Clone, Copy)]
struct Framing {
    frame_size: usize,
    hop_size: usize,
}

impl Framing {
    fn frames(self, signal: &[f32]) -> impl Iterator<Item = Vec<f32>> + '_ {
        let count = signal.len().div_ceil(self.hop_size);
        (0..count).map(move |index| {
            let start = index * self.hop_size;
            let end = (start + self.frame_size).min(signal.len());
            let mut frame = signal[start..end].to_vec();
            frame.resize(self.frame_size, 0.0);
            frame
        })
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for NativeExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeExtractor")
            .field("sample_rate", &self.sample_rate)
            .field("frame_size", &self.frame_size)
            .field("hop_size", &self.hop_size)
            .field("fft", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

/// Reads a WAV file, down-mixes it to mono and resamples it to `rate`.
fn decode_wav(path: &Path, rate: u32) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path).map_err(|err| TracksError::decode(path, err))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|err| TracksError::decode(path, err))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|err| TracksError::decode(path, err))?
        }
    };

    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(resample_linear(&mono, spec.sample_rate, rate))
}

fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() || from == 0 {
        return samples.to_vec();
    }

    let ratio = from as f64 / to as f64;
    let len = (samples.len() as f64 / ratio).round() as usize;
    (0..len)
        .map(|index| {
            let position = index as f64 * ratio;
            let base = position.floor() as usize;
            let fraction = (position - base as f64) as f32;
            let current = samples[base.min(samples.len() - 1)];
            let next = samples[(base + 1).min(samples.len() - 1)];
            current + (next - current) * fraction
        })
        .collect()
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn power_db(frame: &[f32]) -> f32 {
    let rms = compute_rms(frame);
    20.0 * rms.max(1e-10).log10()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

fn spectral_centroid(spectrum: &[f32], bin_hz: f32) -> f32 {
    let magnitude_sum: f32 = spectrum.iter().sum();
    if magnitude_sum <= f32::EPSILON {
        return 0.0;
    }
    let weighted: f32 = spectrum
        .iter()
        .enumerate()
        .map(|(index, magnitude)| magnitude * index as f32 * bin_hz)
        .sum();
    weighted / magnitude_sum
}

fn spectral_rolloff(spectrum: &[f32], bin_hz: f32) -> f32 {
    let total: f32 = spectrum.iter().map(|magnitude| magnitude * magnitude).sum();
    if total <= f32::EPSILON {
        return 0.0;
    }
    let mut cumulative = 0.0;
    for (index, magnitude) in spectrum.iter().enumerate() {
        cumulative += magnitude * magnitude;
        if cumulative >= ROLLOFF_FRACTION * total {
            return index as f32 * bin_hz;
        }
    }
    (spectrum.len() - 1) as f32 * bin_hz
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn rectified_flux(previous: &[f32], current: &[f32]) -> f32 {
    previous
        .iter()
        .zip(current)
        .map(|(before, after)| (after - before).max(0.0))
        .sum()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters equally spaced on the mel scale up to Nyquist.
fn mel_filterbank(bands: usize, bins: usize, bin_hz: f32) -> Vec<Vec<f32>> {
    let nyquist = (bins - 1) as f32 * bin_hz;
    let max_mel = hz_to_mel(nyquist);
    let edges: Vec<f32> = (0..bands + 2)
        .map(|index| mel_to_hz(max_mel * index as f32 / (bands + 1) as f32))
        .collect();

    (0..bands)
        .map(|band| {
            let (low, center, high) = (edges[band], edges[band + 1], edges[band + 2]);
            (0..bins)
                .map(|bin| {
                    let hz = bin as f32 * bin_hz;
                    if hz <= low || hz >= high {
                        0.0
                    } else if hz <= center {
                        (hz - low) / (center - low)
                    } else {
                        (high - hz) / (high - center)
                    }
                })
                .collect()
        })
        .collect()
}

fn apply_filterbank(bank: &[Vec<f32>], spectrum: &[f32]) -> Vec<f32> {
    bank.iter()
        .map(|weights| {
            weights
                .iter()
                .zip(spectrum)
                .map(|(weight, magnitude)| weight * magnitude * magnitude)
                .sum()
        })
        .collect()
}

/// DCT-II of the log band energies, first `MFCC_COEFFICIENTS` terms.
fn cepstrum(bands: &[f32]) -> Vec<f32> {
    let log_bands: Vec<f32> = bands
        .iter()
        .map(|energy| 10.0 * energy.max(1e-10).log10())
        .collect();
    let n = log_bands.len() as f32;

    (0..MFCC_COEFFICIENTS)
        .map(|k| {
            log_bands
                .iter()
                .enumerate()
                .map(|(i, value)| value * (PI * k as f32 * (i as f32 + 0.5) / n).cos())
                .sum()
        })
        .collect()
}

/// Strongest peak in the pitch range, refined by parabolic interpolation.
/// Confidence is the peak's share of the in-range energy.
fn spectral_pitch(spectrum: &[f32], bin_hz: f32) -> (f32, f32) {
    let lo = ((PITCH_MIN_HZ / bin_hz).ceil() as usize).max(1);
    let hi = ((PITCH_MAX_HZ / bin_hz).floor() as usize).min(spectrum.len().saturating_sub(2));
    if lo >= hi {
        return (0.0, 0.0);
    }

    let range = &spectrum[lo..=hi];
    let total: f32 = range.iter().map(|magnitude| magnitude * magnitude).sum();
    if total <= f32::EPSILON {
        return (0.0, 0.0);
    }

    let (offset, peak) = range
        .iter()
        .enumerate()
        .fold((0, 0.0_f32), |best, (index, magnitude)| {
            if *magnitude > best.1 {
                (index, *magnitude)
            } else {
                best
            }
        });
    let bin = lo + offset;

    let (left, right) = (spectrum[bin - 1], spectrum[bin + 1]);
    let denominator = left - 2.0 * peak + right;
    let shift = if denominator.abs() > f32::EPSILON {
        (0.5 * (left - right) / denominator).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    let neighbourhood = left * left + peak * peak + right * right;
    ((bin as f32 + shift) * bin_hz, (neighbourhood / total).clamp(0.0, 1.0))
}
