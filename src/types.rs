use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StemError};

/// Audio samples laid out as `(channels, frames)` together with their sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    pub samples: Array2<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Array2<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn silent(channels: usize, frames: usize, sample_rate: u32) -> Self {
        Self::new(Array2::zeros((channels, frames)), sample_rate)
    }

    /// Builds a waveform from frame-interleaved samples. A trailing partial frame is dropped.
    pub fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(StemError::Anyhow(anyhow::anyhow!(
                "audio must have at least one channel"
            )));
        }
        let frames = interleaved.len() / channels;
        let by_frame = Array2::from_shape_vec(
            (frames, channels),
            interleaved[..frames * channels].to_vec(),
        )?;
        Ok(Self::new(
            by_frame.reversed_axes().as_standard_layout().into_owned(),
            sample_rate,
        ))
    }

    pub fn to_interleaved(&self) -> Vec<f32> {
        self.samples.t().iter().copied().collect()
    }

    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    pub fn frames(&self) -> usize {
        self.samples.ncols()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Drops every frame past `max_frames`. Shorter waveforms are left as they are.
    pub fn truncate(&mut self, max_frames: usize) {
        if self.frames() > max_frames {
            self.samples = self.samples.slice(s![.., ..max_frames]).to_owned();
        }
    }

    /// Truncates or zero-pads to exactly `frames`.
    pub fn resize_frames(&mut self, frames: usize) {
        let have = self.frames();
        if have > frames {
            self.truncate(frames);
        } else if have < frames {
            let mut grown = Array2::<f32>::zeros((self.channels(), frames));
            grown.slice_mut(s![.., ..have]).assign(&self.samples);
            self.samples = grown;
        }
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, x| m.max(x.abs()))
    }
}

/// Number of frames that fit into `max_duration_secs` at `sample_rate`, rounded down.
pub fn max_frames(max_duration_secs: f64, sample_rate: u32) -> usize {
    (max_duration_secs * sample_rate as f64).floor().max(0.0) as usize
}

/// One separated source, named after the model's source vocabulary.
#[derive(Clone, Debug)]
pub struct Stem {
    pub name: String,
    pub waveform: Waveform,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Accelerator when one is usable, CPU otherwise.
    #[default]
    Auto,
    Cpu,
}

/// What to do with samples outside [-1, 1] before integer conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipMode {
    #[default]
    Rescale,
    Clamp,
    None,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp3 { bitrate_kbps: u32 },
    Wav,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 { .. } => "mp3",
            OutputFormat::Wav => "wav",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Mp3 { bitrate_kbps: 320 }
    }
}

/// Fixed model configuration the gateway is built from at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeparationConfig {
    pub model_name: String,
    pub manifest_url_override: Option<String>,
    pub device: Device,
    /// Random time shifts averaged per window. 0 and 1 both mean a single unshifted pass.
    pub shifts: usize,
    /// Fraction of a window shared with its neighbour.
    pub overlap: f32,
    pub output: OutputFormat,
    pub clip_mode: ClipMode,
    pub max_duration_secs: f64,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            model_name: "htdemucs_ort_v1".into(),
            manifest_url_override: None,
            device: Device::Auto,
            shifts: 1,
            overlap: 0.25,
            output: OutputFormat::default(),
            clip_mode: ClipMode::Rescale,
            max_duration_secs: 170.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelArtifact {
    pub file: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelManifest {
    pub name: String,
    pub version: String,
    pub backend: String,
    pub sample_rate: u32,
    pub window: usize,
    pub hop: usize,
    pub stems: Vec<String>,
    pub input_layout: String,
    pub output_layout: String,
    pub artifacts: Vec<ModelArtifact>,
}

impl ModelManifest {
    pub fn resolve_primary_artifact(&self) -> std::result::Result<&ModelArtifact, String> {
        let a = self
            .artifacts
            .iter()
            .find(|a| a.file.ends_with(".onnx"))
            .or_else(|| self.artifacts.first())
            .ok_or_else(|| format!("manifest `{}` lists no artifacts", self.name))?;
        if a.sha256.len() < 8 || !a.sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("artifact `{}` has no usable sha256", a.file));
        }
        Ok(a)
    }
}
