use crate::{
    core::dsp::stft_cac_stereo_centered,
    error::{Result, StemError},
    model::model_manager::ModelHandle,
    types::{Device, ModelManifest},
};

use ndarray::Array3;
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::{fmt::Display, sync::Mutex};
use tracing::{debug, info};

pub const DEMUCS_T: usize = 343_980;
pub const DEMUCS_F: usize = 2048;
pub const DEMUCS_FRAMES: usize = 336;
pub const DEMUCS_NFFT: usize = 4096;
pub const DEMUCS_HOP: usize = 1024;

const INPUT_TIME: &str = "input";
const INPUT_SPEC: &str = "x";
// Time-domain sum of both branches, shaped [1, S, 2, T].
const OUTPUT_STEMS: &str = "add_67";

fn ort_err<E: Display>(context: &str) -> impl Fn(E) -> StemError + '_ {
    move |e| StemError::Inference(format!("{context}: {e}"))
}

fn shape_err(e: impl Display) -> StemError {
    StemError::Inference(e.to_string())
}

/// One ONNX Runtime session running HTDemucs on fixed-size stereo windows.
///
/// `run_window` takes `&self`; the session itself sits behind a mutex, so concurrent
/// callers are served one window at a time.
pub struct OnnxEngine {
    session: Mutex<Session>,
    manifest: ModelManifest,
}

impl OnnxEngine {
    pub fn load(handle: &ModelHandle, device: Device) -> Result<Self> {
        if handle.manifest.window != DEMUCS_T {
            return Err(StemError::Manifest(format!(
                "window {} is not supported (expected {})",
                handle.manifest.window, DEMUCS_T
            )));
        }
        if handle.manifest.stems.is_empty() {
            return Err(StemError::Manifest("manifest declares no stems".into()));
        }

        let providers = match device {
            Device::Auto => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
            Device::Cpu => vec![CPUExecutionProvider::default().build()],
        };

        let session = Session::builder()
            .map_err(ort_err("session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_err("optimization level"))?
            .with_execution_providers(providers)
            .map_err(ort_err("execution providers"))?
            .commit_from_file(&handle.local_path)
            .map_err(ort_err("loading model"))?;

        info!(
            model = %handle.manifest.name,
            version = %handle.manifest.version,
            ?device,
            stems = ?handle.manifest.stems,
            "loaded ONNX session"
        );

        Ok(Self {
            session: Mutex::new(session),
            manifest: handle.manifest.clone(),
        })
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    pub fn window(&self) -> usize {
        DEMUCS_T
    }

    /// Separates exactly one window. Returns `[S, 2, T]`, S being the manifest's stem count.
    pub fn run_window(&self, left: &[f32], right: &[f32]) -> Result<Array3<f32>> {
        check_window(left, right)?;
        let t = left.len();
        let stems = self.manifest.stems.len();

        // Time branch [1,2,T], planar
        let mut planar = Vec::with_capacity(2 * t);
        planar.extend_from_slice(left);
        planar.extend_from_slice(right);
        let time_value = Tensor::from_array((vec![1usize, 2, t], planar))
            .map_err(ort_err("time tensor"))?
            .into_dyn();

        // Spec branch [1,4,F,Frames]
        let (spec_cac, f_bins, frames) =
            stft_cac_stereo_centered(left, right, DEMUCS_NFFT, DEMUCS_HOP)?;
        if f_bins != DEMUCS_F || frames != DEMUCS_FRAMES {
            return Err(StemError::Inference(format!(
                "Spec dims mismatch: got F={f_bins},Frames={frames}, expected F={DEMUCS_F},Frames={DEMUCS_FRAMES}"
            )));
        }
        let spec_value = Tensor::from_array((vec![1usize, 4, f_bins, frames], spec_cac))
            .map_err(ort_err("spec tensor"))?
            .into_dyn();

        let mut session = self
            .session
            .lock()
            .map_err(|_| StemError::Inference("session mutex poisoned".into()))?;

        let outputs = session
            .run(vec![(INPUT_TIME, time_value), (INPUT_SPEC, spec_value)])
            .map_err(ort_err("run"))?;

        let out_td = outputs
            .into_iter()
            .find_map(|(name, v)| if name == OUTPUT_STEMS { Some(v) } else { None })
            .ok_or_else(|| StemError::Inference(format!("Model did not return '{OUTPUT_STEMS}'")))?;

        let (_shape, data) = out_td
            .try_extract_tensor::<f32>()
            .map_err(ort_err("extract stems"))?;
        if data.len() != stems * 2 * t {
            return Err(StemError::Inference(format!(
                "Unexpected {OUTPUT_STEMS} length {} (expected {})",
                data.len(),
                stems * 2 * t
            )));
        }
        debug!(stems, frames = t, "window separated");

        Array3::from_shape_vec((stems, 2, t), data.to_vec()).map_err(shape_err)
    }
}

fn check_window(left: &[f32], right: &[f32]) -> Result<()> {
    if left.len() != right.len() {
        return Err(StemError::Inference("L/R length mismatch".into()));
    }
    if left.len() != DEMUCS_T {
        return Err(StemError::Inference(format!(
            "Bad window length {} (expected {})",
            left.len(),
            DEMUCS_T
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_len_mismatch() {
        let err = check_window(&vec![0.0; DEMUCS_T], &vec![0.0; DEMUCS_T - 1]).unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn rejects_wrong_window_length() {
        let err = check_window(&[0.0; 1024], &[0.0; 1024]).unwrap_err();
        assert!(err.to_string().contains("343980"));
    }

    #[test]
    fn window_spectrogram_matches_model_dims() {
        let zeros = vec![0.0f32; DEMUCS_T];
        let (_spec, f_bins, frames) =
            stft_cac_stereo_centered(&zeros, &zeros, DEMUCS_NFFT, DEMUCS_HOP).unwrap();
        assert_eq!(f_bins, DEMUCS_F);
        assert_eq!(frames, DEMUCS_FRAMES);
    }
}
