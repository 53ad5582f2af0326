use ndarray::Array2;
use num_complex::Complex32;
use once_cell::sync::Lazy;
use rubato::{FftFixedIn, Resampler};
use rustfft::{num_traits::Zero, FftPlanner};
use std::sync::Mutex;

use crate::{
    error::{Result, StemError},
    types::Waveform,
};

// Plans are cached inside the planner, so every window after the first reuses them.
static PLANNER: Lazy<Mutex<FftPlanner<f32>>> = Lazy::new(|| Mutex::new(FftPlanner::new()));

const RESAMPLE_CHUNK: usize = 1024;

pub fn hann_window(n_fft: usize) -> Vec<f32> {
    if n_fft <= 1 {
        return vec![1.0];
    }
    let denom = (n_fft - 1) as f32;
    (0..n_fft)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * (i as f32) / denom).cos())
        .collect()
}

/// Left/right planes for a model that only takes stereo.
/// Mono is duplicated; anything past the second channel is ignored.
pub fn stereo_planes(w: &Waveform) -> (Vec<f32>, Vec<f32>) {
    match w.channels() {
        0 => (Vec::new(), Vec::new()),
        1 => {
            let mono = w.samples.row(0).to_vec();
            (mono.clone(), mono)
        }
        _ => (w.samples.row(0).to_vec(), w.samples.row(1).to_vec()),
    }
}

/// Triangular cross-fade weights for overlapping inference windows, peaking at 1 mid-window.
/// Every weight is strictly positive.
pub fn transition_weights(len: usize) -> Vec<f32> {
    let half = len / 2;
    let rising = (1..=half).map(|i| i as f32);
    let falling = (1..=len - half).rev().map(|i| i as f32);
    let w: Vec<f32> = rising.chain(falling).collect();
    let max = w.iter().cloned().fold(0.0f32, f32::max).max(1.0);
    w.into_iter().map(|x| x / max).collect()
}

/// Compute complex-as-channels spectrogram for stereo with center padding.
/// Layout is [4, F, Frames] flattened, channel order L.re, L.im, R.re, R.im, with
/// F = n_fft / 2 (the Nyquist bin is dropped) and Frames = 1 + len / hop.
pub fn stft_cac_stereo_centered(
    left: &[f32],
    right: &[f32],
    n_fft: usize,
    hop: usize,
) -> Result<(Vec<f32>, usize, usize)> {
    if left.len() != right.len() {
        return Err(anyhow::anyhow!("L/R length mismatch").into());
    }
    if n_fft < 2 || hop == 0 {
        return Err(anyhow::anyhow!("bad STFT parameters n_fft={n_fft} hop={hop}").into());
    }

    let t = left.len();
    let pad = n_fft / 2;

    let padded_len = pad + t + pad;
    let mut l_sig = vec![0.0f32; padded_len];
    let mut r_sig = vec![0.0f32; padded_len];
    l_sig[pad..pad + t].copy_from_slice(left);
    r_sig[pad..pad + t].copy_from_slice(right);

    let frames = 1 + (t / hop);
    let f_bins = n_fft / 2;

    let fft = PLANNER
        .lock()
        .map_err(|_| anyhow::anyhow!("FFT planner poisoned"))?
        .plan_fft_forward(n_fft);
    let window = hann_window(n_fft);

    let mut out = vec![0.0f32; 4 * f_bins * frames];
    let mut buf_l = vec![Complex32::zero(); n_fft];
    let mut buf_r = vec![Complex32::zero(); n_fft];
    let plane = f_bins * frames;

    for fr in 0..frames {
        let start = fr * hop;
        let li = &l_sig[start..start + n_fft];
        let ri = &r_sig[start..start + n_fft];

        for i in 0..n_fft {
            let w = window[i];
            buf_l[i] = Complex32::new(li[i] * w, 0.0);
            buf_r[i] = Complex32::new(ri[i] * w, 0.0);
        }

        fft.process(&mut buf_l);
        fft.process(&mut buf_r);

        for fi in 0..f_bins {
            let at = fi * frames + fr;
            out[at] = buf_l[fi].re;
            out[plane + at] = buf_l[fi].im;
            out[2 * plane + at] = buf_r[fi].re;
            out[3 * plane + at] = buf_r[fi].im;
        }
    }

    Ok((out, f_bins, frames))
}

/// Band-limited resampling of every channel to `target_rate`.
/// The output holds `frames * target / source` frames, rounded down, aligned with the input:
/// the resampler's own delay is trimmed from the front.
pub fn resample(w: &Waveform, target_rate: u32) -> Result<Waveform> {
    if w.sample_rate == target_rate {
        return Ok(w.clone());
    }
    let channels = w.channels();
    let frames = w.frames();
    let expected = (frames as u64 * target_rate as u64 / w.sample_rate.max(1) as u64) as usize;
    if frames == 0 || channels == 0 {
        return Ok(Waveform::silent(channels, 0, target_rate));
    }

    let mut resampler = FftFixedIn::<f32>::new(
        w.sample_rate as usize,
        target_rate as usize,
        RESAMPLE_CHUNK,
        2,
        channels,
    )
    .map_err(|e| StemError::Anyhow(anyhow::anyhow!("resampler setup failed: {e}")))?;

    let delay = resampler.output_delay();
    let wanted = delay + expected;
    // Input past this point is zero padding; running out of it means the resampler stalled.
    let input_limit = (wanted as u64 * w.sample_rate as u64 / target_rate as u64) as usize
        + 4 * resampler.input_frames_max();

    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted + RESAMPLE_CHUNK); channels];
    let mut chunk: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut pos = 0usize;

    while out[0].len() < wanted {
        if pos > input_limit {
            return Err(StemError::Anyhow(anyhow::anyhow!(
                "resampler produced {} of {wanted} frames",
                out[0].len()
            )));
        }
        let need = resampler.input_frames_next();
        for (c, buf) in chunk.iter_mut().enumerate() {
            buf.clear();
            buf.extend((pos..pos + need).map(|i| if i < frames { w.samples[(c, i)] } else { 0.0 }));
        }
        pos += need;

        let produced = resampler
            .process(&chunk, None)
            .map_err(|e| StemError::Anyhow(anyhow::anyhow!("resampling failed: {e}")))?;
        for (dst, src) in out.iter_mut().zip(produced) {
            dst.extend(src);
        }
    }

    let mut flat = Vec::with_capacity(channels * expected);
    for ch in out {
        flat.extend_from_slice(&ch[delay..wanted]);
    }
    Ok(Waveform::new(
        Array2::from_shape_vec((channels, expected), flat)?,
        target_rate,
    ))
}
