use ndarray::{s, Array2, Array3, Axis};
use rand::Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::{
    core::{
        dsp::{resample, stereo_planes, transition_weights},
        engine::OnnxEngine,
    },
    error::Result,
    model::{model_manager::ensure_model, SeparationModel},
    types::{SeparationConfig, Stem, Waveform},
};

/// HTDemucs behind ONNX Runtime, applied to whole tracks.
///
/// Tracks are cut into overlapping model windows that are blended back together with
/// triangular weights. With `shifts > 1` each pass starts at a random offset of up to half
/// a second and the passes are averaged.
pub struct DemucsModel {
    engine: OnnxEngine,
    shifts: usize,
    overlap: f32,
}

impl DemucsModel {
    pub fn new(engine: OnnxEngine, shifts: usize, overlap: f32) -> Self {
        Self {
            engine,
            shifts,
            overlap: overlap.clamp(0.0, 0.9),
        }
    }

    pub fn load(config: &SeparationConfig) -> Result<Self> {
        let handle = ensure_model(&config.model_name, config.manifest_url_override.as_deref())?;
        let engine = OnnxEngine::load(&handle, config.device)?;
        Ok(Self::new(engine, config.shifts, config.overlap))
    }

    fn stride(&self) -> usize {
        ((self.engine.window() as f32) * (1.0 - self.overlap)).round().max(1.0) as usize
    }

    fn separate_planes(&self, left: &[f32], right: &[f32]) -> Result<Array3<f32>> {
        overlap_add(
            left,
            right,
            self.engine.window(),
            self.stride(),
            self.sources().len(),
            |l, r| self.engine.run_window(l, r),
        )
    }

    fn separate_shifted(&self, left: &[f32], right: &[f32], rate: u32) -> Result<Array3<f32>> {
        let max_shift = ((rate / 2) as usize).max(1);
        shifted_average(
            left,
            right,
            self.shifts,
            max_shift,
            self.sources().len(),
            &mut rand::thread_rng(),
            |l, r| self.separate_planes(l, r),
        )
    }
}

/// `[S, 2, n]` stems for a stereo signal of `n` frames.
///
/// `run_window` sees exactly `win` frames per call, the last window zero-padded, and must
/// return `[S, 2, win]`. Overlapping windows are blended with triangular weights.
fn overlap_add<F>(
    left: &[f32],
    right: &[f32],
    win: usize,
    stride: usize,
    stems: usize,
    mut run_window: F,
) -> Result<Array3<f32>>
where
    F: FnMut(&[f32], &[f32]) -> Result<Array3<f32>>,
{
    let n = left.len();
    let mut acc = Array3::<f32>::zeros((stems, 2, n));
    if n == 0 {
        return Ok(acc);
    }

    let weights = transition_weights(win);
    let mut weight_sum = vec![0f32; n];
    let mut l = vec![0f32; win];
    let mut r = vec![0f32; win];
    let stride = stride.max(1);
    let mut pos = 0usize;

    loop {
        let len = win.min(n - pos);
        l[..len].copy_from_slice(&left[pos..pos + len]);
        r[..len].copy_from_slice(&right[pos..pos + len]);
        l[len..].fill(0.0);
        r[len..].fill(0.0);

        let out = run_window(&l, &r)?;
        for i in 0..len {
            let w = weights[i];
            weight_sum[pos + i] += w;
            for st in 0..stems {
                acc[(st, 0, pos + i)] += out[(st, 0, i)] * w;
                acc[(st, 1, pos + i)] += out[(st, 1, i)] * w;
            }
        }
        debug!(offset = pos, frames = len, total = n, "separated window");

        if pos + win >= n {
            break;
        }
        pos += stride;
    }

    for (i, mut column) in acc.axis_iter_mut(Axis(2)).enumerate() {
        let w = weight_sum[i];
        if w > 0.0 {
            column.mapv_inplace(|x| x / w);
        }
    }
    Ok(acc)
}

/// Averages `shifts` passes of `separate`, each on the input delayed by a random amount
/// below `max_shift` frames.
fn shifted_average<R, F>(
    left: &[f32],
    right: &[f32],
    shifts: usize,
    max_shift: usize,
    stems: usize,
    rng: &mut R,
    mut separate: F,
) -> Result<Array3<f32>>
where
    R: Rng,
    F: FnMut(&[f32], &[f32]) -> Result<Array3<f32>>,
{
    let n = left.len();
    let shifts = shifts.max(1);
    let max_shift = max_shift.max(1);
    let pad = |x: &[f32]| {
        let mut v = vec![0f32; max_shift];
        v.extend_from_slice(x);
        v.extend(std::iter::repeat(0.0).take(max_shift));
        v
    };
    let (pl, pr) = (pad(left), pad(right));

    let mut sum = Array3::<f32>::zeros((stems, 2, n));
    for _ in 0..shifts {
        let offset = rng.gen_range(0..max_shift);
        let end = max_shift + n;
        let out = separate(&pl[offset..end], &pr[offset..end])?;
        let from = max_shift - offset;
        sum += &out.slice(s![.., .., from..from + n]);
    }
    Ok(sum / shifts as f32)
}

impl SeparationModel for DemucsModel {
    fn sources(&self) -> &[String] {
        &self.engine.manifest().stems
    }

    fn separate(&self, input: &Waveform) -> Result<Vec<Stem>> {
        let rate = self.engine.manifest().sample_rate;
        let at_model_rate = resample(input, rate)?;
        let (left, right) = stereo_planes(&at_model_rate);

        let stems = if self.shifts > 1 {
            self.separate_shifted(&left, &right, rate)?
        } else {
            self.separate_planes(&left, &right)?
        };

        stems
            .outer_iter()
            .map(|st| st.to_owned())
            .collect::<Vec<Array2<f32>>>()
            .into_par_iter()
            .zip(self.sources().par_iter())
            .map(|(samples, name)| {
                let mut waveform = resample(&Waveform::new(samples, rate), input.sample_rate)?;
                waveform.resize_frames(input.frames());
                Ok(Stem {
                    name: name.clone(),
                    waveform,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    const STEMS: usize = 2;

    /// Every stem is a copy of the window it was given.
    fn identity(l: &[f32], r: &[f32]) -> Result<Array3<f32>> {
        let win = l.len();
        Ok(Array3::from_shape_fn((STEMS, 2, win), |(_, c, i)| if c == 0 { l[i] } else { r[i] }))
    }

    fn ramp(n: usize, scale: f32) -> Vec<f32> {
        (0..n).map(|i| ((i as f32) * 0.37).sin() * scale).collect()
    }

    fn assert_stems_match(out: &Array3<f32>, left: &[f32], right: &[f32]) {
        assert_eq!(out.dim(), (STEMS, 2, left.len()));
        for st in 0..STEMS {
            for i in 0..left.len() {
                assert_abs_diff_eq!(out[(st, 0, i)], left[i], epsilon = 1e-5);
                assert_abs_diff_eq!(out[(st, 1, i)], right[i], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn overlapping_windows_reassemble_the_input() {
        let (left, right) = (ramp(50, 0.8), ramp(50, -0.5));
        let mut calls = 0;
        let out = overlap_add(&left, &right, 16, 12, STEMS, |l, r| {
            calls += 1;
            assert_eq!(l.len(), 16);
            identity(l, r)
        })
        .unwrap();
        assert_eq!(calls, 4);
        assert_stems_match(&out, &left, &right);
    }

    #[test]
    fn short_track_is_not_padded() {
        let (left, right) = (ramp(5, 1.0), ramp(5, 0.3));
        let out = overlap_add(&left, &right, 16, 12, STEMS, identity).unwrap();
        assert_stems_match(&out, &left, &right);
    }

    #[test]
    fn empty_track_runs_no_window() {
        let out = overlap_add(&[], &[], 16, 12, STEMS, |_, _| -> Result<Array3<f32>> {
            panic!("no window expected")
        })
        .unwrap();
        assert_eq!(out.dim(), (STEMS, 2, 0));
    }

    #[test]
    fn shifted_passes_stay_aligned() {
        let (left, right) = (ramp(40, 0.9), ramp(40, 0.2));
        let mut rng = StdRng::seed_from_u64(3);
        let mut passes = 0;
        let out = shifted_average(&left, &right, 3, 7, STEMS, &mut rng, |l, r| {
            passes += 1;
            assert!(l.len() > 40 && l.len() <= 40 + 7);
            overlap_add(l, r, 16, 12, STEMS, identity)
        })
        .unwrap();
        assert_eq!(passes, 3);
        assert_stems_match(&out, &left, &right);
    }
}
