//! Batch separation: load, clip, separate, write.

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{
    core::audio::{load_audio, write_audio},
    error::Result,
    io::paths::{base_name, ensure_dir},
    model::gateway::ModelGateway,
    types::{max_frames, ClipMode, OutputFormat, SeparationConfig},
};

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessOptions {
    /// Longest stretch of a track that is separated; everything after it is dropped.
    pub max_duration_secs: f64,
    pub output: OutputFormat,
    pub clip_mode: ClipMode,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::from(&SeparationConfig::default())
    }
}

impl From<&SeparationConfig> for ProcessOptions {
    fn from(c: &SeparationConfig) -> Self {
        Self {
            max_duration_secs: c.max_duration_secs,
            output: c.output.clone(),
            clip_mode: c.clip_mode,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SavedStem {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub enum TrackOutcome {
    Separated {
        stems: Vec<SavedStem>,
        elapsed: Duration,
    },
    /// The track could not be decoded and was skipped.
    LoadFailed(String),
}

#[derive(Clone, Debug)]
pub struct TrackReport {
    pub track: PathBuf,
    pub outcome: TrackOutcome,
}

impl TrackReport {
    pub fn is_separated(&self) -> bool {
        matches!(self.outcome, TrackOutcome::Separated { .. })
    }
}

/// `{output_dir}/{track basename}_{source}.{ext}`
pub fn output_path(output_dir: &Path, track: &Path, source: &str, format: &OutputFormat) -> PathBuf {
    output_dir.join(format!(
        "{}_{}.{}",
        base_name(track, "output"),
        source,
        format.extension()
    ))
}

/// Separates every track into `output_dir`.
///
/// A track that fails to load is reported as [`TrackOutcome::LoadFailed`] and the batch moves
/// on. Separation and encoding errors abort the batch and are returned to the caller.
pub fn process<P: AsRef<Path>>(
    gateway: &ModelGateway,
    tracks: &[P],
    output_dir: &Path,
    opts: &ProcessOptions,
) -> Result<Vec<TrackReport>> {
    ensure_dir(output_dir)?;

    let mut reports = Vec::with_capacity(tracks.len());
    for track in tracks {
        let track = track.as_ref();
        let outcome = match load_audio(track) {
            Ok(mut wav) => {
                let cap = max_frames(opts.max_duration_secs, wav.sample_rate);
                wav.truncate(cap);

                let started = Instant::now();
                let stems = gateway.separate(&wav)?;
                let elapsed = started.elapsed();
                info!(
                    track = %track.display(),
                    seconds = %format!("{:.2}", elapsed.as_secs_f64()),
                    "time taken to process track"
                );

                let mut saved = Vec::with_capacity(stems.len());
                for mut stem in stems {
                    stem.waveform.truncate(cap);
                    let path = output_path(output_dir, track, &stem.name, &opts.output);
                    write_audio(&path, &stem.waveform, &opts.output, opts.clip_mode)?;
                    info!(stem = %stem.name, path = %path.display(), "separated stem saved");
                    saved.push(SavedStem {
                        name: stem.name,
                        path,
                    });
                }
                TrackOutcome::Separated {
                    stems: saved,
                    elapsed,
                }
            }
            Err(e) => {
                warn!(track = %track.display(), error = %e, "skipping track");
                TrackOutcome::LoadFailed(e.to_string())
            }
        };
        reports.push(TrackReport {
            track: track.to_path_buf(),
            outcome,
        });
    }
    Ok(reports)
}
