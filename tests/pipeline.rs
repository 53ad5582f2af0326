use std::{path::Path, sync::Arc};

use approx::assert_abs_diff_eq;
use stem_splitter_web::{
    load_audio, process, ClipMode, DummyModel, ModelGateway, OutputFormat, ProcessOptions, StemError,
    TrackOutcome,
};
use tempfile::tempdir;

const RATE: u32 = 8_000;

fn write_wav(path: &Path, frames: usize, amplitude: f32) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let v = (i as f32 * 0.03).sin() * amplitude;
        writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
        writer.write_sample((-v * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn dummy_gateway() -> ModelGateway {
    ModelGateway::new(Arc::new(DummyModel::default()))
}

fn wav_options(max_duration_secs: f64) -> ProcessOptions {
    ProcessOptions {
        max_duration_secs,
        output: OutputFormat::Wav,
        clip_mode: ClipMode::Rescale,
    }
}

#[test]
fn writes_one_file_per_source() {
    let dir = tempdir().unwrap();
    let track = dir.path().join("song.wav");
    write_wav(&track, 4_000, 0.5);
    let out = dir.path().join("out");

    let reports = process(&dummy_gateway(), &[&track], &out, &wav_options(170.0)).unwrap();
    assert_eq!(reports.len(), 1);
    let TrackOutcome::Separated { stems, .. } = &reports[0].outcome else {
        panic!("expected separation, got {:?}", reports[0].outcome);
    };

    let names: Vec<&str> = stems.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["vocals", "drums", "bass", "other"]);
    for stem in stems {
        assert_eq!(stem.path, out.join(format!("song_{}.wav", stem.name)));
        let w = load_audio(&stem.path).unwrap();
        assert_eq!(w.frames(), 4_000);
        assert_eq!(w.sample_rate, RATE);
    }
}

#[test]
fn long_tracks_are_cut_to_the_duration_cap() {
    let dir = tempdir().unwrap();
    let track = dir.path().join("long.wav");
    write_wav(&track, 3 * RATE as usize, 0.5);
    let out = dir.path().join("out");

    process(&dummy_gateway(), &[&track], &out, &wav_options(1.0)).unwrap();
    let vocals = load_audio(out.join("long_vocals.wav")).unwrap();
    assert_eq!(vocals.frames(), RATE as usize);
}

#[test]
fn stems_sum_back_to_the_mixture() {
    let dir = tempdir().unwrap();
    let track = dir.path().join("mix.wav");
    write_wav(&track, 2_000, 0.4);
    let out = dir.path().join("out");

    process(&dummy_gateway(), &[&track], &out, &wav_options(170.0)).unwrap();
    let mix = load_audio(&track).unwrap();
    let mut sum = ndarray::Array2::<f32>::zeros(mix.samples.dim());
    for name in ["vocals", "drums", "bass", "other"] {
        sum += &load_audio(out.join(format!("mix_{name}.wav"))).unwrap().samples;
    }
    for (a, b) in sum.iter().zip(mix.samples.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
    }
}

#[test]
fn silent_input_still_yields_every_stem() {
    let dir = tempdir().unwrap();
    let track = dir.path().join("quiet.wav");
    write_wav(&track, 1_000, 0.0);
    let out = dir.path().join("out");

    let reports = process(&dummy_gateway(), &[&track], &out, &wav_options(170.0)).unwrap();
    assert!(reports[0].is_separated());
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 4);
}

#[test]
fn unreadable_track_is_skipped_and_batch_continues() {
    let dir = tempdir().unwrap();
    let broken = dir.path().join("broken.mp3");
    std::fs::write(&broken, "not audio, just some words on a line\n".repeat(50)).unwrap();
    let good = dir.path().join("good.wav");
    write_wav(&good, 500, 0.5);
    let out = dir.path().join("out");

    let reports = process(&dummy_gateway(), &[&broken, &good], &out, &wav_options(170.0)).unwrap();
    assert!(matches!(reports[0].outcome, TrackOutcome::LoadFailed(_)));
    assert!(reports[1].is_separated());
    assert!(!out.join("broken_vocals.wav").exists());
    assert!(out.join("good_vocals.wav").exists());
}

#[test]
fn degraded_gateway_fails_the_batch() {
    let dir = tempdir().unwrap();
    let track = dir.path().join("song.wav");
    write_wav(&track, 500, 0.5);
    let out = dir.path().join("out");

    let gateway = ModelGateway::unavailable();
    assert!(!gateway.is_available());
    assert!(gateway.sources().is_empty());

    let err = process(&gateway, &[&track], &out, &wav_options(170.0)).unwrap_err();
    assert!(matches!(err, StemError::ModelUnavailable));
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn failed_loader_leaves_gateway_degraded() {
    let gateway = ModelGateway::from_loader(|| Err(StemError::Manifest("offline".into())));
    assert!(!gateway.is_available());
}

#[test]
fn output_is_deterministic() {
    let dir = tempdir().unwrap();
    let track = dir.path().join("song.wav");
    write_wav(&track, 1_500, 0.7);

    let a = dir.path().join("a");
    let b = dir.path().join("b");
    process(&dummy_gateway(), &[&track], &a, &wav_options(170.0)).unwrap();
    process(&dummy_gateway(), &[&track], &b, &wav_options(170.0)).unwrap();
    for name in ["vocals", "drums", "bass", "other"] {
        let file = format!("song_{name}.wav");
        assert_eq!(std::fs::read(a.join(&file)).unwrap(), std::fs::read(b.join(&file)).unwrap());
    }
}

#[test]
fn zero_length_track_yields_empty_stems() {
    let dir = tempdir().unwrap();
    let track = dir.path().join("blank.wav");
    write_wav(&track, 0, 0.5);
    let out = dir.path().join("out");

    let reports = process(&dummy_gateway(), &[&track], &out, &wav_options(170.0)).unwrap();
    let TrackOutcome::Separated { stems, .. } = &reports[0].outcome else {
        panic!("expected separation");
    };
    assert_eq!(stems.len(), 4);
    for stem in stems {
        assert_eq!(load_audio(&stem.path).unwrap().frames(), 0);
    }
}

#[test]
fn output_names_follow_the_model_vocabulary() {
    let dir = tempdir().unwrap();
    let track = dir.path().join("duet.wav");
    write_wav(&track, 300, 0.5);
    let out = dir.path().join("out");

    let gateway = ModelGateway::new(Arc::new(DummyModel::new(vec!["vocals".into(), "accompaniment".into()])));
    assert_eq!(gateway.sources(), ["vocals", "accompaniment"]);
    process(&gateway, &[&track], &out, &wav_options(170.0)).unwrap();

    let mut names: Vec<String> = std::fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["duet_accompaniment.wav", "duet_vocals.wav"]);
}
