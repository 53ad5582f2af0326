use std::{
    fs::File,
    io::{self, Cursor, Write},
    path::Path,
};

use anyhow::{bail, Context};
use hound::WavWriter;
use mp3lame_encoder::{Bitrate, Builder, DualPcm, FlushNoGap, Quality};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{
    core::dsp::stereo_planes,
    error::{Result, StemError},
    types::{ClipMode, OutputFormat, Waveform},
};

/// Decodes the file at `path` into a waveform. Never returns partial audio: an unreadable
/// file, an unknown format or a stream with no decodable packets is an error.
pub fn load_audio<P: AsRef<Path>>(path: P) -> Result<Waveform> {
    let path = path.as_ref();
    decode_file(path).map_err(|e| StemError::AudioLoad {
        path: path.display().to_string(),
        reason: format!("{e:#}"),
    })
}

fn decode_file(path: &Path) -> anyhow::Result<Waveform> {
    let file = File::open(path).with_context(|| format!("Failed to open audio file: {:?}", path))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("unsupported or unrecognised audio format")?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No supported audio track found")?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("unsupported codec")?;

    let mut samples: Vec<f32> = Vec::new();
    let mut bad_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("failed to read audio stream"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                bad_packets += 1;
                warn!(path = %path.display(), ts = packet.ts(), "skipping undecodable packet: {msg}");
            }
            Err(e) => return Err(e).context("failed to decode audio"),
        }
    }

    if samples.is_empty() && bad_packets > 0 {
        bail!("none of the {bad_packets} audio packets could be decoded");
    }
    if sample_rate == 0 || channels == 0 {
        bail!("stream does not declare a sample rate and channel layout");
    }

    let waveform = Waveform::from_interleaved(&samples, channels, sample_rate)?;
    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        frames = waveform.frames(),
        "read audio"
    );
    Ok(waveform)
}

/// Samples ready for integer conversion, frame-interleaved.
fn clipped_interleaved(w: &Waveform, clip: ClipMode) -> Vec<f32> {
    let mut samples = w.to_interleaved();
    match clip {
        ClipMode::Rescale => {
            let scale = (1.01 * w.peak()).max(1.0);
            if scale > 1.0 {
                samples.iter_mut().for_each(|s| *s /= scale);
            }
        }
        ClipMode::Clamp => samples.iter_mut().for_each(|s| *s = s.clamp(-0.99, 0.99)),
        ClipMode::None => {}
    }
    samples
}

fn to_i16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn lame_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        0..=111 => Bitrate::Kbps96,
        112..=127 => Bitrate::Kbps112,
        128..=159 => Bitrate::Kbps128,
        160..=191 => Bitrate::Kbps160,
        192..=223 => Bitrate::Kbps192,
        224..=255 => Bitrate::Kbps224,
        256..=319 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

fn encode_wav(w: &Waveform, clip: ClipMode) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: w.channels() as u16,
        sample_rate: w.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes = Vec::new();
    let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)?;
    for sample in clipped_interleaved(w, clip) {
        writer.write_sample(to_i16(sample))?;
    }
    writer.finalize()?;
    Ok(bytes)
}

fn encode_mp3(w: &Waveform, bitrate_kbps: u32, clip: ClipMode) -> Result<Vec<u8>> {
    let lame_err = |what: &str, e: &dyn std::fmt::Debug| StemError::Encode(format!("LAME {what} failed: {e:?}"));

    let mut builder = Builder::new().ok_or_else(|| StemError::Encode("LAME encoder init failed".into()))?;
    builder.set_num_channels(2).map_err(|e| lame_err("set channels", &e))?;
    builder
        .set_sample_rate(w.sample_rate)
        .map_err(|e| lame_err("set sample rate", &e))?;
    builder
        .set_brate(lame_bitrate(bitrate_kbps))
        .map_err(|e| lame_err("set bitrate", &e))?;
    builder
        .set_quality(Quality::Best)
        .map_err(|e| lame_err("set quality", &e))?;
    let mut encoder = builder.build().map_err(|e| lame_err("build", &e))?;

    // LAME takes exactly two planes; mono is duplicated by the stereo split.
    let clipped = Waveform::from_interleaved(&clipped_interleaved(w, clip), w.channels().max(1), w.sample_rate)?;
    let (left, right) = stereo_planes(&clipped);
    let left: Vec<i16> = left.into_iter().map(to_i16).collect();
    let right: Vec<i16> = right.into_iter().map(to_i16).collect();

    let mut out: Vec<u8> = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(left.len()));
    let encoded = encoder
        .encode(
            DualPcm {
                left: &left,
                right: &right,
            },
            out.spare_capacity_mut(),
        )
        .map_err(|e| lame_err("encode", &e))?;
    // SAFETY: the encoder initialised `encoded` bytes of spare capacity.
    unsafe {
        out.set_len(encoded);
    }

    out.reserve(7200);
    let flushed = encoder
        .flush::<FlushNoGap>(out.spare_capacity_mut())
        .map_err(|e| lame_err("flush", &e))?;
    // SAFETY: as above, for the flushed tail.
    unsafe {
        out.set_len(out.len() + flushed);
    }

    Ok(out)
}

/// Encodes `w` in memory, without touching the filesystem.
pub fn encode_audio(w: &Waveform, format: &OutputFormat, clip: ClipMode) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Mp3 { bitrate_kbps } => encode_mp3(w, *bitrate_kbps, clip),
        OutputFormat::Wav => encode_wav(w, clip),
    }
}

/// Encodes `w` and moves it into place at `path`, so readers never observe a half-written file.
pub fn write_audio(path: &Path, w: &Waveform, format: &OutputFormat, clip: ClipMode) -> Result<()> {
    let bytes = encode_audio(w, format, clip)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(path).map_err(|e| StemError::from(e.error))?;
    Ok(())
}
