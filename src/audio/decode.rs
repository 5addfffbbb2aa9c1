use anyhow::{Context, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Mono signal at the file's native sample rate.
#[derive(Debug, Clone)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

struct OpenTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    frames_hint: Option<u64>,
}

fn open_track(path: &Path) -> Result<OpenTrack> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(&ext.to_ascii_lowercase());
    }

    let format = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("Unrecognised audio format: {}", path.display()))?
        .format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio tracks found")?;
    let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;
    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    Ok(OpenTrack {
        track_id: track.id,
        frames_hint: track.codec_params.n_frames,
        format,
        decoder,
        sample_rate,
    })
}

/// Decode the first audio track of `path` and average its channels to mono.
///
/// Corrupt packets are skipped; decoding stops at end of stream or when the
/// stream asks for a decoder reset.
pub fn decode_audio(path: &Path) -> Result<AudioData> {
    let OpenTrack {
        mut format,
        mut decoder,
        track_id,
        sample_rate,
        frames_hint,
    } = open_track(path)?;

    let mut mono: Vec<f32> = Vec::with_capacity(frames_hint.unwrap_or(0).min(1 << 26) as usize);
    let mut buffer: Option<SampleBuffer<f32>> = None;
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e).context("Failed to read audio packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e).context("Failed to decode audio packet"),
        };

        let spec = *decoded.spec();
        let frames = decoded.capacity() as u64;
        let channels = spec.channels.count().max(1);
        if buffer.as_ref().is_some_and(|b| (b.capacity() as u64) < frames * channels as u64) {
            buffer = None;
        }
        let buf = buffer.get_or_insert_with(|| SampleBuffer::<f32>::new(frames, spec));
        buf.copy_interleaved_ref(decoded);

        if channels == 1 {
            mono.extend_from_slice(buf.samples());
        } else {
            let scale = 1.0 / channels as f32;
            mono.extend(buf.samples().chunks_exact(channels).map(|frame| frame.iter().sum::<f32>() * scale));
        }
    }

    if skipped > 0 {
        log::warn!("{}: skipped {} corrupt packets", path.display(), skipped);
    }
    let audio = AudioData {
        samples: mono,
        sample_rate,
    };
    log::debug!(
        "Decoded {}: {} samples, {}Hz, {:.1}s",
        path.display(),
        audio.samples.len(),
        sample_rate,
        audio.duration_secs()
    );
    Ok(audio)
}
