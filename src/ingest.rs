//! Upload validation: extension gate and decode-based duration probing.

use std::fs::File;
use std::path::Path;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::ValidationError;

/// Accepted upload extensions, lowercase with leading dot.
pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &[
    ".aac", ".aiff", ".flac", ".m4a", ".mp3", ".mp4", ".ogg", ".opus", ".wav", ".webm",
];

/// True when the filename carries a supported audio extension.
pub fn is_supported_extension(filename: &str) -> bool {
    match Path::new(filename).extension() {
        Some(ext) => {
            let dotted = format!(".{}", ext.to_string_lossy().to_lowercase());
            SUPPORTED_AUDIO_EXTENSIONS.contains(&dotted.as_str())
        }
        None => false,
    }
}

/// Decode the container headers and measure duration in seconds. A probe
/// failure means the file is corrupt or mislabeled and the upload must be
/// rejected.
pub fn probe_duration(path: &Path) -> Result<f64, ValidationError> {
    let display = path.display().to_string();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if !is_supported_extension(&filename) {
        return Err(ValidationError::UnsupportedExtension(filename));
    }

    let file = File::open(path).map_err(|_| ValidationError::CorruptAudio(display.clone()))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(&ext.to_string_lossy());
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|_| ValidationError::CorruptAudio(display.clone()))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| ValidationError::CorruptAudio(display.clone()))?;
    let params = &track.codec_params;

    // Prefer header-declared duration; otherwise walk packets to the last
    // timestamp.
    if let (Some(time_base), Some(n_frames)) = (params.time_base, params.n_frames) {
        let time = time_base.calc_time(n_frames);
        let duration = time.seconds as f64 + time.frac;
        if duration > 0.0 {
            return Ok((duration * 100.0).round() / 100.0);
        }
    }

    let track_id = track.id;
    let time_base = params.time_base;
    let mut last_ts = 0u64;
    let mut saw_packet = false;
    while let Ok(packet) = format.next_packet() {
        if packet.track_id() == track_id {
            saw_packet = true;
            last_ts = packet.ts() + packet.dur();
        }
    }
    if !saw_packet {
        return Err(ValidationError::CorruptAudio(display));
    }
    let duration = match time_base {
        Some(tb) => {
            let time = tb.calc_time(last_ts);
            time.seconds as f64 + time.frac
        }
        None => return Err(ValidationError::CorruptAudio(display)),
    };
    Ok((duration * 100.0).round() / 100.0)
}
