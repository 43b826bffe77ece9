use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Read the playable length of a media file from its container headers.
pub fn probe_duration(path: impl AsRef<Path>) -> Result<Duration> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open media {}", path.display()))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("Unsupported media format: {}", path.display()))?;

    let track = probed
        .format
        .default_track()
        .context("Media has no audio track")?;
    let params = &track.codec_params;
    let frames = params.n_frames.context("Media does not report its length")?;

    let ms = match (params.time_base, params.sample_rate) {
        (Some(tb), _) => {
            let t = tb.calc_time(frames);
            (t.seconds as f64 * 1000.0 + t.frac * 1000.0).round() as u64
        }
        (None, Some(rate)) if rate > 0 => frames * 1000 / rate as u64,
        _ => anyhow::bail!("Media has no time base: {}", path.display()),
    };

    debug!("Probed {}: {} ms", path.display(), ms);
    Ok(Duration::from_millis(ms))
}
