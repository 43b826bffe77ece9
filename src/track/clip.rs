use rand::Rng;
use std::time::Duration;

use crate::pipeline::EnvelopePoint;
use crate::store::{Recording, TrackTuning};

/// Shortest clip a track will play, in milliseconds.
pub const MIN_CLIP_MS: u64 = 1000;

/// Randomized playback parameters for one clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipPlan {
    /// Offset into the media file.
    pub start: Duration,
    pub duration: Duration,
    pub fade_in: Duration,
    pub fade_out: Duration,
    pub volume: f64,
}

impl ClipPlan {
    pub fn choose<R: Rng + ?Sized>(tuning: &TrackTuning, rec: &Recording, rng: &mut R) -> Self {
        let length = rec.duration_ms;
        let duration = length.min(uniform_ms(
            rng,
            tuning.min_duration_ms.max(MIN_CLIP_MS),
            tuning.max_duration_ms.max(MIN_CLIP_MS),
        ));
        let start = uniform_ms(rng, 0, length.saturating_sub(duration));

        let mut fade_in = uniform_ms(rng, tuning.min_fadein_ms, tuning.max_fadein_ms);
        let mut fade_out = uniform_ms(rng, tuning.min_fadeout_ms, tuning.max_fadeout_ms);
        if fade_in + fade_out > duration {
            fade_in = duration / 2;
            fade_out = duration / 2;
        }

        let volume = rec.volume * uniform_f64(rng, tuning.min_volume, tuning.max_volume);

        Self {
            start: Duration::from_millis(start),
            duration: Duration::from_millis(duration),
            fade_in: Duration::from_millis(fade_in),
            fade_out: Duration::from_millis(fade_out),
            volume,
        }
    }

    /// Linear volume envelope in file time: silent up to `start`, fade in,
    /// hold, fade out to silence at `start + duration`.
    pub fn envelope(&self) -> Vec<EnvelopePoint> {
        let end = self.start + self.duration;
        vec![
            EnvelopePoint::new(Duration::ZERO, 0.0),
            EnvelopePoint::new(self.start, 0.0),
            EnvelopePoint::new(self.start + self.fade_in, self.volume),
            EnvelopePoint::new(end - self.fade_out, self.volume),
            EnvelopePoint::new(end, 0.0),
        ]
    }
}

/// Uniform pick in `[a, b]`, in either order.
pub fn uniform_ms<R: Rng + ?Sized>(rng: &mut R, a: u64, b: u64) -> u64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    rng.gen_range(lo..=hi)
}

pub fn uniform_f64<R: Rng + ?Sized>(rng: &mut R, a: f64, b: f64) -> f64 {
    a + rng.gen::<f64>() * (b - a)
}
