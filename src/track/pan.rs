use rand::Rng;
use std::time::Duration;

use super::clip::uniform_ms;
use crate::store::TrackTuning;

/// Slow random drift of a track's stereo position.
#[derive(Debug, Clone)]
pub struct Panner {
    current: f64,
    target: f64,
    steps_left: u64,
    min_pos: f64,
    max_pos: f64,
    num_steps: u32,
    min_duration_ms: u64,
    max_duration_ms: u64,
    interval_ms: u64,
}

impl Panner {
    pub fn new(tuning: &TrackTuning, num_steps: u32, interval: Duration) -> Self {
        Self {
            current: 0.0,
            target: 0.0,
            steps_left: 0,
            min_pos: tuning.min_pan_pos,
            max_pos: tuning.max_pan_pos,
            num_steps: num_steps.max(1),
            min_duration_ms: tuning.min_pan_duration_ms,
            max_duration_ms: tuning.max_pan_duration_ms,
            interval_ms: (interval.as_millis() as u64).max(1),
        }
    }

    pub fn position(&self) -> f64 {
        self.current
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Advance one tick. Returns the new position when it moved.
    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<f64> {
        if (self.current - self.target).abs() < f64::EPSILON || self.steps_left == 0 {
            self.retarget(rng);
            return None;
        }
        let step = (self.target - self.current) / self.steps_left as f64;
        self.current += step;
        self.steps_left -= 1;
        Some(self.current)
    }

    fn retarget<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let step_size = (self.max_pos - self.min_pos) / self.num_steps as f64;
        let k = rng.gen_range(0..=self.num_steps);
        self.target = self.min_pos + k as f64 * step_size;
        let duration = uniform_ms(rng, self.min_duration_ms, self.max_duration_ms);
        self.steps_left = duration / self.interval_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tuning() -> TrackTuning {
        TrackTuning {
            id: 1,
            project_id: 1,
            min_volume: 1.0,
            max_volume: 1.0,
            min_duration_ms: 1000,
            max_duration_ms: 1000,
            min_deadair_ms: 0,
            max_deadair_ms: 0,
            min_fadein_ms: 0,
            max_fadein_ms: 0,
            min_fadeout_ms: 0,
            max_fadeout_ms: 0,
            min_pan_pos: -0.5,
            max_pan_pos: 0.5,
            min_pan_duration_ms: 1000,
            max_pan_duration_ms: 1000,
            repeat_recordings: false,
        }
    }

    #[test]
    fn test_pan_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut panner = Panner::new(&tuning(), 200, Duration::from_millis(100));
        for _ in 0..5000 {
            panner.tick(&mut rng);
            assert!(panner.position() >= -0.5 - 1e-9 && panner.position() <= 0.5 + 1e-9);
            assert!(panner.target() >= -0.5 - 1e-9 && panner.target() <= 0.5 + 1e-9);
        }
    }

    #[test]
    fn test_pan_reaches_target_within_steps() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut panner = Panner::new(&tuning(), 200, Duration::from_millis(100));
        // First tick only picks a target: 1000 ms / 100 ms = 10 steps.
        assert_eq!(panner.tick(&mut rng), None);
        let target = panner.target();
        let mut moved = 0;
        while panner.tick(&mut rng).is_some() {
            moved += 1;
        }
        assert!(moved <= 10);
        assert!((panner.position() - target).abs() < 1e-9);
    }
}
