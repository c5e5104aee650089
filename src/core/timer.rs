//! Frame pacing for interactive playback.
//!
//! `wait_until_next_frame_is_due` sleeps until one frame period has elapsed
//! since the previous presented frame. The actual rate is averaged over the
//! last few frame intervals.

use log::trace;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Frame intervals kept for the actual-rate average.
const WINDOW: usize = 30;

#[derive(Debug)]
pub struct PlaybackTimer {
    desired_fps: f64,
    last_frame_time: Option<Instant>,
    intervals: VecDeque<Duration>,
}

impl PlaybackTimer {
    pub fn new(desired_fps: f64) -> Self {
        Self {
            desired_fps: sanitize(desired_fps),
            last_frame_time: None,
            intervals: VecDeque::with_capacity(WINDOW),
        }
    }

    pub fn desired_fps(&self) -> f64 {
        self.desired_fps
    }

    pub fn set_desired_fps(&mut self, fps: f64) {
        self.desired_fps = sanitize(fps);
        self.intervals.clear();
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.desired_fps)
    }

    /// Block until the next frame is due, then stamp it.
    pub fn wait_until_next_frame_is_due(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_frame_time {
            let due = last + self.frame_period();
            if due > now {
                std::thread::sleep(due - now);
            }
            let stamped = Instant::now();
            self.push_interval(stamped.duration_since(last));
            self.last_frame_time = Some(stamped);
            trace!("Frame due after {:?}", stamped.duration_since(last));
        } else {
            self.last_frame_time = Some(now);
        }
    }

    fn push_interval(&mut self, d: Duration) {
        if self.intervals.len() == WINDOW {
            self.intervals.pop_front();
        }
        self.intervals.push_back(d);
    }

    /// Average measured rate, 0 until two frames were paced.
    pub fn actual_frame_rate(&self) -> f64 {
        if self.intervals.is_empty() {
            return 0.0;
        }
        let total: Duration = self.intervals.iter().sum();
        let secs = total.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.intervals.len() as f64 / secs
        }
    }

    /// Forget the last stamp so the next frame is presented immediately.
    pub fn reset(&mut self) {
        self.last_frame_time = None;
        self.intervals.clear();
    }
}

fn sanitize(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 { fps } else { 24.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_does_not_wait() {
        let mut t = PlaybackTimer::new(1.0);
        let start = Instant::now();
        t.wait_until_next_frame_is_due();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(t.actual_frame_rate(), 0.0);
    }

    #[test]
    fn test_paces_to_desired_rate() {
        let mut t = PlaybackTimer::new(100.0);
        let start = Instant::now();
        for _ in 0..5 {
            t.wait_until_next_frame_is_due();
        }
        // four periods of 10ms
        assert!(start.elapsed() >= Duration::from_millis(40));
        let fps = t.actual_frame_rate();
        assert!(fps > 0.0 && fps <= 101.0, "fps = {}", fps);
    }

    #[test]
    fn test_invalid_rate_falls_back() {
        let mut t = PlaybackTimer::new(0.0);
        assert_eq!(t.desired_fps(), 24.0);
        t.set_desired_fps(f64::NAN);
        assert_eq!(t.desired_fps(), 24.0);
        t.set_desired_fps(48.0);
        assert_eq!(t.desired_fps(), 48.0);
    }
}
