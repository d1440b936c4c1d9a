//! Speed and ETA estimation for one in-flight transfer.

use std::time::{Duration, Instant};

/// Minimum spacing between published progress events
pub const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub transferred: u64,
    /// Bytes per second
    pub speed: f64,
    /// Seconds, `None` until a rate is known
    pub eta: Option<f64>,
    pub emit: bool,
}

/// Average-rate meter. Rates are computed over the whole transfer, which is
/// steadier than per-chunk rates on bursty links.
#[derive(Debug)]
pub struct SpeedMeter {
    started: Instant,
    last_emit: Option<Instant>,
    emit_interval: Duration,
}

impl SpeedMeter {
    pub fn new(started: Instant) -> Self {
        Self::with_interval(started, PROGRESS_EMIT_INTERVAL)
    }

    pub fn with_interval(started: Instant, emit_interval: Duration) -> Self {
        Self {
            started,
            last_emit: None,
            emit_interval,
        }
    }

    /// Record cumulative progress at `now`. `transferred` is clamped to `size`
    /// when the size is known.
    pub fn sample(&mut self, transferred: u64, size: u64, now: Instant) -> ProgressSample {
        let transferred = if size > 0 { transferred.min(size) } else { transferred };
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();

        let speed = if elapsed > 0.0 {
            transferred as f64 / elapsed
        } else {
            0.0
        };
        let eta = (speed > 0.0 && size > 0).then(|| (size - transferred) as f64 / speed);

        let done = size > 0 && transferred >= size;
        let emit = done
            || self
                .last_emit
                .map_or(true, |last| now.saturating_duration_since(last) >= self.emit_interval);
        if emit {
            self.last_emit = Some(now);
        }

        ProgressSample {
            transferred,
            speed,
            eta,
            emit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_speed_and_eta() {
        let start = Instant::now();
        let mut meter = SpeedMeter::new(start);

        let sample = meter.sample(500, 1000, start + Duration::from_secs(1));
        assert_eq!(sample.speed, 500.0);
        assert_eq!(sample.eta, Some(1.0));
    }

    #[test]
    fn clamps_to_known_size() {
        let start = Instant::now();
        let mut meter = SpeedMeter::new(start);
        let sample = meter.sample(2000, 1000, start + Duration::from_secs(1));
        assert_eq!(sample.transferred, 1000);
        assert_eq!(sample.eta, Some(0.0));
    }

    #[test]
    fn throttles_emits_but_always_emits_completion() {
        let start = Instant::now();
        let mut meter = SpeedMeter::with_interval(start, Duration::from_millis(100));

        assert!(meter.sample(10, 100, start + Duration::from_millis(1)).emit);
        assert!(!meter.sample(20, 100, start + Duration::from_millis(50)).emit);
        assert!(meter.sample(30, 100, start + Duration::from_millis(150)).emit);
        assert!(meter.sample(100, 100, start + Duration::from_millis(160)).emit);
    }

    #[test]
    fn unknown_size_has_no_eta() {
        let start = Instant::now();
        let mut meter = SpeedMeter::new(start);
        let sample = meter.sample(100, 0, start + Duration::from_secs(2));
        assert_eq!(sample.speed, 50.0);
        assert_eq!(sample.eta, None);
    }
}
