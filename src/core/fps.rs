//! Per-worker FPS counter (§9 "Signals for statistics").
//!
//! The original reports frame timing through a Qt signal carrying a
//! rolling-average struct, consumed by a GUI slot. There is no GUI here, and
//! a signal/slot channel would just be a mutex with extra ceremony. A single
//! atomic holds an exponential moving average of the instantaneous fps,
//! written by the worker after every frame and read by anything that wants
//! to report it — no lock on the hot path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Smoothing factor for the exponential moving average. Higher is
/// twitchier; `0.2` settles within a handful of frames without being noisy
/// enough to make the reported number bounce every frame.
const EMA_ALPHA: f64 = 0.2;

#[derive(Default)]
pub struct FpsCounter {
    ema_bits: AtomicU64,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            ema_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Folds one frame's elapsed time into the running average. A zero or
    /// negative `dt` (clock hiccup) is ignored rather than producing an
    /// infinite instantaneous rate.
    pub fn record(&self, dt: Duration) {
        let dt_secs = dt.as_secs_f64();
        if dt_secs <= 0.0 {
            return;
        }
        let instantaneous = 1.0 / dt_secs;
        let previous = f64::from_bits(self.ema_bits.load(Ordering::Relaxed));
        let updated = if previous <= 0.0 {
            instantaneous
        } else {
            EMA_ALPHA * instantaneous + (1.0 - EMA_ALPHA) * previous
        };
        self.ema_bits.store(updated.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.ema_bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_zero_before_any_frame() {
        let counter = FpsCounter::new();
        assert_eq!(counter.get(), 0.0);
    }

    #[test]
    fn converges_toward_a_steady_frame_rate() {
        let counter = FpsCounter::new();
        for _ in 0..50 {
            counter.record(Duration::from_millis(20)); // 50 fps
        }
        assert!((counter.get() - 50.0).abs() < 0.5);
    }

    #[test]
    fn ignores_a_non_positive_interval() {
        let counter = FpsCounter::new();
        counter.record(Duration::from_millis(20));
        let after_first = counter.get();
        counter.record(Duration::from_secs(0));
        assert_eq!(counter.get(), after_first);
    }
}
