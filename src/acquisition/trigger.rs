//! Generator-driven cycle trigger.
//!
//! The reference generator channel of the serial stream marks the start of
//! each physical cycle. Triggering has two steps:
//!
//! 1. **Calibration**: drain samples for a fixed wall-clock duration and record
//!    the largest generator value below an outlier cutoff. The trigger
//!    threshold is `coefficient * max`.
//! 2. **Edge detection**: a sliding window over generator values. A sample fires
//!    when it exceeds the threshold while the window shows a rising trend, and
//!    the detector is not already latched from the same excursion.
//!
//! # Debounce
//!
//! The latch is the only debounce. A noisy signal that dips out of the rising
//! condition and back while still above threshold fires again.

use crate::acquisition::sample_reader::Sample;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Clock
// =============================================================================

/// Monotonic time source, as elapsed time since an arbitrary epoch.
pub trait Clock: Send + Sync {
    /// Time since the clock's epoch.
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `step`.
    pub fn advance(&self, step: Duration) {
        self.nanos
            .fetch_add(step.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Set the current time.
    pub fn set(&self, now: Duration) {
        self.nanos.store(now.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Calibration
// =============================================================================

/// Trigger level on the generator channel.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Threshold(f64);

impl Threshold {
    /// Threshold at `value`.
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// Raw level
    pub fn value(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSettings {
    /// How long to observe the generator
    pub duration: Duration,
    /// Fraction of the observed maximum used as threshold
    pub coefficient: f64,
    /// Generator values at or above this are treated as glitches
    pub outlier_cutoff: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            coefficient: 0.9,
            outlier_cutoff: 1000.0,
        }
    }
}

/// Result of a calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    /// Largest accepted generator value, `-1.0` if none
    pub max_value: f64,
    /// Coefficient applied to `max_value`
    pub coefficient: f64,
    /// Samples drained, accepted or not
    pub samples_seen: u64,
    /// Samples rejected by the outlier cutoff
    pub rejected: u64,
}

impl Calibration {
    /// Sentinel maximum before any sample is accepted.
    pub const NO_MAXIMUM: f64 = -1.0;

    /// True if at least one generator value was accepted.
    pub fn is_valid(&self) -> bool {
        self.samples_seen > self.rejected
    }

    /// Derived trigger threshold, `None` for an invalid calibration.
    pub fn threshold(&self) -> Option<Threshold> {
        self.is_valid()
            .then(|| Threshold::new(self.coefficient * self.max_value))
    }
}

/// Derives the trigger threshold from a live sample stream.
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    settings: CalibrationSettings,
}

impl Calibrator {
    /// Calibrator with the given parameters.
    pub fn new(settings: CalibrationSettings) -> Self {
        Self { settings }
    }

    /// Parameters
    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// Drain `samples` for the configured duration as measured by `clock`.
    ///
    /// Each sample is folded in before the deadline check, so the sample that
    /// crosses the deadline still counts. Stops early if the stream ends.
    pub fn calibrate<I>(&self, samples: I, clock: &dyn Clock) -> Calibration
    where
        I: IntoIterator<Item = Sample>,
    {
        let begin = clock.now();
        let mut calibration = Calibration {
            max_value: Calibration::NO_MAXIMUM,
            coefficient: self.settings.coefficient,
            samples_seen: 0,
            rejected: 0,
        };

        for sample in samples {
            calibration.samples_seen += 1;
            if sample.generator >= self.settings.outlier_cutoff {
                calibration.rejected += 1;
                tracing::debug!(value = sample.generator, "Rejecting generator outlier");
            } else {
                calibration.max_value = calibration.max_value.max(sample.generator);
            }

            if clock.now().saturating_sub(begin) > self.settings.duration {
                break;
            }
        }

        tracing::info!(
            max_value = calibration.max_value,
            samples = calibration.samples_seen,
            rejected = calibration.rejected,
            threshold = ?calibration.threshold().map(Threshold::value),
            "Calibration finished"
        );
        calibration
    }
}

// =============================================================================
// Edge detection
// =============================================================================

/// Latched rising-edge detector over generator values.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    window: VecDeque<f64>,
    threshold: Threshold,
    latched: bool,
}

impl EdgeDetector {
    /// Default window size.
    pub const DEFAULT_WINDOW: usize = 2;

    /// Detector with a window of `window_size` values (at least 2), zero-filled.
    pub fn new(threshold: Threshold, window_size: usize) -> Self {
        Self {
            window: std::iter::repeat(0.0).take(window_size.max(2)).collect(),
            threshold,
            latched: false,
        }
    }

    /// Trigger level
    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Whether the current excursion already fired.
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Clear the window and the latch.
    pub fn reset(&mut self) {
        self.window.iter_mut().for_each(|v| *v = 0.0);
        self.latched = false;
    }

    /// Feed one generator value. Returns true exactly when a new cycle starts.
    pub fn update(&mut self, value: f64) -> bool {
        self.window.pop_front();
        self.window.push_back(value);

        let rising = match (self.window.front(), self.window.back()) {
            (Some(oldest), Some(newest)) => newest > oldest,
            _ => false,
        };

        if value > self.threshold.value() && rising {
            if self.latched {
                false
            } else {
                self.latched = true;
                true
            }
        } else {
            self.latched = false;
            false
        }
    }

    /// One edge event per sample of `samples`.
    pub fn events<I>(&mut self, samples: I) -> Events<'_, I::IntoIter>
    where
        I: IntoIterator<Item = Sample>,
    {
        Events {
            detector: self,
            samples: samples.into_iter(),
        }
    }

    /// Consume samples until an edge fires. Returns the number of samples
    /// consumed, or `None` if the stream ended first.
    pub fn wait_for_edge<I>(&mut self, samples: I) -> Option<u64>
    where
        I: IntoIterator<Item = Sample>,
    {
        let mut consumed = 0;
        for fired in self.events(samples) {
            consumed += 1;
            if fired {
                return Some(consumed);
            }
        }
        None
    }
}

/// Iterator returned by [`EdgeDetector::events`].
pub struct Events<'a, I> {
    detector: &'a mut EdgeDetector,
    samples: I,
}

impl<I: Iterator<Item = Sample>> Iterator for Events<'_, I> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        let sample = self.samples.next()?;
        Some(self.detector.update(sample.generator))
    }
}

// =============================================================================
// Device intensity trace
// =============================================================================

/// Detector samples over one acquisition window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceIntensityTrace {
    /// Detector values in arrival order
    pub samples: Vec<f64>,
    /// Index of the first sample at which the next cycle started
    pub second_cycle_index: Option<usize>,
}

impl DeviceIntensityTrace {
    /// Collect up to `len` detector values.
    ///
    /// Generator values keep feeding `detector`, so the excursion that fired the
    /// trigger stays latched and the first new edge marks the second cycle.
    pub fn collect<I>(samples: I, detector: &mut EdgeDetector, len: usize) -> Self
    where
        I: IntoIterator<Item = Sample>,
    {
        let mut trace = Self {
            samples: Vec::with_capacity(len),
            second_cycle_index: None,
        };
        for (index, sample) in samples.into_iter().take(len).enumerate() {
            trace.samples.push(sample.detector);
            if detector.update(sample.generator) && trace.second_cycle_index.is_none() {
                trace.second_cycle_index = Some(index);
            }
        }
        trace
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if no sample was collected
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples of the first cycle only (everything if no second edge was seen).
    pub fn active_samples(&self) -> &[f64] {
        match self.second_cycle_index {
            Some(end) => &self.samples[..end],
            None => &self.samples,
        }
    }
}
