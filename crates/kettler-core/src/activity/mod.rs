//! Activity pin sampling
//!
//! Some consoles raise a digital line while the display is on. Sampling that
//! line lets the bridge leave the serial port alone until someone starts
//! exercising. Raw reads are debounced: a level is only reported when every
//! sample in a burst agrees.

mod sysfs;

pub use sysfs::SysfsPin;

use std::io;
use std::time::Duration;

/// Default number of raw reads per sample
pub const DEFAULT_SAMPLES: usize = 5;

/// Default pause between raw reads
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Debounced pin state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// All raw reads were low
    Low,
    /// All raw reads were high
    High,
    /// Reads disagreed or failed: sample again, do not transition
    Indeterminate,
}

/// Source of debounced activity samples
pub trait ActivitySampler {
    /// Take one debounced sample
    fn sample(&mut self) -> ActivityState;
}

/// A digital input that can be read
pub trait PinReader {
    /// Current level, `true` for high
    fn read_level(&mut self) -> io::Result<bool>;
}

/// Sampler requiring `samples` consecutive agreeing reads
pub struct DebouncedSampler<P> {
    pin: P,
    samples: usize,
    interval: Duration,
}

impl<P: PinReader> DebouncedSampler<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            samples: DEFAULT_SAMPLES,
            interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }

    /// Override the burst size and spacing
    pub fn with_timing(mut self, samples: usize, interval: Duration) -> Self {
        self.samples = samples.max(1);
        self.interval = interval;
        self
    }

    fn pause(&self, reads: usize) {
        if !self.interval.is_zero() {
            let reads = u32::try_from(reads).unwrap_or(u32::MAX);
            std::thread::sleep(self.interval.saturating_mul(reads));
        }
    }
}

impl<P: PinReader> ActivitySampler for DebouncedSampler<P> {
    fn sample(&mut self) -> ActivityState {
        let mut all_low = true;
        let mut all_high = true;

        for taken in 0..self.samples {
            match self.pin.read_level() {
                Ok(true) => all_low = false,
                Ok(false) => all_high = false,
                Err(e) => {
                    tracing::warn!(error = %e, "Activity pin read failed");
                    // A failed burst lasts as long as a good one
                    self.pause(self.samples - taken);
                    return ActivityState::Indeterminate;
                }
            }
            self.pause(1);
        }

        if all_low {
            ActivityState::Low
        } else if all_high {
            ActivityState::High
        } else {
            ActivityState::Indeterminate
        }
    }
}
