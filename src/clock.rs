//! Monotonic clock with opaque-tick conversion.
//!
//! Transports deliver packet timestamps as opaque integer ticks. `ClockSource`
//! carries the one-time timebase calibration needed to turn tick deltas into
//! nanoseconds, plus a monotonic reading used when a packet arrives with the
//! zero "no timestamp" sentinel.

use std::time::Instant;

use crate::error::{Error, Result};

/// Calibrated monotonic tick source.
///
/// Conversion follows the host-timebase convention: `nanos = ticks * numer /
/// denom`. `Copy` so every assembler can hold its own reading handle.
#[derive(Clone, Copy, Debug)]
pub struct ClockSource {
    origin: Instant,
    numer: u32,
    denom: u32,
}

impl ClockSource {
    /// Clock with a 1 ns tick, anchored at creation time.
    pub fn monotonic() -> Self {
        Self {
            origin: Instant::now(),
            numer: 1,
            denom: 1,
        }
    }

    /// Clock calibrated with an explicit timebase fraction.
    pub fn with_timebase(numer: u32, denom: u32) -> Result<Self> {
        if numer == 0 || denom == 0 {
            return Err(Error::InvalidTimebase { numer, denom });
        }
        Ok(Self {
            origin: Instant::now(),
            numer,
            denom,
        })
    }

    /// Current reading of the wrapped monotonic timer, in ticks.
    ///
    /// Measures the elapsed time a zero-timestamp sentinel stands in for;
    /// always >= any earlier reading from the same source. The reading is in
    /// the clock's own epoch, not the transport's.
    pub fn now_ticks(&self) -> u64 {
        let nanos = self.origin.elapsed().as_nanos();
        (nanos * self.denom as u128 / self.numer as u128) as u64
    }

    pub fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        (ticks as u128 * self.numer as u128 / self.denom as u128) as u64
    }

    pub fn ticks_to_millis(&self, ticks: u64) -> f64 {
        self.ticks_to_nanos(ticks) as f64 / 1_000_000.0
    }
}

impl Default for ClockSource {
    fn default() -> Self {
        Self::monotonic()
    }
}
