//! Input filter configuration.
//!
//! The three flags are process-wide and may be flipped by the owning
//! application at any time (settings UI, patch commands). The assembler never
//! reads them mid-scan: `FilterHandle::snapshot` hands a copy to each `feed`
//! call, so one packet is always processed under one consistent view.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Which inbound messages to suppress before decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Drop 0xFE keep-alive bytes.
    pub ignore_active_sensing: bool,
    /// Drop SysEx payloads entirely (continuation tracking still runs).
    pub ignore_sysex: bool,
    /// Drop timing clock (0xF8) and time code (0xF1).
    pub ignore_realtime_clock: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ignore_active_sensing: true,
            ignore_sysex: false,
            ignore_realtime_clock: true,
        }
    }
}

/// Shared, mutable-anytime handle over a `FilterConfig`.
///
/// Clone is cheap (Arc internally); readers take lock-free snapshots.
#[derive(Clone, Debug, Default)]
pub struct FilterHandle {
    inner: Arc<ArcSwap<FilterConfig>>,
}

impl FilterHandle {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Current view of the flags, copied out.
    pub fn snapshot(&self) -> FilterConfig {
        **self.inner.load()
    }

    /// Replace the flags; in-flight packet scans keep their snapshot.
    pub fn set(&self, config: FilterConfig) {
        self.inner.store(Arc::new(config));
    }
}
