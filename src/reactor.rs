// rmmu_host/src/reactor.rs

use parking_lot::Mutex;

use crate::core_traits::Reactor;

/// Reactor backed by a virtual clock: `pause` advances time instead of sleeping.
#[derive(Debug, Default)]
pub struct VirtualReactor {
    now: Mutex<f64>,
    pauses: Mutex<u32>,
}

impl VirtualReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times a caller yielded.
    pub fn pause_count(&self) -> u32 {
        *self.pauses.lock()
    }
}

impl Reactor for VirtualReactor {
    fn monotonic(&self) -> f64 {
        *self.now.lock()
    }

    fn pause(&self, seconds: f64) {
        *self.now.lock() += seconds.max(0.0);
        *self.pauses.lock() += 1;
    }
}
