use std::cell::Cell;
use std::rc::Rc;

/// Pluggable time source for delayed flushes and push-key generation.
///
/// Every root owns one clock; trees that should share time must be handed
/// the same instance.
pub trait Clock {
    /// Milliseconds since the Unix epoch (or any fixed origin for test clocks).
    fn now_millis(&self) -> u64;
}

/// Clock that only moves when a test advances it.
///
/// Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    millis: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: Rc::new(Cell::new(start_millis)),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.millis.set(self.millis.get().saturating_add(millis));
    }

    pub fn set(&self, millis: u64) {
        self.millis.set(millis);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.get()
    }
}

/// Wall clock backed by `chrono`.
#[cfg(feature = "system-clock")]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[cfg(feature = "system-clock")]
impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
    }
}
