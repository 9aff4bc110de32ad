use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{NgxError, Result};

/// Number of HTTP response classes tracked (1xx..5xx).
pub const CLASS_COUNT: usize = 5;

/// An HTTP response class, identified by the leading digit of the status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusClass(u8);

impl StatusClass {
    /// Accepts 1..=5; anything else is not a class.
    pub fn new(class: i32) -> Option<Self> {
        match class {
            1..=5 => Some(StatusClass(class as u8)),
            _ => None,
        }
    }

    /// Decode the single-character signal written by the web server.
    pub fn from_signal(byte: u8) -> Option<Self> {
        Self::new(i32::from(byte) - i32::from(b'0'))
    }

    pub fn digit(self) -> u8 {
        self.0
    }

    fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

/// Five response-class counters guarded as a single unit.
pub struct StatusCounter {
    counts: Mutex<[u64; CLASS_COUNT]>,
    lock_timeout: Duration,
}

impl StatusCounter {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            counts: Mutex::new([0; CLASS_COUNT]),
            lock_timeout,
        }
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, [u64; CLASS_COUNT]>> {
        self.counts
            .try_lock_for(self.lock_timeout)
            .ok_or(NgxError::LockUnavailable {
                what: "status counter",
            })
    }

    /// Count one response of the given class. Out-of-range classes are
    /// ignored and reported as `Ok(false)`.
    pub fn increment(&self, class: i32) -> Result<bool> {
        let Some(class) = StatusClass::new(class) else {
            debug!("ignoring out-of-range status class {}", class);
            return Ok(false);
        };
        let mut counts = self.lock()?;
        let slot = &mut counts[class.index()];
        *slot = slot.saturating_add(1);
        Ok(true)
    }

    pub fn reset(&self) -> Result<()> {
        *self.lock()? = [0; CLASS_COUNT];
        Ok(())
    }

    /// Consistent copy of all five counters.
    pub fn counts(&self) -> Result<[u64; CLASS_COUNT]> {
        Ok(*self.lock()?)
    }

    /// Render `"c1,c2,c3,c4,c5\n"` from a single instant.
    pub fn snapshot(&self) -> Result<String> {
        // Copy under the lock, format outside it.
        let counts = self.counts()?;
        let mut out = counts
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        out.push('\n');
        Ok(out)
    }

    /// Hold the counter lock from a test to force timeouts elsewhere.
    #[cfg(test)]
    pub(crate) fn hold(&self) -> parking_lot::MutexGuard<'_, [u64; CLASS_COUNT]> {
        self.counts.lock()
    }
}
