//! Injectable time source so grace-period and cooldown logic is testable
//! without sleeping in real time.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_unix(&self) -> u64;
}

#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs()
    }
}

/// A clock controlled by the test; starts at an arbitrary epoch and only
/// advances when told to.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<u64>>,
}

impl FixedClock {
    pub fn new(start_unix: u64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_unix)),
        }
    }

    pub fn advance(&self, secs: u64) {
        let mut now = self.now.lock().unwrap();
        *now += secs;
    }
}

impl Clock for FixedClock {
    fn now_unix(&self) -> u64 {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_only_when_told() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now_unix(), 1_000);
        clock.advance(60);
        assert_eq!(clock.now_unix(), 1_060);
    }

    #[test]
    fn system_clock_is_plausible() {
        let clock = SystemClock;
        assert!(clock.now_unix() > 1_700_000_000);
    }
}
