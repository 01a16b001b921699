//! Time source for the reconciler
//!
//! Every snapshot carries the instant it was taken; scale-down deadlines and condition
//! timestamps are derived from it. `SystemClock` reads the wall clock, tests inject a
//! `FixedClock`.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a chosen instant, moved only by explicit calls
#[cfg(test)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl FixedClock {
    pub fn at(rfc3339: &str) -> Self {
        let now = DateTime::parse_from_rfc3339(rfc3339)
            .expect("FixedClock needs an RFC3339 instant")
            .with_timezone(&Utc);
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().expect("FixedClock lock poisoned") += by;
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("FixedClock lock poisoned")
    }
}
