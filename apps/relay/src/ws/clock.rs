use std::sync::atomic::{AtomicI64, Ordering};

use unme_shared::time::now_millis;

/// Hands out strictly increasing millisecond timestamps.
///
/// Follows the wall clock but never repeats or goes backwards, so messages
/// stamped by one relay process have a total order.
#[derive(Debug, Default)]
pub struct MessageClock {
    last: AtomicI64,
}

impl MessageClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = now_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}
