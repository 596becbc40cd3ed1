//! Rate limiter for single-destination route errors.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Remembers when a route error for a destination was last sent.
#[derive(Debug)]
pub struct RerrLimiter {
    last_sent: HashMap<Ipv4Addr, u64>,
    limit_ms: u64,
}

impl RerrLimiter {
    pub fn new(limit_ms: u64) -> Self {
        Self {
            last_sent: HashMap::new(),
            limit_ms,
        }
    }

    /// Record an error for `dest` at `now` if the last one is at least the
    /// limit interval old. Returns whether the error may be sent.
    pub fn allow(&mut self, dest: Ipv4Addr, now: u64) -> bool {
        match self.last_sent.get(&dest) {
            Some(&last) if now.saturating_sub(last) < self.limit_ms => false,
            _ => {
                self.last_sent.insert(dest, now);
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.last_sent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_error_within_limit_suppressed() {
        let mut limiter = RerrLimiter::new(500);
        let dest = Ipv4Addr::new(10, 0, 0, 9);
        assert!(limiter.allow(dest, 1000));
        assert!(!limiter.allow(dest, 1499));
        assert!(limiter.allow(dest, 1500));
        assert!(limiter.allow(Ipv4Addr::new(10, 0, 0, 8), 1500));
    }

    #[test]
    fn test_clear_forgets_history() {
        let mut limiter = RerrLimiter::new(500);
        let dest = Ipv4Addr::new(10, 0, 0, 9);
        assert!(limiter.allow(dest, 0));
        limiter.clear();
        assert!(limiter.allow(dest, 1));
    }
}
