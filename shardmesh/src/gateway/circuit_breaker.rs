//! Per-shard circuit breaker (spec §4.7.6).
//!
//! Closed → Open on a sliding-window failure count; Open → HalfOpen after
//! `cooldownMs`, admitting exactly one trial call; that trial's outcome
//! either re-opens (failure) or closes (success) the breaker.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: State::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    breakers: DashMap<String, Mutex<Breaker>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            breakers: DashMap::new(),
        }
    }

    fn entry(&self, shard_id: &str) -> dashmap::mapref::one::Ref<'_, String, Mutex<Breaker>> {
        self.breakers
            .entry(shard_id.to_string())
            .or_insert_with(|| Mutex::new(Breaker::new()));
        self.breakers.get(shard_id).unwrap()
    }

    /// Call before dispatching to `shard_id`. Err(CircuitOpen) means fail
    /// fast without touching the shard.
    pub fn check(&self, shard_id: &str) -> Result<()> {
        let entry = self.entry(shard_id);
        let mut breaker = entry.lock();
        match breaker.state {
            State::Closed => Ok(()),
            State::Open => {
                let elapsed = breaker.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    breaker.state = State::HalfOpen;
                    breaker.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen(shard_id.to_string()))
                }
            }
            State::HalfOpen => {
                if breaker.trial_in_flight {
                    Err(Error::CircuitOpen(shard_id.to_string()))
                } else {
                    breaker.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self, shard_id: &str) {
        let entry = self.entry(shard_id);
        let mut breaker = entry.lock();
        breaker.consecutive_failures = 0;
        breaker.state = State::Closed;
        breaker.opened_at = None;
        breaker.trial_in_flight = false;
    }

    pub fn record_failure(&self, shard_id: &str) {
        let entry = self.entry(shard_id);
        let mut breaker = entry.lock();
        match breaker.state {
            State::HalfOpen => {
                breaker.state = State::Open;
                breaker.opened_at = Some(Instant::now());
                breaker.trial_in_flight = false;
            }
            State::Closed | State::Open => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.failure_threshold {
                    breaker.state = State::Open;
                    breaker.opened_at = Some(Instant::now());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure("shard-0");
        cb.record_failure("shard-0");
        assert!(cb.check("shard-0").is_ok());
        cb.record_failure("shard-0");
        assert!(matches!(cb.check("shard-0"), Err(Error::CircuitOpen(_))));
    }

    #[test]
    fn half_open_trial_success_closes_breaker() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(1));
        cb.record_failure("shard-0");
        assert!(matches!(cb.check("shard-0"), Err(Error::CircuitOpen(_))));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.check("shard-0").is_ok());
        cb.record_success("shard-0");
        assert!(cb.check("shard-0").is_ok());
    }

    #[test]
    fn half_open_trial_failure_reopens_breaker() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(1));
        cb.record_failure("shard-0");
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.check("shard-0").is_ok());
        cb.record_failure("shard-0");
        assert!(matches!(cb.check("shard-0"), Err(Error::CircuitOpen(_))));
    }
}
