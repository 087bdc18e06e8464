use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum-interval throttling for registration / post-editing / profile
/// editing, per §5 ("Rate limits... throttled via minimum-interval fields
/// in configuration"). Keyed by an opaque bucket key (typically a user id
/// or remote host) so one struct instance can back several unrelated
/// limits.
pub struct RateLimiter {
  last_action: HashMap<String, Instant>,
  min_interval: Duration,
}

impl RateLimiter {
  pub fn new(min_interval: Duration) -> Self {
    RateLimiter {
      last_action: HashMap::new(),
      min_interval,
    }
  }

  /// Returns `true` and records `now` if enough time has passed since the
  /// last allowed action for `key`; otherwise returns `false` without
  /// mutating state.
  pub fn check_and_record(&mut self, key: &str) -> bool {
    let now = Instant::now();
    match self.last_action.get(key) {
      Some(last) if now.duration_since(*last) < self.min_interval => false,
      _ => {
        self.last_action.insert(key.to_string(), now);
        true
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_first_action_always_allowed() {
    let mut limiter = RateLimiter::new(Duration::from_secs(60));
    assert!(limiter.check_and_record("alice"));
  }

  #[test]
  fn test_second_action_within_window_rejected() {
    let mut limiter = RateLimiter::new(Duration::from_secs(60));
    assert!(limiter.check_and_record("alice"));
    assert!(!limiter.check_and_record("alice"));
  }

  #[test]
  fn test_different_keys_independent() {
    let mut limiter = RateLimiter::new(Duration::from_secs(60));
    assert!(limiter.check_and_record("alice"));
    assert!(limiter.check_and_record("bob"));
  }
}
