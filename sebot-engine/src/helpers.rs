use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or_default()
}

/// Source of "now" in unix seconds.
pub trait Clock: Send + Sync {
  fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> i64 {
    now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  secs: AtomicI64,
}

impl ManualClock {
  pub fn new(start: i64) -> Self {
    Self {
      secs: AtomicI64::new(start),
    }
  }

  pub fn set(&self, secs: i64) {
    self.secs.store(secs, Ordering::SeqCst);
  }

  pub fn advance(&self, secs: i64) {
    self.secs.fetch_add(secs, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> i64 {
    self.secs.load(Ordering::SeqCst)
  }
}

/// Human readable duration, largest two units ("1h 5m", "42s").
pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
  if hours > 0 {
    format!("{}h {}m", hours, minutes)
  } else if minutes > 0 {
    format!("{}m {}s", minutes, seconds)
  } else {
    format!("{}s", seconds)
  }
}

/// Discord relative timestamp markup for the moment `ago` before `now`.
pub fn relative_timestamp(now: i64, ago: Duration) -> String {
  let ago = i64::try_from(ago.as_secs()).unwrap_or(i64::MAX);
  format!("<t:{}:R>", now.saturating_sub(ago))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(Duration::from_secs(42)), "42s");
    assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    assert_eq!(format_duration(Duration::from_secs(3900)), "1h 5m");
  }

  #[test]
  fn test_relative_timestamp() {
    assert_eq!(relative_timestamp(1_000, Duration::from_secs(60)), "<t:940:R>");
  }

  #[test]
  fn test_relative_timestamp_huge_duration_saturates() {
    assert_eq!(
      relative_timestamp(1_000, Duration::MAX),
      format!("<t:{}:R>", 1_000 - i64::MAX)
    );
    assert_eq!(
      relative_timestamp(i64::MIN, Duration::from_secs(1)),
      format!("<t:{}:R>", i64::MIN)
    );
  }

  #[test]
  fn test_manual_clock() {
    let clock = ManualClock::new(100);
    clock.advance(59);
    assert_eq!(clock.now(), 159);
    clock.set(5);
    assert_eq!(clock.now(), 5);
  }
}
