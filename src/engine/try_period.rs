use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TryPeriod {
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: u64,
    pub remaining_secs: u64,
}

/// Time spent in the try period. A start in the future (clock skew) counts as
/// zero.
pub fn elapsed(now: DateTime<Utc>, started_at: DateTime<Utc>) -> Duration {
    (now - started_at).to_std().unwrap_or(Duration::ZERO)
}

pub fn remaining(now: DateTime<Utc>, started_at: DateTime<Utc>, window: Duration) -> Duration {
    window.saturating_sub(elapsed(now, started_at))
}

pub fn report(now: DateTime<Utc>, started_at: DateTime<Utc>, window: Duration) -> TryPeriod {
    TryPeriod {
        started_at,
        elapsed_secs: elapsed(now, started_at).as_secs(),
        remaining_secs: remaining(now, started_at, window).as_secs(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn elapsed_counts_time_across_restart() {
        let now = t0() + TimeDelta::seconds(185);
        assert_eq!(elapsed(now, t0()), Duration::from_secs(185));
    }

    #[test]
    fn future_start_counts_as_zero() {
        let now = t0() - TimeDelta::seconds(5);
        assert_eq!(elapsed(now, t0()), Duration::ZERO);
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let window = Duration::from_secs(600);
        assert_eq!(
            remaining(t0() + TimeDelta::seconds(100), t0(), window),
            Duration::from_secs(500)
        );
        assert_eq!(
            remaining(t0() + TimeDelta::seconds(900), t0(), window),
            Duration::ZERO
        );
    }
}
