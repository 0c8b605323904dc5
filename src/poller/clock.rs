use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Timelike, Utc};

use crate::config::Schedule;

const SECONDS_PER_HOUR: u64 = 3600;

/// Time source and sleeping primitive for the poller.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

impl Schedule {
    /// Delay from `now` until the next cycle should start.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Schedule::Interval(interval) => *interval,
            Schedule::Hourly => until_next_hour(&now.with_timezone(&Local)),
        }
    }
}

/// Time until the next top of the hour in `now`'s own timezone.
pub fn until_next_hour<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let into_hour = Duration::new(
        u64::from(now.minute()) * 60 + u64::from(now.second()),
        now.nanosecond().min(999_999_999),
    );
    Duration::from_secs(SECONDS_PER_HOUR).saturating_sub(into_hour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_until_next_hour() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let at = |h, m, s| tz.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap();

        assert_eq!(until_next_hour(&at(10, 0, 0)), Duration::from_secs(3600));
        assert_eq!(until_next_hour(&at(10, 15, 0)), Duration::from_secs(45 * 60));
        assert_eq!(until_next_hour(&at(23, 59, 59)), Duration::from_secs(1));
    }

    #[test]
    fn test_until_next_hour_half_hour_zone() {
        // 10:45 at +05:30 is 05:15 UTC; the local top of the hour is what counts.
        let tz = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let now = tz.with_ymd_and_hms(2024, 1, 1, 10, 45, 0).unwrap();
        assert_eq!(until_next_hour(&now), Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_interval_schedule_is_fixed() {
        let schedule = Schedule::Interval(Duration::from_secs(600));
        assert_eq!(schedule.delay_from(Utc::now()), Duration::from_secs(600));
    }

    #[test]
    fn test_hourly_schedule_is_within_an_hour() {
        let delay = Schedule::Hourly.delay_from(Utc::now());
        assert!(delay > Duration::ZERO);
        assert!(delay <= Duration::from_secs(3600));
    }
}
