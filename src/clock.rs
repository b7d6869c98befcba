//! Trading-session clock: a testable view of "what time is it" and
//! "how far to the close", decoupled from `chrono::Utc::now()` so the
//! backtest driver can pin a clock to a historical bar.

use chrono::{DateTime, NaiveTime, Timelike, Utc};

/// Morning session 09:30–11:30, afternoon session 13:00–15:00, local time.
#[derive(Debug, Clone, Copy)]
pub struct TradingHours {
    pub morning_open: NaiveTime,
    pub morning_close: NaiveTime,
    pub afternoon_open: NaiveTime,
    pub afternoon_close: NaiveTime,
}

impl Default for TradingHours {
    fn default() -> Self {
        Self {
            morning_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            morning_close: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
            afternoon_open: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            afternoon_close: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
        }
    }
}

impl TradingHours {
    pub fn is_trading_time(&self, now: DateTime<Utc>) -> bool {
        let t = now.time();
        (t >= self.morning_open && t <= self.morning_close)
            || (t >= self.afternoon_open && t <= self.afternoon_close)
    }

    /// Seconds remaining until the session close relative to `now`. If `now`
    /// is in the morning session, the afternoon close still applies (the
    /// stock can be traded through the rest of the day). Outside trading
    /// hours this returns `0`.
    pub fn seconds_to_close(&self, now: DateTime<Utc>) -> i64 {
        let t = now.time();
        let close = if t <= self.morning_close {
            self.afternoon_close
        } else if t >= self.afternoon_open && t <= self.afternoon_close {
            self.afternoon_close
        } else {
            return 0;
        };
        let now_secs = t.num_seconds_from_midnight() as i64;
        let close_secs = close.num_seconds_from_midnight() as i64;
        (close_secs - now_secs).max(0)
    }
}

/// Source of "now" for the engine. Production code uses [`SystemClock`];
/// the backtest driver pins a [`FixedClock`] to each replayed bar so the
/// pipeline never observes wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
