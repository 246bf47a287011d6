use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tracing::warn;

use crate::constants::market;
use crate::models::Timeframe;

/// Session hours of the exchange, in its local timezone.
///
/// Holidays are not modelled: any Monday to Friday counts as a business day.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketCalendar {
    pub timezone: Tz,
    pub session_open: NaiveTime,
    pub session_close: NaiveTime,
}

impl Default for MarketCalendar {
    fn default() -> Self {
        let parse = |s: &str, fallback: (u32, u32)| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .ok()
                .or_else(|| NaiveTime::from_hms_opt(fallback.0, fallback.1, 0))
                .unwrap_or_default()
        };
        Self {
            timezone: market::TIMEZONE.parse().unwrap_or(chrono_tz::Asia::Kolkata),
            session_open: parse(market::SESSION_OPEN, (9, 15)),
            session_close: parse(market::SESSION_CLOSE, (15, 30)),
        }
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn previous_business_day(date: NaiveDate) -> NaiveDate {
    let mut day = date;
    loop {
        day = match day.pred_opt() {
            Some(d) => d,
            None => return day,
        };
        if !is_weekend(day) {
            return day;
        }
    }
}

impl MarketCalendar {
    pub fn new(timezone: Tz, session_open: NaiveTime, session_close: NaiveTime) -> Self {
        Self {
            timezone,
            session_open,
            session_close,
        }
    }

    /// Local date of an instant
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    /// UTC instant of a local wall-clock time
    pub fn at_local(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        match self.timezone.from_local_datetime(&naive).earliest() {
            Some(local) => local.with_timezone(&Utc),
            None => {
                // wall time skipped by a DST jump; read it as UTC-offset time instead
                warn!(%naive, tz = %self.timezone, "Local time does not exist, using offset time");
                self.timezone.from_utc_datetime(&naive).with_timezone(&Utc)
            }
        }
    }

    /// Latest date for which a complete set of closed candles should exist.
    ///
    /// Weekend: the preceding Friday. Weekday before the session opens: the
    /// previous business day. Otherwise: today.
    pub fn reference_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let local = now.with_timezone(&self.timezone);
        let today = local.date_naive();
        match today.weekday() {
            Weekday::Sat | Weekday::Sun => previous_business_day(today),
            _ if local.time() < self.session_open => previous_business_day(today),
            _ => today,
        }
    }

    /// Smart-skip rule: the latest stored candle already falls on or after the reference date
    pub fn is_up_to_date(&self, latest: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.local_date(latest) >= self.reference_date(now)
    }

    /// Smart-skip rule for one unit. Daily units use the date rule alone.
    /// Intraday units are also behind while the candle after `latest` opens
    /// inside the reference session and has already closed.
    pub fn is_unit_up_to_date(&self, latest: DateTime<Utc>, timeframe: Timeframe, now: DateTime<Utc>) -> bool {
        if !self.is_up_to_date(latest, now) {
            return false;
        }
        if !timeframe.is_intraday() {
            return true;
        }
        let next_open = latest + timeframe.duration();
        let session_end = self.at_local(self.reference_date(now), self.session_close);
        next_open >= session_end || !self.is_candle_closed(next_open, timeframe, now)
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date)
    }

    /// Weekday and within [open, close)
    pub fn is_session_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        self.is_business_day(local.date_naive())
            && local.time() >= self.session_open
            && local.time() < self.session_close
    }

    /// Instant at which the candle opened at `open_time` is final.
    /// Intraday: open + width. Daily: session close of the candle's local date.
    pub fn candle_close(&self, open_time: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
        if timeframe.is_intraday() {
            open_time + timeframe.duration()
        } else {
            self.at_local(self.local_date(open_time), self.session_close)
        }
    }

    pub fn is_candle_closed(&self, open_time: DateTime<Utc>, timeframe: Timeframe, now: DateTime<Utc>) -> bool {
        self.candle_close(open_time, timeframe) <= now
    }

    /// Session-anchored bucket containing `time`, as (bucket open, bucket end).
    /// The last bucket of a session is cut at the session close.
    /// Returns `None` outside the session.
    pub fn session_bucket(&self, time: DateTime<Utc>, width: Duration) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let date = self.local_date(time);
        let open = self.at_local(date, self.session_open);
        let close = self.at_local(date, self.session_close);
        if time < open || time >= close || width <= Duration::zero() {
            return None;
        }

        let index = (time - open).num_seconds() / width.num_seconds();
        let start = open + Duration::seconds(index * width.num_seconds());
        Some((start, (start + width).min(close)))
    }

    /// Pick the worker sleep interval for the current session state
    pub fn sync_interval(
        &self,
        now: DateTime<Utc>,
        session_interval: std::time::Duration,
        idle_interval: std::time::Duration,
    ) -> std::time::Duration {
        if self.is_session_open(now) {
            session_interval
        } else {
            idle_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar() -> MarketCalendar {
        MarketCalendar::default()
    }

    /// Build a UTC instant from an IST wall-clock time
    fn ist(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_calendar_defaults() {
        let cal = calendar();
        assert_eq!(cal.timezone, chrono_tz::Asia::Kolkata);
        assert_eq!(cal.session_open, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        assert_eq!(cal.session_close, NaiveTime::from_hms_opt(15, 30, 0).unwrap());
    }

    #[test]
    fn test_reference_date_on_weekend_is_friday() {
        let cal = calendar();
        // 2024-06-15 is a Saturday
        assert_eq!(cal.reference_date(ist(2024, 6, 15, 11, 0)), date(2024, 6, 14));
        assert_eq!(cal.reference_date(ist(2024, 6, 16, 23, 0)), date(2024, 6, 14));
    }

    #[test]
    fn test_reference_date_before_open() {
        let cal = calendar();
        // Monday 07:00 -> previous Friday
        assert_eq!(cal.reference_date(ist(2024, 6, 17, 7, 0)), date(2024, 6, 14));
        // Wednesday 09:14 -> Tuesday
        assert_eq!(cal.reference_date(ist(2024, 6, 19, 9, 14)), date(2024, 6, 18));
        // Wednesday 09:15 -> Wednesday
        assert_eq!(cal.reference_date(ist(2024, 6, 19, 9, 15)), date(2024, 6, 19));
    }

    #[test]
    fn test_up_to_date_rule() {
        let cal = calendar();
        let saturday = ist(2024, 6, 15, 10, 0);
        assert!(cal.is_up_to_date(ist(2024, 6, 14, 9, 15), saturday));
        assert!(!cal.is_up_to_date(ist(2024, 6, 13, 15, 15), saturday));

        let monday_early = ist(2024, 6, 17, 7, 0);
        assert!(cal.is_up_to_date(ist(2024, 6, 14, 15, 29), monday_early));
        assert!(!cal.is_up_to_date(ist(2024, 6, 13, 15, 29), monday_early));
    }

    #[test]
    fn test_intraday_unit_needs_latest_closed_candle() {
        let cal = calendar();
        let tf = Timeframe::Minute5;
        let morning = ist(2024, 6, 19, 9, 25);

        // the 09:30 candle has not closed yet at 09:33
        assert!(cal.is_unit_up_to_date(morning, tf, ist(2024, 6, 19, 9, 33)));
        assert!(!cal.is_unit_up_to_date(morning, tf, ist(2024, 6, 19, 9, 35)));
        assert!(!cal.is_unit_up_to_date(morning, tf, ist(2024, 6, 19, 14, 0)));

        // after the close only the session's last candle counts
        let last = ist(2024, 6, 19, 15, 25);
        assert!(cal.is_unit_up_to_date(last, tf, ist(2024, 6, 19, 18, 0)));
        assert!(!cal.is_unit_up_to_date(ist(2024, 6, 19, 14, 0), tf, ist(2024, 6, 19, 18, 0)));

        // weekend and pre-open compare against the reference session
        assert!(cal.is_unit_up_to_date(ist(2024, 6, 14, 15, 25), tf, ist(2024, 6, 15, 11, 0)));
        assert!(cal.is_unit_up_to_date(ist(2024, 6, 14, 15, 25), tf, ist(2024, 6, 17, 7, 0)));
        assert!(!cal.is_unit_up_to_date(ist(2024, 6, 14, 12, 0), tf, ist(2024, 6, 17, 7, 0)));
    }

    #[test]
    fn test_hourly_and_daily_units() {
        let cal = calendar();
        // the 13:15 hourly candle closes at 14:15
        assert!(cal.is_unit_up_to_date(ist(2024, 6, 19, 12, 15), Timeframe::Hour1, ist(2024, 6, 19, 14, 0)));
        assert!(!cal.is_unit_up_to_date(ist(2024, 6, 19, 12, 15), Timeframe::Hour1, ist(2024, 6, 19, 14, 20)));
        assert!(cal.is_unit_up_to_date(ist(2024, 6, 19, 14, 15), Timeframe::Minute75, ist(2024, 6, 19, 20, 0)));
        // the short 15:15 hourly candle closes at 16:15 and is due after that
        assert!(cal.is_unit_up_to_date(ist(2024, 6, 19, 14, 15), Timeframe::Hour1, ist(2024, 6, 19, 15, 45)));
        assert!(!cal.is_unit_up_to_date(ist(2024, 6, 19, 14, 15), Timeframe::Hour1, ist(2024, 6, 19, 17, 0)));
        assert!(cal.is_unit_up_to_date(ist(2024, 6, 19, 15, 15), Timeframe::Hour1, ist(2024, 6, 19, 17, 0)));
        // daily keeps the plain date rule
        assert!(cal.is_unit_up_to_date(ist(2024, 6, 19, 9, 15), Timeframe::Day1, ist(2024, 6, 19, 14, 0)));
    }

    #[test]
    fn test_configurable_open_changes_cutover() {
        let cal = MarketCalendar::new(
            chrono_tz::Asia::Kolkata,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        );
        assert_eq!(cal.reference_date(ist(2024, 6, 19, 9, 30)), date(2024, 6, 18));
    }

    #[test]
    fn test_session_open() {
        let cal = calendar();
        assert!(cal.is_session_open(ist(2024, 6, 19, 9, 15)));
        assert!(cal.is_session_open(ist(2024, 6, 19, 15, 29)));
        assert!(!cal.is_session_open(ist(2024, 6, 19, 15, 30)));
        assert!(!cal.is_session_open(ist(2024, 6, 15, 11, 0)));
    }

    #[test]
    fn test_candle_close() {
        let cal = calendar();
        let open = ist(2024, 6, 19, 10, 0);
        assert_eq!(cal.candle_close(open, Timeframe::Minute15), ist(2024, 6, 19, 10, 15));
        assert!(!cal.is_candle_closed(open, Timeframe::Minute15, ist(2024, 6, 19, 10, 14)));
        assert!(cal.is_candle_closed(open, Timeframe::Minute15, ist(2024, 6, 19, 10, 15)));

        let daily = ist(2024, 6, 19, 9, 15);
        assert_eq!(cal.candle_close(daily, Timeframe::Day1), ist(2024, 6, 19, 15, 30));
        assert!(!cal.is_candle_closed(daily, Timeframe::Day1, ist(2024, 6, 19, 14, 0)));
        assert!(cal.is_candle_closed(daily, Timeframe::Day1, ist(2024, 6, 19, 16, 0)));
    }

    #[test]
    fn test_session_buckets() {
        let cal = calendar();
        let width = Duration::minutes(75);
        let (start, end) = cal.session_bucket(ist(2024, 6, 19, 10, 45), width).unwrap();
        assert_eq!(start, ist(2024, 6, 19, 10, 30));
        assert_eq!(end, ist(2024, 6, 19, 11, 45));

        let (last, last_end) = cal.session_bucket(ist(2024, 6, 19, 15, 15), width).unwrap();
        assert_eq!(last, ist(2024, 6, 19, 14, 15));
        assert_eq!(last_end, ist(2024, 6, 19, 15, 30));

        assert!(cal.session_bucket(ist(2024, 6, 19, 9, 0), width).is_none());
        assert!(cal.session_bucket(ist(2024, 6, 19, 15, 30), width).is_none());
    }

    #[test]
    fn test_sync_interval() {
        let cal = calendar();
        let fast = std::time::Duration::from_secs(300);
        let slow = std::time::Duration::from_secs(1800);
        assert_eq!(cal.sync_interval(ist(2024, 6, 19, 11, 0), fast, slow), fast);
        assert_eq!(cal.sync_interval(ist(2024, 6, 19, 20, 0), fast, slow), slow);
    }
}
