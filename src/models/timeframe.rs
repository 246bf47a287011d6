use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle width tracked by the store.
///
/// Every timeframe except `Minute75` is fetched from upstream; `Minute75` is
/// derived locally from stored 15-minute candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1-minute candles
    Minute1,
    /// 5-minute candles
    Minute5,
    /// 15-minute candles
    Minute15,
    /// 30-minute candles
    Minute30,
    /// 1-hour candles
    Hour1,
    /// Daily candles
    Day1,
    /// 75-minute candles, resampled from 15m
    Minute75,
}

impl Timeframe {
    /// Canonical identifier, also the value stored in the `timeframe` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Minute30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Day1 => "1d",
            Timeframe::Minute75 => "75m",
        }
    }

    /// Interval parameter understood by the Yahoo chart API, `None` for derived timeframes
    pub fn yahoo_interval(&self) -> Option<&'static str> {
        match self {
            Timeframe::Minute1 => Some("1m"),
            Timeframe::Minute5 => Some("5m"),
            Timeframe::Minute15 => Some("15m"),
            Timeframe::Minute30 => Some("30m"),
            Timeframe::Hour1 => Some("60m"),
            Timeframe::Day1 => Some("1d"),
            Timeframe::Minute75 => None,
        }
    }

    /// Candle width. Daily candles are treated as one calendar day wide.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::Minute1 => Duration::minutes(1),
            Timeframe::Minute5 => Duration::minutes(5),
            Timeframe::Minute15 => Duration::minutes(15),
            Timeframe::Minute30 => Duration::minutes(30),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Day1 => Duration::days(1),
            Timeframe::Minute75 => Duration::minutes(75),
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Timeframe::Day1)
    }

    /// How far back the upstream keeps history for this timeframe.
    /// `None` means unbounded (daily).
    pub fn max_lookback(&self) -> Option<Duration> {
        match self {
            Timeframe::Minute1 => Some(Duration::days(7)),
            Timeframe::Minute5 | Timeframe::Minute15 | Timeframe::Minute30 => Some(Duration::days(60)),
            Timeframe::Hour1 => Some(Duration::days(730)),
            Timeframe::Day1 => None,
            Timeframe::Minute75 => Some(Duration::days(60)),
        }
    }

    /// Age after which the status report marks the latest candle as stale
    pub fn resync_window(&self) -> Duration {
        match self {
            Timeframe::Minute1 => Duration::hours(1),
            Timeframe::Minute5 => Duration::hours(2),
            Timeframe::Minute15 => Duration::hours(4),
            Timeframe::Minute30 => Duration::hours(6),
            Timeframe::Hour1 | Timeframe::Day1 | Timeframe::Minute75 => Duration::days(1),
        }
    }

    /// Stored timeframe a derived timeframe is built from
    pub fn source(&self) -> Option<Timeframe> {
        match self {
            Timeframe::Minute75 => Some(Timeframe::Minute15),
            _ => None,
        }
    }

    pub fn is_derived(&self) -> bool {
        self.source().is_some()
    }

    /// Timeframes synced when none are requested explicitly
    pub fn default_set() -> Vec<Timeframe> {
        vec![
            Timeframe::Minute1,
            Timeframe::Minute5,
            Timeframe::Minute15,
            Timeframe::Hour1,
            Timeframe::Day1,
        ]
    }

    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::Minute1,
            Timeframe::Minute5,
            Timeframe::Minute15,
            Timeframe::Minute30,
            Timeframe::Hour1,
            Timeframe::Day1,
            Timeframe::Minute75,
        ]
    }

    /// Parse "all", "default" or a comma separated list ("1d,15m").
    /// Duplicates are dropped, order of first appearance is kept.
    pub fn parse_list(s: &str) -> Result<Vec<Timeframe>, String> {
        match s.trim().to_lowercase().as_str() {
            "all" => return Ok(Timeframe::all()),
            "default" => return Ok(Timeframe::default_set()),
            _ => {}
        }

        let mut out: Vec<Timeframe> = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let tf: Timeframe = part.parse()?;
            if !out.contains(&tf) {
                out.push(tf);
            }
        }
        if out.is_empty() {
            return Err("No timeframe given".to_string());
        }
        Ok(out)
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "minute" => Ok(Timeframe::Minute1),
            "5m" => Ok(Timeframe::Minute5),
            "15m" => Ok(Timeframe::Minute15),
            "30m" => Ok(Timeframe::Minute30),
            "1h" | "60m" | "hourly" => Ok(Timeframe::Hour1),
            "1d" | "daily" => Ok(Timeframe::Day1),
            "75m" => Ok(Timeframe::Minute75),
            _ => Err(format!(
                "Invalid timeframe: {}. Valid options: 1m, 5m, 15m, 30m, 1h, 1d, 75m",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Day1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_round_trips_through_str() {
        for tf in Timeframe::all() {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
    }

    #[test]
    fn test_timeframe_aliases() {
        assert_eq!("daily".parse::<Timeframe>().unwrap(), Timeframe::Day1);
        assert_eq!("1D".parse::<Timeframe>().unwrap(), Timeframe::Day1);
        assert_eq!("60m".parse::<Timeframe>().unwrap(), Timeframe::Hour1);
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(Timeframe::parse_list("all").unwrap().len(), 7);
        assert_eq!(Timeframe::parse_list("default").unwrap(), Timeframe::default_set());
        assert_eq!(
            Timeframe::parse_list("1d, 15m,1d").unwrap(),
            vec![Timeframe::Day1, Timeframe::Minute15]
        );
        assert!(Timeframe::parse_list("1d,weekly").is_err());
        assert!(Timeframe::parse_list(" , ").is_err());
    }

    #[test]
    fn test_lookback_limits() {
        assert_eq!(Timeframe::Minute1.max_lookback(), Some(Duration::days(7)));
        assert_eq!(Timeframe::Minute15.max_lookback(), Some(Duration::days(60)));
        assert_eq!(Timeframe::Hour1.max_lookback(), Some(Duration::days(730)));
        assert_eq!(Timeframe::Day1.max_lookback(), None);
    }

    #[test]
    fn test_derived_timeframes() {
        assert_eq!(Timeframe::Minute75.source(), Some(Timeframe::Minute15));
        assert_eq!(Timeframe::Minute75.yahoo_interval(), None);
        assert!(Timeframe::Minute75.is_derived());
        assert!(!Timeframe::Day1.is_derived());
        assert!(!Timeframe::Day1.is_intraday());
    }
}
