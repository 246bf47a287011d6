use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{Candle, Timeframe};
use crate::services::MarketCalendar;

/// Builds derived intraday candles out of stored finer ones
pub struct Resampler;

impl Resampler {
    /// Aggregate `source` candles (sorted or not) into `target` buckets anchored
    /// at the session open.
    ///
    /// A bucket is emitted only when it is complete: its first source candle
    /// opens at the bucket start, its last one closes at or after the bucket
    /// end, and no source candle in between is missing. Candles outside the
    /// session are ignored.
    pub fn resample(
        candles: &[Candle],
        source: Timeframe,
        target: Timeframe,
        calendar: &MarketCalendar,
    ) -> Vec<Candle> {
        if candles.is_empty() {
            return vec![];
        }

        let width = target.duration();
        let mut buckets: BTreeMap<DateTime<Utc>, (DateTime<Utc>, Vec<&Candle>)> = BTreeMap::new();
        let mut outside_session = 0usize;

        for candle in candles {
            match calendar.session_bucket(candle.time, width) {
                Some((start, end)) => buckets.entry(start).or_insert_with(|| (end, Vec::new())).1.push(candle),
                None => outside_session += 1,
            }
        }

        let mut result = Vec::with_capacity(buckets.len());
        let mut incomplete = 0usize;
        for (start, (end, mut members)) in buckets {
            members.sort_by_key(|c| c.time);
            members.dedup_by_key(|c| c.time);
            let (Some(first), Some(last)) = (members.first(), members.last()) else {
                continue;
            };
            // the session's last bucket may be shorter than `width`
            let step = source.duration().num_seconds().max(1);
            let expected = ((end - start).num_seconds() + step - 1) / step;
            if first.time != start || last.time + source.duration() < end || (members.len() as i64) < expected {
                incomplete += 1;
                continue;
            }
            result.push(Self::aggregate_ohlcv(&members, start));
        }

        debug!(
            source = %source,
            target = %target,
            input = candles.len(),
            output = result.len(),
            incomplete,
            outside_session,
            "Resampled candles"
        );
        result
    }

    /// first open, max high, min low, last close, summed volume
    fn aggregate_ohlcv(members: &[&Candle], bucket_time: DateTime<Utc>) -> Candle {
        let open = members.first().map(|c| c.open).unwrap_or_default();
        let close = members.last().map(|c| c.close).unwrap_or_default();
        let high = members.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = members.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let volume = members.iter().map(|c| c.volume).sum();
        let trade_count = members.iter().map(|c| c.trade_count).sum::<Option<u64>>();

        Candle {
            time: bucket_time,
            open,
            high,
            low,
            close,
            volume,
            trade_count,
        }
    }
}
