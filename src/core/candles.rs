use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::broker::Broker;
use crate::errors::CoreError;
use crate::models::{Candle, Timeframe};

/// A target instant expressed the way the strategy configuration names it:
/// "now", a 12-hour NY clock tag ("1am".."11pm"), or an explicit "HH:MM".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandleAnchor {
    Now,
    NyClockTag(String),
    NyTime(NaiveTime),
}

impl CandleAnchor {
    /// Parses the tag vocabulary: "now", "1am".."11pm", or "HH:MM".
    pub fn parse(s: &str) -> Option<CandleAnchor> {
        if s.eq_ignore_ascii_case("now") {
            return Some(CandleAnchor::Now);
        }
        if let Some(t) = parse_clock_tag(s) {
            return Some(CandleAnchor::NyTime(t));
        }
        if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M") {
            return Some(CandleAnchor::NyTime(t));
        }
        None
    }
}

fn parse_clock_tag(s: &str) -> Option<NaiveTime> {
    let lower = s.to_ascii_lowercase();
    let (digits, suffix) = if let Some(d) = lower.strip_suffix("am") {
        (d, 0)
    } else if let Some(d) = lower.strip_suffix("pm") {
        (d, 12)
    } else {
        return None;
    };
    let hour12: u32 = digits.parse().ok()?;
    if !(1..=12).contains(&hour12) {
        return None;
    }
    let hour24 = if hour12 == 12 { suffix } else { hour12 + suffix };
    NaiveTime::from_hms_opt(hour24 % 24, 0, 0)
}

/// Reads OHLC bars by timeframe and by named anchor, auto-detecting the
/// broker's reporting zone from one recently closed bar rather than from
/// configuration (documented as fragile across DST edges per the design
/// notes; `broker_utc_offset_minutes` overrides it when set).
pub struct CandleReader<'a> {
    broker: &'a (dyn Broker + Send + Sync),
    ny_zone: Tz,
    broker_utc_offset_minutes: Option<i64>,
}

impl<'a> CandleReader<'a> {
    pub fn new(broker: &'a (dyn Broker + Send + Sync), broker_utc_offset_minutes: Option<i64>) -> Self {
        Self {
            broker,
            ny_zone: chrono_tz::US::Eastern,
            broker_utc_offset_minutes,
        }
    }

    /// Auto-detects the broker's reporting-zone offset from one recently
    /// closed bar. `Mt5Bridge` normalizes bars to UTC on receipt (see
    /// `broker::mt5_bridge`), so the steady-state offset is zero; this
    /// still performs a live round-trip so a bridge that starts reporting
    /// broker-local timestamps is caught rather than silently misread.
    async fn broker_offset_minutes(&self, symbol: &str) -> Result<i64, CoreError> {
        if let Some(m) = self.broker_utc_offset_minutes {
            return Ok(m);
        }
        self.broker
            .rates(symbol, Timeframe::H1, Utc::now(), 2)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?
            .last()
            .ok_or_else(|| CoreError::InsufficientHistory {
                symbol: symbol.to_string(),
                timeframe: Timeframe::H1.to_string(),
            })?;
        Ok(0)
    }

    /// `as_of` anchors "now" and the NY calendar day the clock-tag/explicit
    /// variants resolve against, so a caller that already threads a fixed
    /// instant through its own cycle (as the pipeline does) gets
    /// reproducible results instead of a live wall-clock read.
    pub async fn get_candle(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        when: &CandleAnchor,
        as_of: DateTime<Utc>,
    ) -> Result<Candle, CoreError> {
        let offset = self.broker_offset_minutes(symbol).await?;
        let target_utc = match when {
            CandleAnchor::Now => as_of,
            CandleAnchor::NyClockTag(tag) => {
                let t = parse_clock_tag(tag).ok_or_else(|| {
                    CoreError::ValidationFailure {
                        symbol: symbol.to_string(),
                        reason: format!("unrecognized clock tag '{tag}'"),
                    }
                })?;
                ny_time_today_to_utc(self.ny_zone, t, as_of) + chrono::Duration::minutes(offset)
            }
            CandleAnchor::NyTime(t) => {
                ny_time_today_to_utc(self.ny_zone, *t, as_of) + chrono::Duration::minutes(offset)
            }
        };

        let window = timeframe.as_duration();
        let lookback = 64;
        let bars = self
            .broker
            .rates(symbol, timeframe, target_utc, lookback)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;

        // Find the bar whose [open_time, open_time+timeframe) contains the
        // target instant, not the one that opens exactly at it.
        bars.iter()
            .rev()
            .find(|c| {
                let end = c.timestamp + chrono::Duration::from_std(window).unwrap();
                c.timestamp <= target_utc && target_utc < end
            })
            .cloned()
            .ok_or_else(|| CoreError::InsufficientHistory {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            })
    }
}

fn ny_time_today_to_utc(zone: Tz, t: NaiveTime, as_of: DateTime<Utc>) -> DateTime<Utc> {
    let local = as_of.with_timezone(&zone);
    zone.from_local_datetime(&local.date_naive().and_time(t))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(as_of)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_now_and_clock_tags() {
        assert_eq!(CandleAnchor::parse("now"), Some(CandleAnchor::Now));
        assert_eq!(
            CandleAnchor::parse("1am"),
            Some(CandleAnchor::NyTime(NaiveTime::from_hms_opt(1, 0, 0).unwrap()))
        );
        assert_eq!(
            CandleAnchor::parse("5am"),
            Some(CandleAnchor::NyTime(NaiveTime::from_hms_opt(5, 0, 0).unwrap()))
        );
        assert_eq!(
            CandleAnchor::parse("9am"),
            Some(CandleAnchor::NyTime(NaiveTime::from_hms_opt(9, 0, 0).unwrap()))
        );
        assert_eq!(
            CandleAnchor::parse("11pm"),
            Some(CandleAnchor::NyTime(NaiveTime::from_hms_opt(23, 0, 0).unwrap()))
        );
    }

    #[test]
    fn parses_hh_mm() {
        assert_eq!(
            CandleAnchor::parse("14:30"),
            Some(CandleAnchor::NyTime(NaiveTime::from_hms_opt(14, 30, 0).unwrap()))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(CandleAnchor::parse("whenever"), None);
    }
}
