use chrono::{DateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::core::candles::{CandleAnchor, CandleReader};
use crate::errors::CoreError;
use crate::models::{Candle, CandleSeries, Timeframe};

/// The three H4 bars opening at 01:00, 05:00, 09:00 New-York time, used by
/// every CRT and Turtle-Soup detector. `c9` may still be forming.
#[derive(Debug, Clone)]
pub struct KeyCandles {
    pub c1: Candle,
    pub c5: Candle,
    pub c9: Candle,
}

impl KeyCandles {
    /// Locates the three key H4 bars within an H4 series for the NY
    /// calendar day containing `as_of`, using Eastern-zone arithmetic to
    /// convert each bar's timestamp to a New York wall-clock hour.
    pub fn find(series: &CandleSeries, as_of: DateTime<Utc>) -> Option<KeyCandles> {
        let ny: Tz = chrono_tz::US::Eastern;
        let local_date = as_of.with_timezone(&ny).date_naive();

        let hour_candle = |hour: u32| -> Option<Candle> {
            series
                .iter()
                .find(|c| {
                    let local = c.timestamp.with_timezone(&ny);
                    local.date_naive() == local_date
                        && local.naive_local().time().hour() == hour
                })
                .cloned()
        };

        Some(KeyCandles {
            c1: hour_candle(1)?,
            c5: hour_candle(5)?,
            c9: hour_candle(9)?,
        })
    }

    /// Locates the same three bars through the Candle Reader's named-anchor
    /// contract instead of scanning a pre-fetched series, so a bridge that
    /// reports in a zone other than UTC still resolves the right bars.
    /// `InsufficientHistory` on any of the three anchors is treated as "not
    /// yet available" rather than an error, matching `find`'s `None`.
    pub async fn via_reader(
        reader: &CandleReader<'_>,
        symbol: &str,
        timeframe: Timeframe,
        as_of: DateTime<Utc>,
    ) -> Result<Option<KeyCandles>, CoreError> {
        let anchor = |hour: u32| CandleAnchor::NyTime(NaiveTime::from_hms_opt(hour, 0, 0).unwrap());
        let c1 = reader.get_candle(symbol, timeframe, &anchor(1), as_of).await;
        let c5 = reader.get_candle(symbol, timeframe, &anchor(5), as_of).await;
        let c9 = reader.get_candle(symbol, timeframe, &anchor(9), as_of).await;
        match (c1, c5, c9) {
            (Ok(c1), Ok(c5), Ok(c9)) => Ok(Some(KeyCandles { c1, c5, c9 })),
            (Err(CoreError::InsufficientHistory { .. }), ..)
            | (_, Err(CoreError::InsufficientHistory { .. }), _)
            | (.., Err(CoreError::InsufficientHistory { .. })) => Ok(None),
            (Err(e), ..) | (_, Err(e), _) | (.., Err(e)) => Err(e),
        }
    }
}
