use crate::models::{Candle, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrtKind {
    Continuation,
    Revision,
    Extreme,
}

#[derive(Debug, Clone)]
pub struct CrtSignal {
    pub kind: CrtKind,
    pub direction: Trend,
    pub target_price: f64,
    /// Set only for `Extreme` when `c5` closed as a doji (defaults to
    /// Bullish / c5.high and tags close_type=Doji in that case).
    pub doji: bool,
}

fn body_top(c: &Candle) -> f64 {
    c.open.max(c.close)
}
fn body_bottom(c: &Candle) -> f64 {
    c.open.min(c.close)
}

impl CrtSignal {
    pub fn continuation(c1: &Candle, c5: &Candle) -> Option<CrtSignal> {
        let b_bot_1 = body_bottom(c1);
        let b_top_1 = body_top(c1);
        let b_bot_5 = body_bottom(c5);
        let b_top_5 = body_top(c5);

        if b_bot_5 > c1.high && b_bot_5 > b_top_1 {
            return Some(CrtSignal {
                kind: CrtKind::Continuation,
                direction: Trend::Bullish,
                target_price: c5.high,
                doji: false,
            });
        }
        if b_top_5 < c1.low && b_top_5 < b_bot_1 {
            return Some(CrtSignal {
                kind: CrtKind::Continuation,
                direction: Trend::Bearish,
                target_price: c5.low,
                doji: false,
            });
        }
        None
    }

    pub fn revision(c1: &Candle, c5: &Candle) -> Option<CrtSignal> {
        let b_bot_5 = body_bottom(c5);
        let b_top_5 = body_top(c5);
        let body_inside = b_bot_5 >= c1.low && b_top_5 <= c1.high;
        let swept_high = c5.high > c1.high;
        let swept_low = c5.low < c1.low;

        if !body_inside || !(swept_high ^ swept_low) {
            return None;
        }

        if swept_high {
            Some(CrtSignal {
                kind: CrtKind::Revision,
                direction: Trend::Bearish,
                target_price: c1.low,
                doji: false,
            })
        } else {
            Some(CrtSignal {
                kind: CrtKind::Revision,
                direction: Trend::Bullish,
                target_price: c1.high,
                doji: false,
            })
        }
    }

    pub fn extreme(c1: &Candle, c5: &Candle) -> Option<CrtSignal> {
        if !(c5.high > c1.high && c5.low < c1.low) {
            return None;
        }
        if c5.close > c5.open {
            Some(CrtSignal {
                kind: CrtKind::Extreme,
                direction: Trend::Bullish,
                target_price: c5.high,
                doji: false,
            })
        } else if c5.close < c5.open {
            Some(CrtSignal {
                kind: CrtKind::Extreme,
                direction: Trend::Bearish,
                target_price: c5.low,
                doji: false,
            })
        } else {
            Some(CrtSignal {
                kind: CrtKind::Extreme,
                direction: Trend::Bullish,
                target_price: c5.high,
                doji: true,
            })
        }
    }

    /// Runs all three detectors in priority order Continuation → Revision →
    /// Extreme, returning the first that fires. The three are mutually
    /// exclusive by construction (Continuation requires the body fully
    /// outside c1's range; Revision requires it fully inside with exactly
    /// one extreme swept; Extreme requires both extremes swept).
    pub fn detect(c1: &Candle, c5: &Candle) -> Option<CrtSignal> {
        Self::continuation(c1, c5)
            .or_else(|| Self::revision(c1, c5))
            .or_else(|| Self::extreme(c1, c5))
    }
}
