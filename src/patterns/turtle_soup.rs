use crate::models::Trend;
use crate::patterns::key_candles::KeyCandles;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweptBar {
    C1,
    C5,
}

/// An H4 liquidity-sweep signal comparing the 01:00/05:00/09:00 NY bars.
#[derive(Debug, Clone)]
pub struct TurtleSoupSignal {
    pub direction: Trend,
    pub target_price: f64,
    pub swept_bar: SweptBar,
}

impl TurtleSoupSignal {
    /// Detects a sweep from `c9` against whichever of `c1`/`c5` has the
    /// more extreme high/low (ties resolve to the earlier bar, `c1`).
    pub fn detect(kc: &KeyCandles) -> Option<TurtleSoupSignal> {
        let c1_high_ge_c5 = kc.c1.high >= kc.c5.high;
        let higher_high = if c1_high_ge_c5 { kc.c1.high } else { kc.c5.high };
        let lower_low = if kc.c1.low <= kc.c5.low { kc.c1.low } else { kc.c5.low };

        if kc.c9.high > higher_high {
            let swept_bar = if c1_high_ge_c5 { SweptBar::C1 } else { SweptBar::C5 };
            let target = match swept_bar {
                SweptBar::C1 => kc.c1.low,
                SweptBar::C5 => kc.c5.low,
            };
            return Some(TurtleSoupSignal {
                direction: Trend::Bearish,
                target_price: target,
                swept_bar,
            });
        }

        if kc.c9.low < lower_low {
            let c1_low_le_c5 = kc.c1.low <= kc.c5.low;
            let swept_bar = if c1_low_le_c5 { SweptBar::C1 } else { SweptBar::C5 };
            let target = match swept_bar {
                SweptBar::C1 => kc.c1.high,
                SweptBar::C5 => kc.c5.high,
            };
            return Some(TurtleSoupSignal {
                direction: Trend::Bullish,
                target_price: target,
                swept_bar,
            });
        }

        None
    }
}
