use crate::models::CandleSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyLevelKind {
    Pdh,
    Pdl,
}

/// A daily level (PDH/PDL) and whether/how closely the current bid
/// interacts with it.
#[derive(Debug, Clone, Copy)]
pub struct DailyLevelTouch {
    pub kind: DailyLevelKind,
    pub level: f64,
    /// Within `tolerance` of the level.
    pub is_taking: bool,
    /// Strictly crossed the level.
    pub has_taken: bool,
    pub distance: f64,
}

/// Evaluates the previous-day high/low against `bid`, given `daily` (most
/// recent N daily bars, most recent last) and a pip tolerance. When both
/// PDH and PDL qualify as "taking", the closest by absolute distance wins.
pub fn evaluate(daily: &CandleSeries, bid: f64, tolerance: f64) -> Option<DailyLevelTouch> {
    let prev = daily.get(daily.len().checked_sub(2)?)?;
    let pdh = prev.high;
    let pdl = prev.low;

    let pdh_taking = bid >= pdh - tolerance;
    let pdh_taken = bid >= pdh;
    let pdl_taking = bid <= pdl + tolerance;
    let pdl_taken = bid <= pdl;

    let candidates: Vec<DailyLevelTouch> = [
        (pdh_taking, DailyLevelKind::Pdh, pdh, pdh_taken),
        (pdl_taking, DailyLevelKind::Pdl, pdl, pdl_taken),
    ]
    .into_iter()
    .filter(|(taking, ..)| *taking)
    .map(|(is_taking, kind, level, has_taken)| DailyLevelTouch {
        kind,
        level,
        is_taking,
        has_taken,
        distance: (bid - level).abs(),
    })
    .collect();

    candidates
        .into_iter()
        .min_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap())
}
