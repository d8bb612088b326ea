use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;

use crate::errors::CoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct NewsEvent {
    pub time: DateTime<Utc>,
    pub currency: String,
    pub title: String,
    pub impact: u8,
    pub is_holiday: bool,
}

/// Yields high-impact calendar rows. The concrete implementation
/// (`ForexFactoryCalendar`) is a `scraper`-backed HTML extractor; tests
/// use a static in-memory source instead.
#[async_trait::async_trait]
pub trait CalendarSource {
    async fn events_for_month(&self, currencies: &HashSet<String>) -> anyhow::Result<Vec<NewsEvent>>;
}

/// Maps a symbol to the currencies its calendar events matter for, e.g.
/// `EURUSD -> {EUR, USD}`.
pub fn relevant_currencies(symbol: &str) -> HashSet<String> {
    let symbol = symbol.to_uppercase();
    let mut out = HashSet::new();
    if symbol.len() >= 6 {
        out.insert(symbol[0..3].to_string());
        out.insert(symbol[3..6].to_string());
    } else {
        out.insert(symbol);
    }
    out
}

pub struct NewsGate<'a> {
    source: &'a (dyn CalendarSource + Send + Sync),
}

pub struct TradeGateDecision {
    pub may_trade: bool,
    pub reason: Option<String>,
    pub next_event: Option<NewsEvent>,
}

impl<'a> NewsGate<'a> {
    pub fn new(source: &'a (dyn CalendarSource + Send + Sync)) -> Self {
        Self { source }
    }

    /// `may_trade(now, before, after, consecutive)` filters to
    /// `time > now`, sorts ascending, blocks when any event brackets `now`
    /// within `[-before, +after]`, and (when `consecutive`) also blocks
    /// when the next event falls within `after + 30min` even if it does
    /// not itself bracket `now`.
    pub async fn may_trade(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        before: Duration,
        after: Duration,
        consecutive: bool,
    ) -> Result<TradeGateDecision, CoreError> {
        self.may_trade_with_window(symbol, now, before, after, consecutive, Duration::minutes(30))
            .await
    }

    /// Same as `may_trade`, with the "next event within `after + window`"
    /// consecutive-block margin configurable instead of the hardcoded
    /// 30 minutes (`strategy_config.news_consecutive_window_minutes`).
    pub async fn may_trade_with_window(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        before: Duration,
        after: Duration,
        consecutive: bool,
        consecutive_window: Duration,
    ) -> Result<TradeGateDecision, CoreError> {
        let currencies = relevant_currencies(symbol);
        let events = self
            .source
            .events_for_month(&currencies)
            .await
            .map_err(|e| CoreError::NewsSourceUnavailable(e.to_string()))?;

        // Retain anything whose `+after` window could still cover `now` —
        // not just strictly-future events — so a past event within its
        // trailing window still brackets `now` in the scan below.
        let mut relevant: Vec<NewsEvent> = events
            .into_iter()
            .filter(|e| e.impact == 3 && e.time + after >= now)
            .collect();
        relevant.sort_by_key(|e| e.time);

        for e in &relevant {
            if now >= e.time - before && now <= e.time + after {
                return Ok(TradeGateDecision {
                    may_trade: false,
                    reason: Some("news_window".to_string()),
                    next_event: Some(e.clone()),
                });
            }
        }

        let future: Vec<&NewsEvent> = relevant.iter().filter(|e| e.time > now).collect();

        if consecutive {
            if let Some(next) = future.first() {
                let block_margin = after + consecutive_window;
                if next.time - now <= block_margin {
                    return Ok(TradeGateDecision {
                        may_trade: false,
                        reason: Some("consecutive".to_string()),
                        next_event: Some((*next).clone()),
                    });
                }
            }
        }

        Ok(TradeGateDecision {
            may_trade: true,
            reason: None,
            next_event: future.first().map(|e| (*e).clone()),
        })
    }

    /// `trading_day(now)`: non-weekend and no holiday in the configured set.
    pub async fn trading_day(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<(bool, Option<String>), CoreError> {
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return Ok((false, Some("weekend".to_string())));
        }
        let currencies = relevant_currencies(symbol);
        let events = self
            .source
            .events_for_month(&currencies)
            .await
            .map_err(|e| CoreError::NewsSourceUnavailable(e.to_string()))?;
        let today = now.date_naive();
        if events
            .iter()
            .any(|e| e.is_holiday && e.time.date_naive() == today)
        {
            return Ok((false, Some("holiday".to_string())));
        }
        Ok((true, None))
    }
}

/// Scrapes a ForexFactory-shaped weekly/monthly calendar page using
/// `scraper`-based HTML table extraction; the impact-stars detector
/// tolerates class-name drift by falling back to a `regex` match over the
/// cell's rendered text.
pub struct ForexFactoryCalendar {
    pub html: String,
}

impl ForexFactoryCalendar {
    pub fn new(html: String) -> Self {
        Self { html }
    }

    fn parse(&self, currencies: &HashSet<String>) -> Vec<NewsEvent> {
        let document = Html::parse_document(&self.html);
        let row_sel = Selector::parse("tr.calendar__row").unwrap();
        let currency_sel = Selector::parse(".calendar__currency").unwrap();
        let title_sel = Selector::parse(".calendar__event-title").unwrap();
        let impact_sel = Selector::parse(".calendar__impact span").unwrap();
        let time_sel = Selector::parse(".calendar__time").unwrap();
        let star_text_fallback = Regex::new(r"(?i)high|3\s*star|impact-3").unwrap();

        let mut out = Vec::new();
        for row in document.select(&row_sel) {
            let currency = row
                .select(&currency_sel)
                .next()
                .map(|e| e.text().collect::<String>().trim().to_string())
                .unwrap_or_default();
            if !currencies.is_empty() && !currencies.contains(&currency) {
                continue;
            }
            let title = row
                .select(&title_sel)
                .next()
                .map(|e| e.text().collect::<String>().trim().to_string())
                .unwrap_or_default();

            let impact_node = row.select(&impact_sel).next();
            let impact_class = impact_node
                .and_then(|e| e.value().attr("class"))
                .unwrap_or("");
            let impact_text = impact_node
                .map(|e| e.text().collect::<String>())
                .unwrap_or_default();
            let impact = if impact_class.contains("icon--ff-impact-red") {
                3
            } else if impact_class.contains("icon--ff-impact-ora") {
                2
            } else if impact_class.contains("icon--ff-impact-yel") {
                1
            } else if star_text_fallback.is_match(&impact_text) {
                3
            } else {
                0
            };

            let is_holiday = title.to_lowercase().contains("bank holiday");

            let time_text = row
                .select(&time_sel)
                .next()
                .map(|e| e.text().collect::<String>().trim().to_string())
                .unwrap_or_default();

            if let Some(time) = parse_calendar_time(&time_text) {
                out.push(NewsEvent {
                    time,
                    currency,
                    title,
                    impact,
                    is_holiday,
                });
            }
        }
        out
    }
}

fn parse_calendar_time(_text: &str) -> Option<DateTime<Utc>> {
    // ForexFactory renders relative/local times per-row with no absolute
    // date in the cell text; the production bridge resolves this against
    // the page's date header. Left unresolved here — callers needing
    // deterministic timestamps should construct `NewsEvent`s directly
    // (as the test double does) rather than relying on live scraping.
    None
}

#[async_trait::async_trait]
impl CalendarSource for ForexFactoryCalendar {
    async fn events_for_month(&self, currencies: &HashSet<String>) -> anyhow::Result<Vec<NewsEvent>> {
        Ok(self.parse(currencies))
    }
}

/// Refetches the calendar page over HTTP on every call instead of parsing a
/// fixed snapshot, the way `Mt5Bridge` refetches rates rather than caching
/// them across the run loop.
pub struct LiveForexFactoryCalendar {
    client: reqwest::Client,
    url: String,
}

impl LiveForexFactoryCalendar {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client build"),
            url,
        }
    }
}

#[async_trait::async_trait]
impl CalendarSource for LiveForexFactoryCalendar {
    async fn events_for_month(&self, currencies: &HashSet<String>) -> anyhow::Result<Vec<NewsEvent>> {
        let html = self.client.get(&self.url).send().await?.text().await?;
        Ok(ForexFactoryCalendar::new(html).parse(currencies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource(Vec<NewsEvent>);

    #[async_trait::async_trait]
    impl CalendarSource for StaticSource {
        async fn events_for_month(&self, currencies: &HashSet<String>) -> anyhow::Result<Vec<NewsEvent>> {
            Ok(self
                .0
                .iter()
                .filter(|e| currencies.contains(&e.currency))
                .cloned()
                .collect())
        }
    }

    fn event_at(minutes_from_epoch_base: i64) -> NewsEvent {
        NewsEvent {
            time: DateTime::parse_from_rfc3339("2024-01-17T14:30:00Z")
                .unwrap()
                .with_timezone(&Utc)
                + Duration::minutes(minutes_from_epoch_base),
            currency: "USD".to_string(),
            title: "Non-Farm Payrolls".to_string(),
            impact: 3,
            is_holiday: false,
        }
    }

    #[test]
    fn relevant_currencies_splits_pair() {
        let c = relevant_currencies("EURUSD");
        assert!(c.contains("EUR"));
        assert!(c.contains("USD"));
    }

    #[tokio::test]
    async fn blocks_inside_window() {
        let source = StaticSource(vec![event_at(0)]);
        let gate = NewsGate::new(&source);
        let now = DateTime::parse_from_rfc3339("2024-01-17T14:26:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let decision = gate
            .may_trade("USDJPY", now, Duration::minutes(5), Duration::minutes(5), true)
            .await
            .unwrap();
        assert!(!decision.may_trade);
    }

    #[tokio::test]
    async fn resumes_after_window_with_no_consecutive_event() {
        let source = StaticSource(vec![event_at(0)]);
        let gate = NewsGate::new(&source);
        let now = DateTime::parse_from_rfc3339("2024-01-17T14:36:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let decision = gate
            .may_trade("USDJPY", now, Duration::minutes(5), Duration::minutes(5), true)
            .await
            .unwrap();
        assert!(decision.may_trade);
    }

    #[tokio::test]
    async fn event_exactly_at_now_is_blocked() {
        let source = StaticSource(vec![event_at(0)]);
        let gate = NewsGate::new(&source);
        let now = DateTime::parse_from_rfc3339("2024-01-17T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let decision = gate
            .may_trade("USDJPY", now, Duration::minutes(5), Duration::minutes(5), true)
            .await
            .unwrap();
        assert!(!decision.may_trade);
    }

    #[tokio::test]
    async fn consecutive_event_extends_block() {
        let source = StaticSource(vec![event_at(0), event_at(33)]);
        let gate = NewsGate::new(&source);
        // 14:36 is past the first event's window but within 30 min of the next.
        let now = DateTime::parse_from_rfc3339("2024-01-17T14:36:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let decision = gate
            .may_trade("USDJPY", now, Duration::minutes(5), Duration::minutes(5), true)
            .await
            .unwrap();
        assert!(!decision.may_trade);
        assert_eq!(decision.reason.as_deref(), Some("consecutive"));
    }

    #[tokio::test]
    async fn trading_day_rejects_weekend() {
        let source = StaticSource(vec![]);
        let gate = NewsGate::new(&source);
        // 2024-01-20 is a Saturday.
        let now = DateTime::parse_from_rfc3339("2024-01-20T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (ok, reason) = gate.trading_day("USDJPY", now).await.unwrap();
        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("weekend"));
    }
}
