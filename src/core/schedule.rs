use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::errors::CoreError;

/// A single configured session: `[start, end)` wall-clock in the schedule's zone,
/// mapped to the strategy that becomes active while `now` falls inside it.
#[derive(Debug, Clone)]
pub struct Session {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub strategy: String,
}

/// One non-wrapping `[start_minute, end_minute)` slice of a `Session`, after
/// midnight-wrap splitting. `end_minute` may equal 1440 to mean "end of day".
#[derive(Debug, Clone)]
struct Interval {
    start_min: u32,
    end_min: u32,
    session_idx: usize,
}

pub struct SessionChangeEvent {
    pub at: DateTime<Utc>,
    pub from_strategy: String,
    pub to_strategy: String,
}

/// Maps wall-clock time in a configured zone to an active strategy name,
/// per the half-open-interval-with-midnight-wrap algorithm of the Session
/// Scheduler: sessions are stored as a sorted array of `[start, end)`
/// intervals; a session whose `end <= start` wraps past midnight and is
/// split at construction into `[start, 24:00)` and `[00:00, end)`.
pub struct SessionSchedule {
    sessions: Vec<Session>,
    intervals: Vec<Interval>,
    zone: Tz,
    default_strategy: String,
    last_strategy: std::sync::Mutex<Option<String>>,
}

impl SessionSchedule {
    pub fn new(
        sessions: Vec<Session>,
        zone: Tz,
        default_strategy: String,
        known_strategies: &[String],
    ) -> Result<Self, CoreError> {
        let mut intervals = Vec::new();
        for (idx, s) in sessions.iter().enumerate() {
            if !known_strategies.is_empty() && !known_strategies.contains(&s.strategy) {
                return Err(CoreError::ConfigInvalid(format!(
                    "session '{}' references unknown strategy '{}'",
                    s.name, s.strategy
                )));
            }
            let start_min = minute_of_day(s.start);
            let end_min = minute_of_day(s.end);
            if end_min <= start_min {
                intervals.push(Interval {
                    start_min,
                    end_min: 1440,
                    session_idx: idx,
                });
                intervals.push(Interval {
                    start_min: 0,
                    end_min,
                    session_idx: idx,
                });
            } else {
                intervals.push(Interval {
                    start_min,
                    end_min,
                    session_idx: idx,
                });
            }
        }
        intervals.sort_by_key(|i| i.start_min);

        for pair in intervals.windows(2) {
            if pair[0].end_min > pair[1].start_min {
                return Err(CoreError::ConfigInvalid(format!(
                    "sessions '{}' and '{}' overlap",
                    sessions[pair[0].session_idx].name, sessions[pair[1].session_idx].name
                )));
            }
        }

        let mut covered = 0u32;
        for i in &intervals {
            covered += i.end_min - i.start_min;
        }
        if covered < 1440 {
            tracing::warn!(
                uncovered_minutes = 1440 - covered,
                "session schedule does not cover the full day; gaps fall back to the default strategy"
            );
        }

        Ok(Self {
            sessions,
            intervals,
            zone,
            default_strategy,
            last_strategy: std::sync::Mutex::new(None),
        })
    }

    fn find(&self, now: DateTime<Utc>) -> Option<&Session> {
        let local = now.with_timezone(&self.zone);
        let minute = local.hour() * 60 + local.minute();
        self.intervals
            .iter()
            .find(|i| minute >= i.start_min && minute < i.end_min)
            .map(|i| &self.sessions[i.session_idx])
    }

    pub fn current_session(&self, now: DateTime<Utc>) -> Option<&Session> {
        self.find(now)
    }

    pub fn current_strategy(&self, now: DateTime<Utc>) -> String {
        self.find(now)
            .map(|s| s.strategy.clone())
            .unwrap_or_else(|| self.default_strategy.clone())
    }

    /// Advances internal session-change tracking and returns an event if
    /// the active strategy differs from the previous call. Call once per
    /// execution-loop cycle.
    pub fn poll(&self, now: DateTime<Utc>) -> Option<SessionChangeEvent> {
        let current = self.current_strategy(now);
        let mut last = self.last_strategy.lock().unwrap();
        let event = match last.as_ref() {
            Some(prev) if *prev != current => Some(SessionChangeEvent {
                at: now,
                from_strategy: prev.clone(),
                to_strategy: current.clone(),
            }),
            None => None,
            _ => None,
        };
        *last = Some(current);
        event
    }

    /// Next time the active strategy changes, and what it changes to.
    pub fn next_transition(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, String)> {
        let local = now.with_timezone(&self.zone);
        let minute = local.hour() * 60 + local.minute();
        let next_boundary = self
            .intervals
            .iter()
            .map(|i| i.start_min)
            .chain(self.intervals.iter().map(|i| i.end_min % 1440))
            .filter(|&m| m > minute)
            .min()
            .unwrap_or_else(|| self.intervals.iter().map(|i| i.start_min).min().unwrap_or(0));

        let next_local = self
            .zone
            .with_ymd_and_hms(
                local.year(),
                local.month(),
                local.day(),
                next_boundary / 60,
                next_boundary % 60,
                0,
            )
            .single()?;
        let next_utc = next_local.with_timezone(&Utc);
        let next_utc = if next_utc <= now {
            next_utc + chrono::Duration::days(1)
        } else {
            next_utc
        };
        let strategy = self.current_strategy(next_utc);
        Some((next_utc, strategy))
    }
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn nt(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc_for_et(hour: u32, minute: u32) -> DateTime<Utc> {
        // January = EST = UTC-5, no DST in effect.
        chrono_tz::US::Eastern
            .with_ymd_and_hms(2024, 1, 17, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn basic_schedule() -> SessionSchedule {
        let sessions = vec![
            Session {
                name: "asian".into(),
                start: nt(17, 0),
                end: nt(9, 0),
                strategy: "turtle_soup".into(),
            },
            Session {
                name: "ny".into(),
                start: nt(9, 0),
                end: nt(17, 0),
                strategy: "crt_continuation".into(),
            },
        ];
        SessionSchedule::new(sessions, chrono_tz::US::Eastern, "turtle_soup".into(), &[]).unwrap()
    }

    #[test]
    fn midnight_wrap_resolves_both_sides() {
        let sched = basic_schedule();
        assert_eq!(sched.current_strategy(utc_for_et(23, 30)), "turtle_soup");
        assert_eq!(sched.current_strategy(utc_for_et(2, 30)), "turtle_soup");
        assert_eq!(sched.current_strategy(utc_for_et(12, 0)), "crt_continuation");
    }

    #[test]
    fn boundary_hit_resolves_to_starting_session() {
        let sched = basic_schedule();
        assert_eq!(sched.current_strategy(utc_for_et(9, 0)), "crt_continuation");
        assert_eq!(sched.current_strategy(utc_for_et(17, 0)), "turtle_soup");
    }

    #[test]
    fn overlapping_sessions_rejected() {
        let sessions = vec![
            Session {
                name: "a".into(),
                start: nt(9, 0),
                end: nt(12, 0),
                strategy: "x".into(),
            },
            Session {
                name: "b".into(),
                start: nt(11, 0),
                end: nt(14, 0),
                strategy: "y".into(),
            },
        ];
        let res = SessionSchedule::new(sessions, chrono_tz::US::Eastern, "x".into(), &[]);
        assert!(res.is_err());
    }

    #[test]
    fn unknown_strategy_reference_rejected() {
        let sessions = vec![Session {
            name: "a".into(),
            start: nt(9, 0),
            end: nt(12, 0),
            strategy: "ghost".into(),
        }];
        let known = vec!["turtle_soup".to_string()];
        let res = SessionSchedule::new(sessions, chrono_tz::US::Eastern, "turtle_soup".into(), &known);
        assert!(res.is_err());
    }

    #[test]
    fn session_change_event_fires_once() {
        let sched = basic_schedule();
        assert!(sched.poll(utc_for_et(8, 0)).is_none());
        let ev = sched.poll(utc_for_et(9, 30));
        assert!(ev.is_some());
        assert!(sched.poll(utc_for_et(10, 0)).is_none());
    }
}
