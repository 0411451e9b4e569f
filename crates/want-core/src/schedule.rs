//! "every N unit" / "at HH:MM" schedule parsing (spec §4.C).

use chrono::{Datelike, Duration, Local, NaiveTime, TimeZone};
use want_types::WhenSpec;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl Unit {
    fn duration(self, n: i64) -> Duration {
        match self {
            Unit::Second => Duration::seconds(n),
            Unit::Minute => Duration::minutes(n),
            Unit::Hour => Duration::hours(n),
            Unit::Day => Duration::days(n),
            Unit::Week => Duration::weeks(n),
        }
    }

    /// Unit names are matched by prefix ("sec", "min", "hr"/"hour", "d",
    /// "w"), longest-first so "second" doesn't prefix-match "s" ambiguously.
    fn from_prefix(s: &str) -> Option<Unit> {
        let s = s.to_ascii_lowercase();
        let s = s.trim_end_matches('s');
        if s.is_empty() {
            return None;
        }
        if "second".starts_with(s) && !s.is_empty() {
            return Some(Unit::Second);
        }
        if "minute".starts_with(s) {
            return Some(Unit::Minute);
        }
        if "hour".starts_with(s) {
            return Some(Unit::Hour);
        }
        if "day".starts_with(s) {
            return Some(Unit::Day);
        }
        if "week".starts_with(s) {
            return Some(Unit::Week);
        }
        None
    }
}

/// Parsed `every` clause: a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct Frequency {
    pub interval: Duration,
}

/// Parse the `every` expression: bare unit name (implies N=1) or "N unit(s)".
pub fn parse_every(expr: &str) -> Result<Frequency> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(EngineError::InvalidSchedule("empty 'every' expression".into()));
    }

    let parts: Vec<&str> = expr.split_whitespace().collect();
    let (n, unit_str) = match parts.as_slice() {
        [unit] => (1i64, *unit),
        [n, unit] => {
            let n: i64 = n.parse().map_err(|_| {
                EngineError::InvalidSchedule(format!("invalid interval count '{n}'"))
            })?;
            (n, *unit)
        }
        _ => {
            return Err(EngineError::InvalidSchedule(format!(
                "malformed 'every' expression: '{expr}'"
            )))
        }
    };

    if n <= 0 {
        return Err(EngineError::InvalidSchedule(
            "interval count must be positive".into(),
        ));
    }

    let unit = Unit::from_prefix(unit_str)
        .ok_or_else(|| EngineError::InvalidSchedule(format!("unknown unit '{unit_str}'")))?;

    Ok(Frequency {
        interval: unit.duration(n),
    })
}

/// Parse the `at` expression: "midnight", "noon", "HH:MM" (24h), or
/// "Nam"/"Npm" (1-12).
pub fn parse_at(expr: &str) -> Result<NaiveTime> {
    let s = expr.trim().to_ascii_lowercase();
    if s == "midnight" {
        return Ok(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    }
    if s == "noon" {
        return Ok(NaiveTime::from_hms_opt(12, 0, 0).unwrap());
    }

    if let Some(stripped) = s.strip_suffix("am").or_else(|| s.strip_suffix("pm")) {
        let is_pm = s.ends_with("pm");
        let hour: u32 = stripped
            .parse()
            .map_err(|_| EngineError::InvalidSchedule(format!("invalid time-of-day '{expr}'")))?;
        if !(1..=12).contains(&hour) {
            return Err(EngineError::InvalidSchedule(format!(
                "hour out of range in '{expr}'"
            )));
        }
        let hour24 = match (hour, is_pm) {
            (12, false) => 0,  // 12am == midnight
            (12, true) => 12,  // 12pm == noon
            (h, false) => h,
            (h, true) => h + 12,
        };
        return Ok(NaiveTime::from_hms_opt(hour24, 0, 0).unwrap());
    }

    if let Some((h, m)) = s.split_once(':') {
        let hour: u32 = h
            .parse()
            .map_err(|_| EngineError::InvalidSchedule(format!("invalid hour in '{expr}'")))?;
        let minute: u32 = m
            .parse()
            .map_err(|_| EngineError::InvalidSchedule(format!("invalid minute in '{expr}'")))?;
        if hour > 23 {
            return Err(EngineError::InvalidSchedule(format!(
                "hour out of range in '{expr}'"
            )));
        }
        if minute > 59 {
            return Err(EngineError::InvalidSchedule(format!(
                "minute out of range in '{expr}'"
            )));
        }
        return Ok(NaiveTime::from_hms_opt(hour, minute, 0).unwrap());
    }

    Err(EngineError::InvalidSchedule(format!(
        "malformed 'at' expression: '{expr}'"
    )))
}

/// Validate a `WhenSpec`: `every` must parse, and `at` (if present) must
/// parse.
pub fn validate(spec: &WhenSpec) -> Result<()> {
    parse_every(&spec.every)?;
    if let Some(at) = &spec.at {
        parse_at(at)?;
    }
    Ok(())
}

/// Compute the next fire time after `now` (local time) for a `WhenSpec`.
///
/// With `at`: today at HH:MM local; if that has already passed, add one
/// interval. Without `at`: reference = today at 00:00 local; let
/// `k = elapsed_since_midnight / interval` (integer division); next =
/// midnight + (k+1) * interval.
pub fn next_execution(
    spec: &WhenSpec,
    now: chrono::DateTime<Local>,
) -> Result<chrono::DateTime<Local>> {
    let freq = parse_every(&spec.every)?;

    if let Some(at_expr) = &spec.at {
        let at_time = parse_at(at_expr)?;
        let today = now.date_naive();
        let mut candidate = Local
            .from_local_datetime(&today.and_time(at_time))
            .single()
            .ok_or_else(|| EngineError::InvalidSchedule("ambiguous local time".into()))?;

        while candidate <= now {
            candidate += freq.interval;
        }
        return Ok(candidate);
    }

    let midnight = Local
        .from_local_datetime(&now.date_naive().and_hms_opt(0, 0, 0).unwrap())
        .single()
        .ok_or_else(|| EngineError::InvalidSchedule("ambiguous local midnight".into()))?;

    let elapsed = now - midnight;
    let interval_secs = freq.interval.num_seconds().max(1);
    let elapsed_secs = elapsed.num_seconds().max(0);
    let k = elapsed_secs / interval_secs;
    let next = midnight + Duration::seconds((k + 1) * interval_secs);
    Ok(next)
}

#[allow(dead_code)]
fn day_of_week(dt: chrono::DateTime<Local>) -> chrono::Weekday {
    dt.weekday()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn local_at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> chrono::DateTime<Local> {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(h, min, s)
                    .unwrap(),
            )
            .single()
            .unwrap()
    }

    #[test]
    fn every_30_seconds_from_midnight_offset() {
        let spec = WhenSpec {
            every: "30 seconds".to_string(),
            at: None,
        };
        let now = local_at(2024, 1, 1, 0, 1, 5);
        let next = next_execution(&spec, now).unwrap();
        assert_eq!(next, local_at(2024, 1, 1, 0, 1, 30));
    }

    #[test]
    fn every_day_at_7am_rolls_to_tomorrow() {
        let spec = WhenSpec {
            every: "1 day".to_string(),
            at: Some("7am".to_string()),
        };
        let now = local_at(2024, 1, 1, 8, 0, 0);
        let next = next_execution(&spec, now).unwrap();
        assert_eq!(next, local_at(2024, 1, 2, 7, 0, 0));
    }

    #[test]
    fn next_execution_is_within_one_interval() {
        let spec = WhenSpec {
            every: "5 minutes".to_string(),
            at: None,
        };
        let now = local_at(2024, 6, 1, 13, 12, 0);
        let next = next_execution(&spec, now).unwrap();
        let delta = next - now;
        assert!(delta > Duration::zero());
        assert!(delta <= Duration::minutes(5));
    }

    #[test]
    fn bare_unit_defaults_to_one() {
        let freq = parse_every("hour").unwrap();
        assert_eq!(freq.interval, Duration::hours(1));
    }

    #[test]
    fn unit_prefix_matching() {
        assert_eq!(parse_every("2 mins").unwrap().interval, Duration::minutes(2));
        assert_eq!(parse_every("3 hours").unwrap().interval, Duration::hours(3));
        assert_eq!(parse_every("1 w").unwrap().interval, Duration::weeks(1));
    }

    #[test]
    fn invalid_unit_errors() {
        assert!(parse_every("5 fortnights").is_err());
    }

    #[test]
    fn out_of_range_hour_errors() {
        assert!(parse_at("25:00").is_err());
        assert!(parse_at("13pm").is_err());
    }

    #[test]
    fn midnight_and_noon() {
        assert_eq!(parse_at("midnight").unwrap(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert_eq!(parse_at("noon").unwrap(), NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(parse_at("12am").unwrap(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert_eq!(parse_at("12pm").unwrap(), NaiveTime::from_hms_opt(12, 0, 0).unwrap());
    }

    #[test]
    fn validate_requires_every_to_parse() {
        let bad = WhenSpec {
            every: "".to_string(),
            at: None,
        };
        assert!(validate(&bad).is_err());
    }
}
