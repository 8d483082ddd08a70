use std::{collections::HashMap, str::FromStr, sync::RwLock};

use breakglass_types::{BreakglassRequestSpec, BreakglassRequestStatus, ScheduleSpec};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;

use crate::util::Error;

lazy_static::lazy_static! {
    /// Process-wide cache of resolved IANA locations, per the "global state"
    /// allowance for read-mostly, read-write-locked caches.
    static ref ZONE_CACHE: RwLock<HashMap<String, Tz>> = RwLock::new(HashMap::new());
}

/// A `ScheduleSpec`, parsed and validated. `cron` is `None` for a one-shot
/// schedule.
pub struct ParsedSchedule {
    pub cron: Option<CronSchedule>,
    pub location: Tz,
}

/// Parses and validates a `ScheduleSpec`. Rejects `@`-descriptors and
/// non-5-field cron expressions, and resolves `location` against the
/// process-wide IANA zone cache.
pub fn parse(spec: &ScheduleSpec) -> Result<ParsedSchedule, Error> {
    let trimmed = spec.cron.trim();
    let cron = if trimmed.is_empty() {
        None
    } else {
        if trimmed.starts_with('@') {
            return Err(Error::UserInput(
                "@-descriptor cron expressions are not supported".to_string(),
            ));
        }
        let fields = trimmed.split_whitespace().count();
        if fields != 5 {
            return Err(Error::UserInput(format!(
                "cron expression must have exactly 5 fields (minute hour dom month dow), got {fields}"
            )));
        }
        // The `cron` crate expects a leading seconds field; spec.md's
        // expressions are minute-first, so a literal "0 " makes them mean
        // what a minute-first reader expects.
        Some(CronSchedule::from_str(&format!("0 {trimmed}"))?)
    };
    let location = resolve_location(&spec.location)?;
    Ok(ParsedSchedule { cron, location })
}

fn resolve_location(name: &str) -> Result<Tz, Error> {
    if let Some(tz) = ZONE_CACHE.read().unwrap().get(name) {
        return Ok(*tz);
    }
    let tz: Tz = name
        .parse()
        .map_err(|_| Error::InvalidTimeZone(name.to_string()))?;
    ZONE_CACHE.write().unwrap().insert(name.to_string(), tz);
    Ok(tz)
}

/// Parses a human duration string (e.g. "1h30m") into a `chrono::Duration`.
pub fn parse_duration_spec(s: &str) -> Result<chrono::Duration, Error> {
    let std_dur = parse_duration::parse(s)?;
    Ok(chrono::Duration::from_std(std_dur)?)
}

/// First firing strictly after `t`, in the schedule's configured location.
pub fn next(schedule: &ParsedSchedule, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cron = schedule.cron.as_ref()?;
    let local = t.with_timezone(&schedule.location);
    cron.after(&local).next().map(|dt| dt.with_timezone(&Utc))
}

/// Most recent firing at or before `t`, searching back up to one calendar
/// year. Returns `None` if no firing is found within that lookback.
pub fn previous(schedule: &ParsedSchedule, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cron = schedule.cron.as_ref()?;
    let local = t.with_timezone(&schedule.location);
    let lookback = local - chrono::Duration::days(366);
    cron.after(&lookback)
        .take_while(|fire| *fire <= local)
        .last()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Resolves the start of a one-shot window per spec.md's fallback order:
/// `spec.start` -> `status.nextActivationAt` -> `status.grantedAt` -> `now`.
pub fn resolve_one_shot_start(
    spec: &BreakglassRequestSpec,
    status: &BreakglassRequestStatus,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    parse_timestamp(spec.schedule.start.as_deref())
        .or_else(|| parse_timestamp(status.next_activation_at.as_deref()))
        .or_else(|| parse_timestamp(status.granted_at.as_deref()))
        .unwrap_or(now)
}

pub(crate) fn parse_timestamp(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// The half-open activation window `[start, end)` containing (or most
/// recently containing) `now`, if any.
pub fn current_window(
    spec: &BreakglassRequestSpec,
    status: &BreakglassRequestStatus,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let duration = parse_duration_spec(&spec.schedule.duration).ok()?;
    if duration <= chrono::Duration::zero() {
        return None;
    }
    let start = if spec.schedule.cron.trim().is_empty() {
        resolve_one_shot_start(spec, status, now)
    } else {
        let parsed = parse(&spec.schedule).ok()?;
        previous(&parsed, now).or_else(|| {
            parse_timestamp(status.next_activation_at.as_deref()).filter(|next| *next <= now)
        })?
    };
    Some((start, start + duration))
}

/// Equals `currentWindow(...).end` when a window exists.
pub fn final_completion_time(
    spec: &BreakglassRequestSpec,
    status: &BreakglassRequestStatus,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    current_window(spec, status, now).map(|(_, end)| end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn recurring(cron: &str, duration: &str, location: &str) -> ScheduleSpec {
        ScheduleSpec {
            start: None,
            duration: duration.to_string(),
            cron: cron.to_string(),
            location: location.to_string(),
            max_activations: None,
        }
    }

    #[test]
    fn parse_rejects_at_descriptor() {
        let spec = recurring("@daily", "1h", "UTC");
        assert!(parse(&spec).is_err());
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        let spec = recurring("0 9 * *", "1h", "UTC");
        assert!(parse(&spec).is_err());
    }

    #[test]
    fn parse_rejects_unknown_location() {
        let spec = recurring("0 9 * * *", "1h", "Mars/OlympusMons");
        assert!(parse(&spec).is_err());
    }

    #[test]
    fn next_is_strictly_after_reference() {
        let spec = recurring("0 9 * * *", "1h", "UTC");
        let parsed = parse(&spec).unwrap();
        let t = at("2024-01-01T09:00:00Z");
        let n = next(&parsed, t).unwrap();
        assert!(n > t);
        assert_eq!(n, at("2024-01-02T09:00:00Z"));
    }

    #[test]
    fn schedule_monotonicity() {
        let spec = recurring("0 9 * * *", "1h", "UTC");
        let parsed = parse(&spec).unwrap();
        let t = at("2024-01-01T00:00:00Z");
        let n1 = next(&parsed, t).unwrap();
        let n2 = next(&parsed, n1).unwrap();
        assert!(n1 > t);
        assert!(n2 > n1);
    }

    #[test]
    fn previous_finds_recent_firing() {
        let spec = recurring("0 9 * * *", "30m", "UTC");
        let parsed = parse(&spec).unwrap();
        let p = previous(&parsed, at("2024-01-02T10:00:00Z")).unwrap();
        assert_eq!(p, at("2024-01-02T09:00:00Z"));
    }

    #[test]
    fn previous_returns_none_outside_lookback() {
        // A cron that only fires on Feb 29 won't have fired within the
        // one-year lookback from most reference points.
        let spec = recurring("0 9 29 2 *", "30m", "UTC");
        let parsed = parse(&spec).unwrap();
        assert!(previous(&parsed, at("2023-06-01T00:00:00Z")).is_none());
    }

    #[test]
    fn current_window_one_shot_uses_explicit_start() {
        let mut spec = BreakglassRequestSpec::default();
        spec.schedule.start = Some("2024-01-01T10:00:00Z".to_string());
        spec.schedule.duration = "1h".to_string();
        let status = BreakglassRequestStatus::default();
        let (start, end) = current_window(&spec, &status, at("2024-01-01T10:30:00Z")).unwrap();
        assert_eq!(start, at("2024-01-01T10:00:00Z"));
        assert_eq!(end, at("2024-01-01T11:00:00Z"));
    }

    #[test]
    fn current_window_duration_matches_spec() {
        let mut spec = BreakglassRequestSpec::default();
        spec.schedule.cron = "0 9 * * *".to_string();
        spec.schedule.duration = "30m".to_string();
        let status = BreakglassRequestStatus::default();
        let (start, end) = current_window(&spec, &status, at("2024-01-02T09:10:00Z")).unwrap();
        assert_eq!(end - start, chrono::Duration::minutes(30));
    }

    #[test]
    fn resolve_one_shot_start_precedence() {
        let mut spec = BreakglassRequestSpec::default();
        let mut status = BreakglassRequestStatus::default();
        let now = at("2024-01-01T00:00:00Z");

        // Nothing set: falls back to `now`.
        assert_eq!(resolve_one_shot_start(&spec, &status, now), now);

        // `grantedAt` wins over `now`.
        status.granted_at = Some("2024-01-01T05:00:00Z".to_string());
        assert_eq!(
            resolve_one_shot_start(&spec, &status, now),
            at("2024-01-01T05:00:00Z")
        );

        // `nextActivationAt` wins over `grantedAt`.
        status.next_activation_at = Some("2024-01-01T06:00:00Z".to_string());
        assert_eq!(
            resolve_one_shot_start(&spec, &status, now),
            at("2024-01-01T06:00:00Z")
        );

        // `spec.start` wins over everything.
        spec.schedule.start = Some("2024-01-01T07:00:00Z".to_string());
        assert_eq!(
            resolve_one_shot_start(&spec, &status, now),
            at("2024-01-01T07:00:00Z")
        );
    }
}
