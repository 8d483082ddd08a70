use breakglass_types::{BreakglassRequestSpec, BreakglassRequestStatus, ConditionType};
use chrono::{DateTime, Utc};

use crate::{clock::Clock, conditions, schedule, util::Error};

/// Advances `nextActivationAt`/`activationCount` and emits the
/// corresponding condition. Owns all scheduling-state mutation outside of
/// `onActivationGranted`.
pub fn process(
    spec: &BreakglassRequestSpec,
    status: &mut BreakglassRequestStatus,
    clock: &dyn Clock,
    observed_generation: i64,
) -> Result<(), Error> {
    let now = clock.now();

    if let Some(max) = spec.schedule.max_activations
        && status.activation_count >= max
    {
        status.next_activation_at = None;
        conditions::set_condition(
            &mut status.conditions,
            ConditionType::Failed,
            "MaxActivationsReached",
            format!(
                "activation count {} reached the configured maximum {}",
                status.activation_count, max
            ),
            Some(observed_generation),
            now,
        );
        return Ok(());
    }

    if spec.schedule.cron.trim().is_empty() {
        process_one_shot(spec, status, now, observed_generation);
        return Ok(());
    }
    process_recurring(spec, status, now, observed_generation)
}

fn process_one_shot(
    spec: &BreakglassRequestSpec,
    status: &mut BreakglassRequestStatus,
    now: DateTime<Utc>,
    observed_generation: i64,
) {
    if status.activation_count > 0 {
        return;
    }
    match schedule::parse_timestamp(status.next_activation_at.as_deref()) {
        None => {
            let start = schedule::parse_timestamp(spec.schedule.start.as_deref()).unwrap_or(now);
            status.next_activation_at = Some(start.to_rfc3339());
            conditions::set_condition(
                &mut status.conditions,
                ConditionType::RecurringPending,
                "Scheduled",
                start.to_rfc3339(),
                Some(observed_generation),
                now,
            );
        }
        Some(next) if now >= next => {
            conditions::set_condition(
                &mut status.conditions,
                ConditionType::RecurringPending,
                "Waiting",
                format!("window open since {}", next.to_rfc3339()),
                Some(observed_generation),
                now,
            );
        }
        Some(_) => {}
    }
}

fn process_recurring(
    spec: &BreakglassRequestSpec,
    status: &mut BreakglassRequestStatus,
    now: DateTime<Utc>,
    observed_generation: i64,
) -> Result<(), Error> {
    let parsed = match schedule::parse(&spec.schedule) {
        Ok(p) => p,
        Err(e) => {
            conditions::set_condition(
                &mut status.conditions,
                ConditionType::Failed,
                "InvalidSchedule",
                e.to_string(),
                Some(observed_generation),
                now,
            );
            return Err(e);
        }
    };
    let duration = schedule::parse_duration_spec(&spec.schedule.duration)?;
    let spec_start = schedule::parse_timestamp(spec.schedule.start.as_deref());

    match schedule::parse_timestamp(status.next_activation_at.as_deref()) {
        None => {
            let mut candidate = schedule::next(&parsed, now).unwrap_or(now);
            if let Some(start) = spec_start {
                candidate = candidate.max(start);
            }
            // Late catch-up: if the most recent firing's window is still
            // open, adopt it instead of skipping straight to the next one.
            if let Some(prev) = schedule::previous(&parsed, now)
                && prev + duration > now
                && spec_start.is_none_or(|start| prev >= start)
            {
                candidate = prev;
            }
            status.next_activation_at = Some(candidate.to_rfc3339());
            conditions::set_condition(
                &mut status.conditions,
                ConditionType::RecurringPending,
                "Scheduled",
                candidate.to_rfc3339(),
                Some(observed_generation),
                now,
            );
        }
        Some(next_activation) => {
            if let Some(start) = spec_start
                && now < start
            {
                return Ok(());
            }
            if now > next_activation + duration {
                let advanced = schedule::next(&parsed, now).unwrap_or(now);
                status.next_activation_at = Some(advanced.to_rfc3339());
                conditions::set_condition(
                    &mut status.conditions,
                    ConditionType::RecurringPending,
                    "Scheduled",
                    advanced.to_rfc3339(),
                    Some(observed_generation),
                    now,
                );
            } else {
                conditions::set_condition(
                    &mut status.conditions,
                    ConditionType::RecurringPending,
                    "Waiting",
                    format!("window open since {}", next_activation.to_rfc3339()),
                    Some(observed_generation),
                    now,
                );
            }
        }
    }
    Ok(())
}

/// True iff an activation is due: `nextActivationAt` is set and both it
/// and `spec.start` are at or before `now`.
pub fn should_activate(
    spec: &BreakglassRequestSpec,
    status: &BreakglassRequestStatus,
    now: DateTime<Utc>,
) -> bool {
    let Some(next) = schedule::parse_timestamp(status.next_activation_at.as_deref()) else {
        return false;
    };
    let start = schedule::parse_timestamp(spec.schedule.start.as_deref());
    start.is_none_or(|start| now >= start) && now >= next
}

/// Deactivation is driven by window expiry, never by the recurrence
/// manager.
pub fn should_deactivate(_spec: &BreakglassRequestSpec, _status: &BreakglassRequestStatus) -> bool {
    false
}

/// Called once a grant succeeds: advances `activationCount` and, for
/// recurring schedules, computes the next `nextActivationAt` relative to
/// `grantedAt` (falling back to `now`).
pub fn on_activation_granted(
    spec: &BreakglassRequestSpec,
    status: &mut BreakglassRequestStatus,
    clock: &dyn Clock,
    observed_generation: i64,
) {
    let now = clock.now();
    status.activation_count += 1;

    if spec.schedule.cron.trim().is_empty() {
        status.next_activation_at = None;
        return;
    }

    let Ok(parsed) = schedule::parse(&spec.schedule) else {
        return;
    };
    let reference = schedule::parse_timestamp(status.granted_at.as_deref()).unwrap_or(now);
    if let Some(next) = schedule::next(&parsed, reference) {
        status.next_activation_at = Some(next.to_rfc3339());
        conditions::set_condition(
            &mut status.conditions,
            ConditionType::RecurringPending,
            "Scheduled",
            next.to_rfc3339(),
            Some(observed_generation),
            now,
        );
    }
}

/// True iff the recurrence manager still expects a future activation
/// (used by the revoke path to decide between `RecurringPending` and
/// `Expired`). Deliberately does not special-case `maxActivations`: once the
/// bound is reached, `nextActivationAt` is still set (process() only clears
/// it once it runs and detects the bound), so the revoke that completes the
/// final cycle still returns to `RecurringPending`, and it's the *next*
/// reconcile's `process()` call that terminates the request with
/// `Failed{MaxActivationsReached}`.
pub fn has_future_activations(spec: &BreakglassRequestSpec, status: &BreakglassRequestStatus) -> bool {
    !spec.schedule.cron.trim().is_empty() && status.next_activation_at.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn one_shot(start: &str, duration: &str) -> BreakglassRequestSpec {
        let mut spec = BreakglassRequestSpec::default();
        spec.schedule.start = Some(start.to_string());
        spec.schedule.duration = duration.to_string();
        spec
    }

    fn recurring(cron: &str, duration: &str) -> BreakglassRequestSpec {
        let mut spec = BreakglassRequestSpec::default();
        spec.schedule.cron = cron.to_string();
        spec.schedule.duration = duration.to_string();
        spec
    }

    #[test]
    fn one_shot_schedules_from_spec_start() {
        let spec = one_shot("2024-01-01T10:00:00Z", "1h");
        let mut status = BreakglassRequestStatus::default();
        let clock = FixedClock(at("2024-01-01T09:00:00Z"));
        process(&spec, &mut status, &clock, 1).unwrap();
        assert_eq!(status.next_activation_at.as_deref(), Some("2024-01-01T10:00:00+00:00"));
        assert!(!should_activate(&spec, &status, clock.0));
    }

    #[test]
    fn one_shot_activates_once_window_opens() {
        let spec = one_shot("2024-01-01T10:00:00Z", "1h");
        let mut status = BreakglassRequestStatus::default();
        status.next_activation_at = Some("2024-01-01T10:00:00Z".to_string());
        let clock = FixedClock(at("2024-01-01T10:00:01Z"));
        process(&spec, &mut status, &clock, 1).unwrap();
        assert!(should_activate(&spec, &status, clock.0));
    }

    #[test]
    fn one_shot_no_ops_after_first_activation() {
        let spec = one_shot("2024-01-01T10:00:00Z", "1h");
        let mut status = BreakglassRequestStatus::default();
        status.activation_count = 1;
        let before = status.clone();
        let clock = FixedClock(at("2024-01-01T11:30:00Z"));
        process(&spec, &mut status, &clock, 1).unwrap();
        assert_eq!(status, before);
    }

    #[test]
    fn recurring_missed_window_advances_past_it() {
        // Controller was offline 09:00-10:00; at 10:00 the Monday window
        // already closed at 09:30.
        let spec = recurring("0 9 * * 1-5", "30m");
        let mut status = BreakglassRequestStatus::default();
        status.next_activation_at = Some("2024-01-01T09:00:00Z".to_string()); // a Monday
        let clock = FixedClock(at("2024-01-01T10:00:00Z"));
        process(&spec, &mut status, &clock, 1).unwrap();
        let next = status.next_activation_at.unwrap();
        assert!(next.starts_with("2024-01-02"));
        assert_eq!(
            conditions::latest_condition(&status.conditions),
            Some(ConditionType::RecurringPending)
        );
    }

    #[test]
    fn max_activations_reached_is_terminal() {
        let mut spec = recurring("*/5 * * * *", "1m");
        spec.schedule.max_activations = Some(3);
        let mut status = BreakglassRequestStatus::default();
        status.activation_count = 3;
        let clock = FixedClock(at("2024-01-01T00:00:00Z"));
        process(&spec, &mut status, &clock, 1).unwrap();
        assert!(status.next_activation_at.is_none());
        assert_eq!(
            conditions::latest_condition(&status.conditions),
            Some(ConditionType::Failed)
        );
    }

    #[test]
    fn on_activation_granted_increments_and_advances() {
        let spec = recurring("0 9 * * *", "30m");
        let mut status = BreakglassRequestStatus::default();
        status.granted_at = Some("2024-01-01T09:00:00Z".to_string());
        let clock = FixedClock(at("2024-01-01T09:00:05Z"));
        on_activation_granted(&spec, &mut status, &clock, 1);
        assert_eq!(status.activation_count, 1);
        assert_eq!(status.next_activation_at.as_deref(), Some("2024-01-02T09:00:00+00:00"));
    }

    #[test]
    fn on_activation_granted_one_shot_clears_next_activation() {
        let spec = one_shot("2024-01-01T10:00:00Z", "1h");
        let mut status = BreakglassRequestStatus::default();
        status.next_activation_at = Some("2024-01-01T10:00:00Z".to_string());
        let clock = FixedClock(at("2024-01-01T10:00:00Z"));
        on_activation_granted(&spec, &mut status, &clock, 1);
        assert_eq!(status.activation_count, 1);
        assert!(status.next_activation_at.is_none());
    }

    #[test]
    fn has_future_activations_false_for_one_shot() {
        let spec = one_shot("2024-01-01T10:00:00Z", "1h");
        let status = BreakglassRequestStatus::default();
        assert!(!has_future_activations(&spec, &status));
    }

    #[test]
    fn has_future_activations_true_on_final_cycle_before_process_reruns() {
        // The revoke that completes the max'th cycle still sees
        // `nextActivationAt` set from `on_activation_granted` — it's the
        // following reconcile's `process()` call that notices the bound and
        // terminates the request, not this check.
        let mut spec = recurring("0 9 * * *", "30m");
        spec.schedule.max_activations = Some(1);
        let mut status = BreakglassRequestStatus::default();
        status.activation_count = 1;
        status.next_activation_at = Some("2024-01-02T09:00:00Z".to_string());
        assert!(has_future_activations(&spec, &status));
    }

    #[test]
    fn max_activations_terminates_on_the_reconcile_after_the_final_revoke() {
        // Scenario: cron="*/5 * * * *", duration=1m, maxActivations=3. After
        // the third grant+revoke cycle, the next reconcile's process() call
        // sets Failed{MaxActivationsReached} and clears nextActivationAt.
        let mut spec = recurring("*/5 * * * *", "1m");
        spec.schedule.max_activations = Some(3);
        let mut status = BreakglassRequestStatus::default();
        status.activation_count = 3;
        status.next_activation_at = Some("2024-01-01T00:05:00Z".to_string());
        assert!(has_future_activations(&spec, &status));

        let clock = FixedClock(at("2024-01-01T00:10:00Z"));
        process(&spec, &mut status, &clock, 1).unwrap();
        assert!(status.next_activation_at.is_none());
        assert_eq!(
            conditions::latest_condition(&status.conditions),
            Some(ConditionType::Failed)
        );
        assert!(!has_future_activations(&spec, &status));
    }
}
