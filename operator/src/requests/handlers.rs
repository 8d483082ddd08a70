use std::time::Duration;

use breakglass_types::{BreakglassRequestSpec, BreakglassRequestStatus, ConditionType};
use chrono::{DateTime, Utc};

use crate::{clock::Clock, conditions, recurrence, schedule, util::messages};

const MIN_REQUEUE: Duration = Duration::from_secs(30);
const MAX_REQUEUE: Duration = Duration::from_secs(3600);
const APPROVAL_POLL: Duration = Duration::from_secs(30);

/// The write-phase action a condition handler decided on.
#[derive(Debug, PartialEq)]
pub enum RequestAction {
    Grant,
    Revoke,
    Requeue(Duration),
    NoOp,
}

impl RequestAction {
    pub fn label(&self) -> &'static str {
        match self {
            RequestAction::Grant => "grant",
            RequestAction::Revoke => "revoke",
            RequestAction::Requeue(_) => "requeue",
            RequestAction::NoOp => "noop",
        }
    }
}

/// Dispatches on the resource's latest condition to the matching handler
/// (spec.md §4.5), mutating `status` and returning the action the
/// reconciler loop should take next.
pub fn dispatch(
    spec: &BreakglassRequestSpec,
    status: &mut BreakglassRequestStatus,
    clock: &dyn Clock,
    observed_generation: i64,
) -> RequestAction {
    let now = clock.now();
    match conditions::latest_condition(&status.conditions) {
        None => {
            conditions::set_condition(
                &mut status.conditions,
                ConditionType::Pending,
                "NewResource",
                "request observed for the first time",
                Some(observed_generation),
                now,
            );
            RequestAction::Requeue(Duration::ZERO)
        }
        Some(ConditionType::Pending) => handle_approval_gate(spec, status, now, observed_generation),
        Some(ConditionType::Approved) => handle_approval_gate(spec, status, now, observed_generation),
        Some(ConditionType::RecurringPending) => handle_recurring_pending(spec, status, clock, observed_generation),
        Some(ConditionType::RecurringActive) | Some(ConditionType::Active) => {
            handle_active(spec, status, clock, observed_generation)
        }
        Some(ConditionType::Denied)
        | Some(ConditionType::Expired)
        | Some(ConditionType::Revoked)
        | Some(ConditionType::Failed) => RequestAction::NoOp,
    }
}

fn handle_approval_gate(
    spec: &BreakglassRequestSpec,
    status: &mut BreakglassRequestStatus,
    now: DateTime<Utc>,
    observed_generation: i64,
) -> RequestAction {
    if spec.approval.required && status.approved_by.is_empty() {
        conditions::set_condition(
            &mut status.conditions,
            ConditionType::Pending,
            "WaitingForApproval",
            messages::WAITING_FOR_APPROVAL,
            Some(observed_generation),
            now,
        );
        return RequestAction::Requeue(APPROVAL_POLL);
    }
    conditions::set_condition(
        &mut status.conditions,
        ConditionType::RecurringPending,
        "Scheduled",
        "approval satisfied; delegating to the recurrence scheduler",
        Some(observed_generation),
        now,
    );
    RequestAction::Requeue(Duration::ZERO)
}

fn handle_recurring_pending(
    spec: &BreakglassRequestSpec,
    status: &mut BreakglassRequestStatus,
    clock: &dyn Clock,
    observed_generation: i64,
) -> RequestAction {
    let now = clock.now();
    if conditions::latest_condition(&status.conditions) != Some(ConditionType::RecurringPending) {
        conditions::set_condition(
            &mut status.conditions,
            ConditionType::RecurringPending,
            "Scheduled",
            "entering recurrence scheduling",
            Some(observed_generation),
            now,
        );
        return RequestAction::Requeue(Duration::ZERO);
    }

    if recurrence::process(spec, status, clock, observed_generation).is_err() {
        // `recurrence::process` already recorded the `Failed` condition.
        return RequestAction::NoOp;
    }

    if recurrence::should_activate(spec, status, now) {
        return RequestAction::Grant;
    }

    let next = schedule::parse_timestamp(status.next_activation_at.as_deref());
    RequestAction::Requeue(clamp_requeue(clock.until(next)))
}

fn handle_active(
    spec: &BreakglassRequestSpec,
    status: &mut BreakglassRequestStatus,
    clock: &dyn Clock,
    observed_generation: i64,
) -> RequestAction {
    let now = clock.now();
    let Some((_, end)) = schedule::current_window(spec, status, now) else {
        return RequestAction::Revoke;
    };
    if clock.is_expired(Some(end)) {
        return RequestAction::Revoke;
    }
    // Drift correction only; the result of `process` doesn't change the
    // action for an already-active window.
    let _ = recurrence::process(spec, status, clock, observed_generation);
    RequestAction::Requeue(clamp_requeue(clock.until(Some(end))))
}

pub(crate) fn clamp_requeue(remaining: Option<chrono::Duration>) -> Duration {
    match remaining.and_then(|d| d.to_std().ok()) {
        Some(d) => d.clamp(MIN_REQUEUE, MAX_REQUEUE),
        None => MIN_REQUEUE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use breakglass_types::{ApprovalSpec, Subject, SubjectKind};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn base_spec() -> BreakglassRequestSpec {
        let mut spec = BreakglassRequestSpec::default();
        spec.subjects = vec![Subject {
            kind: SubjectKind::User,
            name: "alice".to_string(),
            namespace: None,
        }];
        spec.cluster_roles = vec!["admin".to_string()];
        spec
    }

    #[test]
    fn empty_conditions_emit_pending_and_requeue_immediately() {
        let spec = base_spec();
        let mut status = BreakglassRequestStatus::default();
        let clock = FixedClock(at("2024-01-01T00:00:00Z"));
        let action = dispatch(&spec, &mut status, &clock, 1);
        assert_eq!(action, RequestAction::Requeue(Duration::ZERO));
        assert_eq!(conditions::latest_condition(&status.conditions), Some(ConditionType::Pending));
    }

    #[test]
    fn pending_blocks_on_required_approval() {
        let mut spec = base_spec();
        spec.approval = ApprovalSpec { required: true };
        let mut status = BreakglassRequestStatus::default();
        conditions::set_condition(&mut status.conditions, ConditionType::Pending, "NewResource", "x", Some(1), at("2024-01-01T00:00:00Z"));
        let clock = FixedClock(at("2024-01-01T00:00:01Z"));
        let action = dispatch(&spec, &mut status, &clock, 1);
        assert_eq!(action, RequestAction::Requeue(APPROVAL_POLL));
        assert_eq!(status.conditions.last().unwrap().reason, "WaitingForApproval");
    }

    #[test]
    fn pending_proceeds_once_approved() {
        let mut spec = base_spec();
        spec.approval = ApprovalSpec { required: true };
        let mut status = BreakglassRequestStatus::default();
        status.approved_by = "carol".to_string();
        conditions::set_condition(&mut status.conditions, ConditionType::Pending, "NewResource", "x", Some(1), at("2024-01-01T00:00:00Z"));
        let clock = FixedClock(at("2024-01-01T00:00:01Z"));
        dispatch(&spec, &mut status, &clock, 1);
        assert_eq!(conditions::latest_condition(&status.conditions), Some(ConditionType::RecurringPending));
    }

    #[test]
    fn recurring_pending_grants_once_due() {
        let mut spec = base_spec();
        spec.schedule.start = Some("2024-01-01T10:00:00Z".to_string());
        spec.schedule.duration = "1h".to_string();
        let mut status = BreakglassRequestStatus::default();
        status.next_activation_at = Some("2024-01-01T10:00:00Z".to_string());
        conditions::set_condition(&mut status.conditions, ConditionType::RecurringPending, "Scheduled", "x", Some(1), at("2024-01-01T09:00:00Z"));
        let clock = FixedClock(at("2024-01-01T10:00:01Z"));
        let action = dispatch(&spec, &mut status, &clock, 1);
        assert_eq!(action, RequestAction::Grant);
    }

    #[test]
    fn active_window_revokes_once_expired() {
        let mut spec = base_spec();
        spec.schedule.start = Some("2024-01-01T10:00:00Z".to_string());
        spec.schedule.duration = "1h".to_string();
        let mut status = BreakglassRequestStatus::default();
        status.granted_at = Some("2024-01-01T10:00:00Z".to_string());
        conditions::set_condition(&mut status.conditions, ConditionType::RecurringActive, "Activated", "x", Some(1), at("2024-01-01T10:00:00Z"));
        let clock = FixedClock(at("2024-01-01T11:00:01Z"));
        let action = dispatch(&spec, &mut status, &clock, 1);
        assert_eq!(action, RequestAction::Revoke);
    }

    #[test]
    fn terminal_conditions_are_noop() {
        for terminal in [ConditionType::Denied, ConditionType::Expired, ConditionType::Revoked, ConditionType::Failed] {
            let spec = base_spec();
            let mut status = BreakglassRequestStatus::default();
            conditions::set_condition(&mut status.conditions, terminal, "x", "x", Some(1), at("2024-01-01T00:00:00Z"));
            let clock = FixedClock(at("2024-01-01T00:01:00Z"));
            assert_eq!(dispatch(&spec, &mut status, &clock, 1), RequestAction::NoOp);
        }
    }
}
