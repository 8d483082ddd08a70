use breakglass_types::{Condition, ConditionType};
use chrono::{DateTime, Utc};

/// Replaces-or-appends the condition with the given `type_`, sets its
/// status to `"True"`, and stamps `lastTransitionTime = now`.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) {
    let message = message.into();
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        existing.status = "True".to_string();
        existing.reason = reason.to_string();
        existing.message = message;
        existing.last_transition_time = now.to_rfc3339();
        existing.observed_generation = observed_generation;
    } else {
        conditions.push(Condition {
            type_,
            status: "True".to_string(),
            reason: reason.to_string(),
            message,
            last_transition_time: now.to_rfc3339(),
            observed_generation,
        });
    }
}

/// The condition with the greatest `lastTransitionTime`, i.e. the current
/// state of the request.
pub fn latest_condition(conditions: &[Condition]) -> Option<ConditionType> {
    conditions
        .iter()
        .max_by_key(|c| c.last_transition_time.clone())
        .map(|c| c.type_)
}

/// The condition entry of the given `type_`, if one has been recorded.
pub fn find_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn set_condition_appends_new() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::Pending,
            "NewResource",
            "first observation",
            Some(1),
            at("2024-01-01T00:00:00Z"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, ConditionType::Pending);
        assert_eq!(conditions[0].status, "True");
    }

    #[test]
    fn set_condition_replaces_existing_by_type() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::Pending,
            "NewResource",
            "first",
            Some(1),
            at("2024-01-01T00:00:00Z"),
        );
        set_condition(
            &mut conditions,
            ConditionType::Pending,
            "WaitingForApproval",
            "second",
            Some(1),
            at("2024-01-01T00:05:00Z"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, "WaitingForApproval");
        assert_eq!(conditions[0].message, "second");
    }

    #[test]
    fn latest_condition_picks_greatest_timestamp() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::Pending,
            "NewResource",
            "a",
            Some(1),
            at("2024-01-01T00:00:00Z"),
        );
        set_condition(
            &mut conditions,
            ConditionType::RecurringPending,
            "Scheduled",
            "b",
            Some(1),
            at("2024-01-01T00:05:00Z"),
        );
        assert_eq!(latest_condition(&conditions), Some(ConditionType::RecurringPending));
    }

    #[test]
    fn latest_condition_empty_is_none() {
        assert_eq!(latest_condition(&[]), None);
    }
}
