use chrono::{DateTime, Utc};

/// Abstracts "now" so the reconciliation logic is deterministically
/// testable. Every time-sensitive call in this crate takes a `&dyn Clock`
/// rather than reading `Utc::now()` directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Time remaining until `t`. `None` for `t` means "no expiry" and
    /// yields `None` back.
    fn until(&self, t: Option<DateTime<Utc>>) -> Option<chrono::Duration> {
        let t = t?;
        let now = self.now();
        Some(if t <= now { chrono::Duration::zero() } else { t - now })
    }

    /// False for `t = None` ("no expiry").
    fn is_expired(&self, t: Option<DateTime<Utc>>) -> bool {
        match t {
            None => false,
            Some(t) => self.now() >= t,
        }
    }
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
#[derive(Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        Utc.datetime_from_str(s, "%Y-%m-%dT%H:%M:%SZ").unwrap()
    }

    #[test]
    fn until_none_means_no_expiry() {
        let clock = FixedClock(at("2024-01-01T10:00:00Z"));
        assert_eq!(clock.until(None), None);
    }

    #[test]
    fn until_past_time_is_zero() {
        let clock = FixedClock(at("2024-01-01T10:00:00Z"));
        let past = at("2024-01-01T09:00:00Z");
        assert_eq!(clock.until(Some(past)), Some(chrono::Duration::zero()));
    }

    #[test]
    fn until_future_time_is_positive() {
        let clock = FixedClock(at("2024-01-01T10:00:00Z"));
        let future = at("2024-01-01T11:00:00Z");
        assert_eq!(clock.until(Some(future)), Some(chrono::Duration::hours(1)));
    }

    #[test]
    fn is_expired_false_for_none() {
        let clock = FixedClock(at("2024-01-01T10:00:00Z"));
        assert!(!clock.is_expired(None));
    }

    #[test]
    fn is_expired_true_once_now_passes_t() {
        let clock = FixedClock(at("2024-01-01T10:00:00Z"));
        assert!(clock.is_expired(Some(at("2024-01-01T09:59:00Z"))));
        assert!(!clock.is_expired(Some(at("2024-01-01T10:01:00Z"))));
    }
}
