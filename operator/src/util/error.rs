use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kubernetes API error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("invalid user input: {0}")]
    UserInput(String),

    #[error("timestamp parse error: {source}")]
    Chrono {
        #[from]
        source: chrono::ParseError,
    },

    #[error("duration out of range: {source}")]
    OutOfRange {
        #[from]
        source: chrono::OutOfRangeError,
    },

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("duration parse error: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    #[error("invalid cron expression: {source}")]
    Cron {
        #[from]
        source: cron::error::Error,
    },

    #[error("invalid time zone: {0}")]
    InvalidTimeZone(String),

    #[error("rbac operation failed: {0}")]
    Rbac(#[from] crate::rbac::RbacError),

    #[error("reconcile exceeded controller.reconcileTimeout")]
    Timeout,
}
