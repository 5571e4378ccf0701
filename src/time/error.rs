use thiserror::Error;

/// Failures raised while reading date literals or search targets.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum DateError {
    #[error("'{0}' is not a valid date, dateTime or instant literal")]
    Syntax(String),
    #[error("'{0}' is out of range: {1}")]
    OutOfRange(String, &'static str),
    #[error("Unknown search comparator '{0}'")]
    UnknownComparator(String),
    #[error("Invalid search target: {0}")]
    InvalidTarget(String),
}
