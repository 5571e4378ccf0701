use crate::app::result::Status;
use crate::connection::ClientError;
use crate::time::DateError;
use thiserror::Error;

/// Result of a test body. `Ok(())` passes the test.
pub type Outcome = Result<(), Signal>;

/// Everything a test body can raise. The test wrapper is the only place
/// these are caught.
#[derive(Debug, Error)]
pub enum Signal {
    #[error("{message}")]
    AssertionFailure {
        message: String,
        details: Option<String>,
    },
    #[error("{message}")]
    Skip {
        message: String,
        details: Option<String>,
    },
    #[error("{0}")]
    Todo(String),
    #[error("{0}")]
    Pass(String),
    #[error("{0}")]
    Omit(String),
    #[error("Waiting at endpoint /{endpoint}")]
    Wait {
        endpoint: String,
        redirect_to: Option<String>,
    },
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("Fatal Error: {0}")]
    Unclassified(String),
}

impl Signal {
    pub fn fail(message: impl Into<String>) -> Self {
        Signal::AssertionFailure {
            message: message.into(),
            details: None,
        }
    }

    pub fn fail_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Signal::AssertionFailure {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Signal::Skip {
            message: message.into(),
            details: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Signal::Unclassified(message.into())
    }

    pub fn status(&self) -> Status {
        match self {
            Signal::AssertionFailure { .. } => Status::Fail,
            Signal::Skip { .. } => Status::Skip,
            Signal::Todo(_) => Status::Todo,
            Signal::Pass(_) => Status::Pass,
            Signal::Omit(_) => Status::Omit,
            Signal::Wait { .. } => Status::Wait,
            Signal::Client(_) | Signal::Unclassified(_) => Status::Error,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Signal::AssertionFailure { details, .. } | Signal::Skip { details, .. } => {
                details.as_deref()
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Signal {
    fn from(err: serde_json::Error) -> Self {
        Signal::Unclassified(format!("Unable to process JSON: {}", err))
    }
}

impl From<liquid::Error> for Signal {
    fn from(err: liquid::Error) -> Self {
        Signal::Unclassified(format!("Unable to render template: {}", err))
    }
}

impl From<DateError> for Signal {
    fn from(err: DateError) -> Self {
        Signal::AssertionFailure {
            message: err.to_string(),
            details: None,
        }
    }
}

impl From<url::ParseError> for Signal {
    fn from(err: url::ParseError) -> Self {
        Signal::Unclassified(format!("Invalid URL: {}", err))
    }
}

pub fn skip<T>(message: impl Into<String>) -> Result<T, Signal> {
    Err(Signal::skip(message))
}

pub fn skip_if(condition: bool, message: impl Into<String>) -> Outcome {
    if condition {
        skip(message)
    } else {
        Ok(())
    }
}

pub fn skip_unless(condition: bool, message: impl Into<String>) -> Outcome {
    skip_if(!condition, message)
}

pub fn omit<T>(message: impl Into<String>) -> Result<T, Signal> {
    Err(Signal::Omit(message.into()))
}

pub fn omit_if(condition: bool, message: impl Into<String>) -> Outcome {
    if condition {
        omit(message)
    } else {
        Ok(())
    }
}

pub fn todo<T>(message: impl Into<String>) -> Result<T, Signal> {
    Err(Signal::Todo(message.into()))
}

pub fn pass<T>(message: impl Into<String>) -> Result<T, Signal> {
    Err(Signal::Pass(message.into()))
}

/// Suspends the run until a callback reaches `endpoint`.
pub fn wait_at_endpoint<T>(endpoint: impl Into<String>, redirect_to: Option<String>) -> Result<T, Signal> {
    Err(Signal::Wait {
        endpoint: endpoint.into(),
        redirect_to,
    })
}
