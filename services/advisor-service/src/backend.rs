use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::session::ItemSession;

const QUOTA_STATUS: u16 = 429;
const QUOTA_STATUS_NAME: &str = "RESOURCE_EXHAUSTED";

#[derive(Debug, Error)]
pub enum BackendError {
    /// Non-2xx reply from the model API.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("empty response from {0}")]
    Empty(String),

    /// The agent ran but refused to answer, e.g. a blocked prompt.
    #[error("{0}")]
    Agent(String),
}

/// How a failed row should be treated by the batch executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Quota or rate limit; resubmitting the batch later should succeed.
    Transient,
    Permanent,
}

impl BackendError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            BackendError::Status { status, message } => {
                if *status == QUOTA_STATUS {
                    return ErrorClass::Transient;
                }
                // Google APIs put the canonical code in `error.status`/`error.code`.
                match serde_json::from_str::<Value>(message) {
                    Ok(body) => classify_error_body(&body),
                    Err(_) => classify_message(message),
                }
            }
            BackendError::Agent(message) => classify_message(message),
            BackendError::Network(_) | BackendError::Parse(_) | BackendError::Empty(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

fn classify_error_body(body: &Value) -> ErrorClass {
    let error = &body["error"];
    let exhausted = error["status"].as_str() == Some(QUOTA_STATUS_NAME)
        || error["code"].as_u64() == Some(u64::from(QUOTA_STATUS));
    if exhausted {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Free-text check: `429` or `RESOURCE_EXHAUSTED` must stand as a whole
/// token, so ids such as `cust-4291` do not read as a quota error.
fn classify_message(message: &str) -> ErrorClass {
    let quota_token = message
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .any(|token| token == "429" || token == QUOTA_STATUS_NAME);
    if quota_token {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => BackendError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None if err.is_decode() => BackendError::Parse(err.to_string()),
            None => BackendError::Network(err.to_string()),
        }
    }
}

/// The agent that analyses one row.
///
/// `run` drives the agent to completion inside `session` and leaves its
/// named outputs in `session.state`; `report` turns that final state into
/// the row's reply.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn run(&self, session: &mut ItemSession, prompt: &str) -> Result<(), BackendError>;

    fn report(&self, session: &ItemSession) -> Value {
        Value::Object(session.state.clone().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_status_is_transient() {
        let err = BackendError::Status {
            status: 429,
            message: "slow down".to_string(),
        };
        assert_eq!(err.classify(), ErrorClass::Transient);
    }

    #[test]
    fn resource_exhausted_body_is_transient() {
        let err = BackendError::Status {
            status: 503,
            message: r#"{"error":{"code":503,"status":"RESOURCE_EXHAUSTED"}}"#.to_string(),
        };
        assert_eq!(err.classify(), ErrorClass::Transient);
        assert_eq!(
            BackendError::Agent("upstream said 429 Too Many Requests".to_string()).classify(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn row_ids_containing_429_stay_permanent() {
        let err = BackendError::Agent(
            r#"ValueError: bad row Analyze Customer Record: ["cust-4291"]"#.to_string(),
        );
        assert_eq!(err.classify(), ErrorClass::Permanent);
        assert_eq!(classify_message("no such customer cust-429"), ErrorClass::Permanent);
    }

    #[test]
    fn status_body_echoing_row_stays_permanent() {
        let err = BackendError::Status {
            status: 400,
            message: r#"{"error":{"code":400,"status":"INVALID_ARGUMENT","message":"bad 429 row"}}"#
                .to_string(),
        };
        assert_eq!(err.classify(), ErrorClass::Permanent);
    }

    #[test]
    fn other_errors_are_permanent() {
        let err = BackendError::Agent("ValueError: bad row".to_string());
        assert_eq!(err.classify(), ErrorClass::Permanent);
        let err = BackendError::Status {
            status: 400,
            message: "INVALID_ARGUMENT".to_string(),
        };
        assert_eq!(err.classify(), ErrorClass::Permanent);
        let err = BackendError::Network("connection reset after 429ms".to_string());
        assert_eq!(err.classify(), ErrorClass::Permanent);
    }
}
