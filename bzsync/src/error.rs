//! Error taxonomy for reads and updates.
//!
//! Every failure falls in one of three kinds so callers can tell a fatal
//! misconfiguration ([`Error::Request`]) from a transport or decoding problem
//! ([`Error::Connection`]) and from something the server or the edit form
//! rejected ([`Error::Protocol`]).

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot build request: {0}")]
    Request(#[from] RequestError),

    #[error("cannot communicate with server: {0}")]
    Connection(#[from] ConnectionError),

    #[error("error from Bugzilla: {0}")]
    Protocol(#[from] ProtocolError),
}

impl Error {
    /// Whether re-fetching the bug and trying again may succeed.
    pub fn is_retryable(&self) -> bool {
        self.retry_hint().is_some()
    }

    /// What to do before retrying, for the retryable kinds.
    pub fn retry_hint(&self) -> Option<&'static str> {
        match self {
            Error::Protocol(ProtocolError::Collision { .. }) => {
                Some("the bug changed since it was fetched; fetch it again and retry")
            }
            Error::Protocol(ProtocolError::StaleToken) => {
                Some("the edit session expired; run the update again")
            }
            _ => None,
        }
    }

    pub fn is_collision(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::Collision { .. }))
    }
}

/// A local input prevented building a request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid base URL {url:?}: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("base URL {0:?} cannot carry a path")]
    CannotBeABase(String),

    #[error("cannot resolve form action {action:?}: {source}")]
    FormAction {
        action: String,
        #[source]
        source: url::ParseError,
    },
}

/// Transport or decode failure.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("{context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{reason} (HTTP {status})")]
    Status { status: u16, reason: String },

    #[error("response exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("response is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("the response is not a bug export, the URL or credentials might be incorrect")]
    NotBugzilla,

    #[error("code: {code}")]
    ServerReported { code: String },

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("{0}")]
    Header(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The edit form or the server rejected the operation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("mid-air collision{}", collision_suffix(.modified_at))]
    Collision { modified_at: Option<DateTime<Utc>> },

    #[error("invalid token, the edit session expired")]
    StaleToken,

    #[error("Bugzilla was unable to make any match at all for one or more of the names and/or email addresses")]
    AmbiguousMatch,

    #[error("Message: {0}")]
    Message(String),

    #[error("no control found for the email {email}")]
    NeedinfoNotFound { email: String },

    #[error("more than one needinfo found")]
    AmbiguousNeedinfo,

    #[error("invalid priority value: {0}")]
    InvalidPriority(String),

    #[error("invalid change: {0}")]
    Validation(String),

    #[error("failed to find the change form in the bug page")]
    MissingForm,

    #[error("can't detect mid-air collision without delta_ts in the bug form")]
    MissingDeltaTs,

    #[error("failed to parse delta_ts {0:?} to prevent mid-air collision")]
    BadDeltaTs(String),

    #[error("no form control named {0:?}")]
    UnknownControl(String),

    #[error("invalid selector {0:?}")]
    Selector(String),
}

fn collision_suffix(modified_at: &Option<DateTime<Utc>>) -> String {
    match modified_at {
        Some(t) => format!(": the bug has been updated at {}", t),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn collision_and_stale_token_are_retryable() {
        assert!(Error::from(ProtocolError::Collision { modified_at: None }).is_retryable());
        assert!(Error::from(ProtocolError::StaleToken).is_retryable());
        assert!(!Error::from(ProtocolError::InvalidPriority("x".into())).is_retryable());
        assert!(!Error::from(ConnectionError::NotBugzilla).is_retryable());
    }

    #[test]
    fn retry_hint_depends_on_the_kind() {
        let collision = Error::from(ProtocolError::Collision { modified_at: None });
        assert!(collision.retry_hint().unwrap().contains("bug changed"));

        let stale = Error::from(ProtocolError::StaleToken);
        let hint = stale.retry_hint().unwrap();
        assert!(hint.contains("session expired"));
        assert!(!hint.contains("bug changed"));

        assert_eq!(Error::from(ProtocolError::AmbiguousMatch).retry_hint(), None);
    }

    #[test]
    fn collision_message_names_the_instant() {
        let at = Utc.with_ymd_and_hms(2019, 3, 28, 11, 40, 39).unwrap();
        let err = Error::from(ProtocolError::Collision { modified_at: Some(at) });
        let text = err.to_string();
        assert!(text.contains("collision"));
        assert!(text.contains("2019-03-28 11:40:39"));
    }

    #[test]
    fn server_code_is_surfaced() {
        let err = Error::from(ConnectionError::ServerReported {
            code: "NotPermitted".into(),
        });
        assert!(err.to_string().contains("NotPermitted"));
    }
}
