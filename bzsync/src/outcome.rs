//! Classifies the page Bugzilla answers with after a form submission.

use crate::error::ProtocolError;
use scraper::{Html, Selector};

const COLLISION_MARKER: &str = "Mid-air collision!";
const STALE_TOKEN_MARKER: &str = "reason=invalid_token";
const SUCCESS_MARKER: &str = "Changes submitted for";
const BOILERPLATE: &str = "Please go back";
const MATCH_FAILED: &str = "Match Failed";

/// Result of a submission, as told by the response page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Collision,
    StaleToken,
    AmbiguousMatch,
    GenericMessage(String),
}

impl Outcome {
    pub fn into_result(self) -> Result<(), ProtocolError> {
        match self {
            Outcome::Success => Ok(()),
            Outcome::Collision => Err(ProtocolError::Collision { modified_at: None }),
            Outcome::StaleToken => Err(ProtocolError::StaleToken),
            Outcome::AmbiguousMatch => Err(ProtocolError::AmbiguousMatch),
            Outcome::GenericMessage(text) => Err(ProtocolError::Message(text)),
        }
    }
}

/// Classifies a response page.
///
/// Literal markers are checked first, in order: collision, stale token,
/// success. Anything else is described by the page's paragraphs.
pub fn classify(html: &str) -> Outcome {
    if html.contains(COLLISION_MARKER) {
        return Outcome::Collision;
    }
    if html.contains(STALE_TOKEN_MARKER) {
        return Outcome::StaleToken;
    }
    if html.contains(SUCCESS_MARKER) {
        return Outcome::Success;
    }

    let messages = paragraphs(html);
    if messages.is_empty() {
        return Outcome::GenericMessage("unknown error".to_string());
    }
    let joined = messages.join("; ");
    if joined.contains(MATCH_FAILED) {
        return Outcome::AmbiguousMatch;
    }
    Outcome::GenericMessage(joined)
}

fn paragraphs(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("p") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .map(|p| {
            p.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|text| !text.is_empty() && !text.contains(BOILERPLATE))
        .collect()
}
