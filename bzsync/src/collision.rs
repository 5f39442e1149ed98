//! Optimistic-concurrency precondition for updates.

use crate::decode::parse_form_time;
use crate::error::ProtocolError;
use crate::form::ChangeForm;
use chrono::{DateTime, Utc};
use log::debug;

/// Name of the hidden field carrying the bug's last modification time.
pub const DELTA_TS_FIELD: &str = "delta_ts";

/// Reads the modification instant embedded in the edit form.
pub fn form_delta_ts(form: &ChangeForm) -> Result<DateTime<Utc>, ProtocolError> {
    let raw = form.value(DELTA_TS_FIELD).ok_or(ProtocolError::MissingDeltaTs)?;
    parse_form_time(raw).map_err(|_| ProtocolError::BadDeltaTs(raw.to_string()))
}

/// Fails with a collision when the form was rendered for a different
/// modification than the one the caller last saw.
pub fn check(form: &ChangeForm, expected: DateTime<Utc>) -> Result<(), ProtocolError> {
    let current = form_delta_ts(form)?;
    if current != expected {
        debug!("delta_ts moved from {} to {}", expected, current);
        return Err(ProtocolError::Collision {
            modified_at: Some(current),
        });
    }
    Ok(())
}
