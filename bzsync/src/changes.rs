//! Applies a [`Changes`] description to an open edit form.

use crate::error::ProtocolError;
use crate::form::ChangeForm;
use crate::locate::{locate_all_needinfo_clear_controls, locate_needinfo_clear_control};
use crate::types::{given, Changes, Priority};
use log::debug;

/// Bookkeeping fields that make the server reject an otherwise valid
/// submission when sent back untouched.
const STRIPPED_FIELDS: [&str; 3] = [
    "defined_cclist_accessible",
    "defined_reporter_accessible",
    "defined_group",
];

/// Checks the parts of `changes` that can be rejected without the form.
pub fn validate(changes: &Changes) -> Result<Option<Priority>, ProtocolError> {
    if changes.check_delta_ts && changes.delta_ts.is_none() {
        return Err(ProtocolError::Validation(
            "a collision check needs the last seen delta_ts".to_string(),
        ));
    }
    given(&changes.set_priority)
        .map(|p| p.parse::<Priority>().map_err(|_| ProtocolError::InvalidPriority(p.to_string())))
        .transpose()
}

/// Writes every requested change into `form`.
///
/// Validation runs before the first write, so a rejected change leaves the
/// form untouched.
pub fn apply(form: &mut ChangeForm, changes: &Changes) -> Result<(), ProtocolError> {
    let priority = validate(changes)?;

    if let Some(email) = given(&changes.set_needinfo) {
        form.set("needinfo", "1");
        form.set("needinfo_role", "other");
        form.set("needinfo_from", email);
    }
    if let Some(email) = given(&changes.remove_needinfo) {
        let control = locate_needinfo_clear_control(form, email)?;
        tick(form, &control);
    }
    if changes.clear_needinfo {
        let controls = locate_all_needinfo_clear_controls(form, !changes.clear_all_needinfos)?;
        debug!("clearing {} needinfo request(s)", controls.len());
        for control in &controls {
            tick(form, control);
        }
    }
    if let Some(comment) = given(&changes.add_comment) {
        form.set("comment", comment);
        if changes.comment_is_private {
            form.set("comment_is_private", "1");
            form.set("commentprivacy", "1");
        }
    }
    if let Some(url) = given(&changes.set_url) {
        form.set("bug_file_loc", url);
    }
    if let Some(assignee) = given(&changes.set_assignee) {
        form.set("assigned_to", assignee);
    }
    if let Some(summary) = given(&changes.set_description) {
        form.set("short_desc", summary);
    }
    if let Some(priority) = priority {
        form.set("priority", priority.form_value());
    }
    if let Some(cc) = given(&changes.add_cc) {
        form.set("newcc", cc);
    }
    if let Some(cc) = given(&changes.remove_cc) {
        form.set("cc", cc);
        form.set("removecc", "1");
    }
    if changes.cc_myself {
        form.set("addselfcc", "1");
    }
    if let Some(whiteboard) = given(&changes.set_whiteboard) {
        form.set("status_whiteboard", whiteboard);
    }
    if let Some(status) = given(&changes.set_status) {
        form.set("bug_status", status);
    }
    if let Some(resolution) = given(&changes.set_resolution) {
        form.set("resolution", resolution);
    }
    if let Some(dup) = changes.duplicate_of() {
        form.set("dup_id", &dup.to_string());
    }

    for name in STRIPPED_FIELDS {
        form.remove(name);
    }
    Ok(())
}

// Checkbox located by id; falls back to a plain field when the page has no
// matching checkbox.
fn tick(form: &mut ChangeForm, control: &str) {
    if form.check(control).is_err() {
        form.set(control, "1");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use url::Url;

    const SHOW_BUG: &str = include_str!("../tests/fixtures/show_bug.html");

    fn open(html: &str) -> ChangeForm {
        let url = Url::parse("https://bugzilla.example.com/show_bug.cgi?id=1047068").unwrap();
        ChangeForm::parse(url, html, "form[name=changeform]").unwrap()
    }

    fn values<'a>(submitted: &'a [(String, String)], name: &str) -> Vec<&'a str> {
        submitted
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn private_comment_sets_both_privacy_fields() {
        let mut form = open(SHOW_BUG);
        let changes = Changes {
            add_comment: Some("This is a comment".into()),
            comment_is_private: true,
            ..Default::default()
        };
        apply(&mut form, &changes).unwrap();

        let submitted = form.submission();
        assert_eq!(values(&submitted, "comment"), vec!["This is a comment"]);
        assert_eq!(values(&submitted, "comment_is_private"), vec!["1"]);
        assert_eq!(values(&submitted, "commentprivacy"), vec!["1"]);
    }

    #[test]
    fn workaround_fields_are_always_stripped() {
        let mut form = open(SHOW_BUG);
        apply(&mut form, &Changes::default()).unwrap();
        let submitted = form.submission();
        for name in STRIPPED_FIELDS {
            assert!(values(&submitted, name).is_empty(), "{} was submitted", name);
        }
        assert_eq!(values(&submitted, "groups"), vec!["foobaronly"]);
        assert_eq!(values(&submitted, "defined_isprivate_7315202"), vec!["1"]);
    }

    #[test]
    fn empty_strings_change_nothing() {
        let blank = Changes {
            add_comment: Some(String::new()),
            set_priority: Some(String::new()),
            set_url: Some(String::new()),
            set_needinfo: Some(String::new()),
            remove_needinfo: Some(String::new()),
            set_duplicate: Some(0),
            ..Default::default()
        };
        assert!(blank.is_empty());
        assert_eq!(validate(&blank).unwrap(), None);

        let mut untouched = open(SHOW_BUG);
        apply(&mut untouched, &Changes::default()).unwrap();
        let mut form = open(SHOW_BUG);
        apply(&mut form, &blank).unwrap();
        assert_eq!(form.submission(), untouched.submission());
    }

    #[test]
    fn priority_is_sent_in_long_form() {
        let mut form = open(SHOW_BUG);
        let changes = Changes {
            set_priority: Some("P1".into()),
            ..Default::default()
        };
        apply(&mut form, &changes).unwrap();
        assert_eq!(form.value("priority"), Some("P1 - Urgent"));
    }

    #[test]
    fn invalid_priority_leaves_the_form_untouched() {
        let mut form = open(SHOW_BUG);
        let before = form.submission();
        let changes = Changes {
            add_comment: Some("never sent".into()),
            set_priority: Some("P9".into()),
            ..Default::default()
        };
        let err = apply(&mut form, &changes).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPriority(ref p) if p == "P9"));
        assert_eq!(form.submission(), before);
    }

    #[test]
    fn collision_check_without_instant_is_rejected() {
        let changes = Changes {
            check_delta_ts: true,
            ..Default::default()
        };
        assert!(matches!(validate(&changes), Err(ProtocolError::Validation(_))));

        let changes = Changes {
            check_delta_ts: true,
            delta_ts: Some(Utc.with_ymd_and_hms(2019, 3, 28, 11, 40, 39).unwrap()),
            ..Default::default()
        };
        assert!(validate(&changes).unwrap().is_none());
    }

    #[test]
    fn needinfo_request_targets_other() {
        let mut form = open(SHOW_BUG);
        let changes = Changes {
            set_needinfo: Some("user@foobar.com".into()),
            ..Default::default()
        };
        apply(&mut form, &changes).unwrap();
        assert_eq!(form.value("needinfo"), Some("1"));
        assert_eq!(form.value("needinfo_role"), Some("other"));
        assert_eq!(form.value("needinfo_from"), Some("user@foobar.com"));
    }

    #[test]
    fn remove_needinfo_ticks_the_matching_override() {
        let mut form = open(SHOW_BUG);
        let changes = Changes {
            remove_needinfo: Some("user@foobar.com".into()),
            ..Default::default()
        };
        apply(&mut form, &changes).unwrap();
        assert_eq!(form.value("needinfo_override_201661"), Some("1"));
    }

    #[test]
    fn remove_needinfo_for_a_stranger_fails() {
        let mut form = open(SHOW_BUG);
        let changes = Changes {
            remove_needinfo: Some("nobody@foobar.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            apply(&mut form, &changes),
            Err(ProtocolError::NeedinfoNotFound { .. })
        ));
    }

    #[test]
    fn clear_needinfo_respects_the_all_switch() {
        let html = SHOW_BUG
            .replace("<!--EXTRANEEDINFO", "")
            .replace("EXTRANEEDINFO-->", "");

        let mut form = open(&html);
        let one = Changes {
            clear_needinfo: true,
            ..Default::default()
        };
        assert!(matches!(
            apply(&mut form, &one),
            Err(ProtocolError::AmbiguousNeedinfo)
        ));

        let mut form = open(&html);
        let all = Changes {
            clear_needinfo: true,
            clear_all_needinfos: true,
            ..Default::default()
        };
        apply(&mut form, &all).unwrap();
        assert_eq!(form.value("needinfo_override_201661"), Some("1"));
        assert_eq!(form.value("needinfo_override_201662"), Some("1"));
    }

    #[test]
    fn cc_changes() {
        let mut form = open(SHOW_BUG);
        let changes = Changes {
            add_cc: Some("new@foobar.com".into()),
            remove_cc: Some("anotheremail@gmail.com".into()),
            cc_myself: true,
            ..Default::default()
        };
        apply(&mut form, &changes).unwrap();
        let submitted = form.submission();
        assert_eq!(values(&submitted, "newcc"), vec!["new@foobar.com"]);
        assert_eq!(values(&submitted, "cc"), vec!["anotheremail@gmail.com"]);
        assert_eq!(values(&submitted, "removecc"), vec!["1"]);
        assert_eq!(values(&submitted, "addselfcc"), vec!["1"]);
    }

    #[test]
    fn scalar_fields_are_overwritten() {
        let mut form = open(SHOW_BUG);
        let changes = Changes {
            set_url: Some("https://example.com/x".into()),
            set_assignee: Some("dev@foobar.com".into()),
            set_description: Some("new summary".into()),
            set_whiteboard: Some("wb".into()),
            set_status: Some("REOPENED".into()),
            set_resolution: Some("DUPLICATE".into()),
            set_duplicate: Some(42),
            ..Default::default()
        };
        apply(&mut form, &changes).unwrap();
        assert_eq!(form.value("bug_file_loc"), Some("https://example.com/x"));
        assert_eq!(form.value("assigned_to"), Some("dev@foobar.com"));
        assert_eq!(form.value("short_desc"), Some("new summary"));
        assert_eq!(form.value("status_whiteboard"), Some("wb"));
        assert_eq!(form.value("bug_status"), Some("REOPENED"));
        assert_eq!(form.value("resolution"), Some("DUPLICATE"));
        assert_eq!(form.value("dup_id"), Some("42"));
    }
}
