//! Finds the checkboxes that clear outstanding needinfo requests.
//!
//! The page renders each outstanding request twice, in unrelated places: a
//! `requestee-<flag id>` input carrying the requestee's email inside the flag
//! table, and a `needinfo_override_<flag id>` checkbox further down. The two
//! are tied together only by the shared flag id suffix.

use crate::error::ProtocolError;
use crate::form::ChangeForm;

const REQUESTEE_PREFIX: &str = "requestee-";
const OVERRIDE_PREFIX: &str = "needinfo_override_";

/// Returns the id of the checkbox clearing the needinfo requested from
/// `email`.
///
/// When several outstanding requests target the same email, the last one in
/// document order is returned.
pub fn locate_needinfo_clear_control(form: &ChangeForm, email: &str) -> Result<String, ProtocolError> {
    let mut control = None;

    for requestee in form.select(&format!(r#"input[name^="{}"]"#, REQUESTEE_PREFIX))? {
        if requestee.attr("value") != Some(email) {
            continue;
        }
        let suffix = match requestee.name().and_then(|n| n.strip_prefix(REQUESTEE_PREFIX)) {
            Some(suffix) => suffix,
            None => continue,
        };
        let override_name = format!("{}{}", OVERRIDE_PREFIX, suffix);
        for candidate in form.select(&format!(r#"input[name="{}"]"#, override_name))? {
            control = Some(candidate.id().unwrap_or(override_name.as_str()).to_string());
        }
    }

    control.ok_or_else(|| ProtocolError::NeedinfoNotFound {
        email: email.to_string(),
    })
}

/// Returns the ids of every needinfo clearing checkbox on the page.
///
/// With `require_single` set, more than one outstanding request is an error
/// instead of a list.
pub fn locate_all_needinfo_clear_controls(
    form: &ChangeForm,
    require_single: bool,
) -> Result<Vec<String>, ProtocolError> {
    let controls: Vec<String> = form
        .select(&format!(r#"input[id^="{}"]"#, OVERRIDE_PREFIX))?
        .into_iter()
        .filter_map(|el| el.id().map(str::to_string))
        .collect();

    if require_single && controls.len() > 1 {
        return Err(ProtocolError::AmbiguousNeedinfo);
    }
    Ok(controls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    const SHOW_BUG: &str = include_str!("../tests/fixtures/show_bug.html");

    fn open(html: &str) -> ChangeForm {
        let url = Url::parse("https://bugzilla.example.com/show_bug.cgi?id=1047068").unwrap();
        ChangeForm::parse(url, html, "form[name=changeform]").unwrap()
    }

    fn with_second_needinfo() -> String {
        SHOW_BUG
            .replace("<!--EXTRANEEDINFO", "")
            .replace("EXTRANEEDINFO-->", "")
    }

    #[test]
    fn finds_the_override_for_an_email() {
        let form = open(SHOW_BUG);
        assert_eq!(
            locate_needinfo_clear_control(&form, "user@foobar.com").unwrap(),
            "needinfo_override_201661"
        );
    }

    #[test]
    fn last_match_wins_for_duplicate_requests() {
        let form = open(&with_second_needinfo());
        assert_eq!(
            locate_needinfo_clear_control(&form, "user@foobar.com").unwrap(),
            "needinfo_override_201662"
        );
    }

    #[test]
    fn other_requestees_are_ignored() {
        let html = with_second_needinfo().replace(
            r#"value="user&#64;foobar.com" class="requestee"  id="requestee-201662""#,
            r#"value="user2&#64;foobar.com" class="requestee"  id="requestee-201662""#,
        );
        let form = open(&html);
        assert_eq!(
            locate_needinfo_clear_control(&form, "user@foobar.com").unwrap(),
            "needinfo_override_201661"
        );
        assert_eq!(
            locate_needinfo_clear_control(&form, "user2@foobar.com").unwrap(),
            "needinfo_override_201662"
        );
    }

    #[test]
    fn unknown_email_is_not_found() {
        let form = open(SHOW_BUG);
        let err = locate_needinfo_clear_control(&form, "nobody@foobar.com").unwrap_err();
        assert!(matches!(err, ProtocolError::NeedinfoNotFound { .. }));
        assert!(err.to_string().contains("nobody@foobar.com"));
    }

    #[test]
    fn requestee_without_override_is_not_found() {
        // The SHIP_STOPPER flag has a requestee input but no override box.
        let html = SHOW_BUG
            .replace("requestee-201661", "requestee-999")
            .replace("user&#64;foobar.com\" class=\"requestee\"  id=\"requestee-201662\"", "x\" id=\"r2\"");
        let form = open(&html);
        let err = locate_needinfo_clear_control(&form, "user@foobar.com").unwrap_err();
        assert!(matches!(err, ProtocolError::NeedinfoNotFound { .. }));
    }

    #[test]
    fn single_request_is_returned() {
        let form = open(SHOW_BUG);
        assert_eq!(
            locate_all_needinfo_clear_controls(&form, true).unwrap(),
            vec!["needinfo_override_201661"]
        );
    }

    #[test]
    fn two_requests_are_ambiguous_when_one_is_required() {
        let form = open(&with_second_needinfo());
        assert!(matches!(
            locate_all_needinfo_clear_controls(&form, true),
            Err(ProtocolError::AmbiguousNeedinfo)
        ));
        assert_eq!(
            locate_all_needinfo_clear_controls(&form, false).unwrap(),
            vec!["needinfo_override_201661", "needinfo_override_201662"]
        );
    }
}
