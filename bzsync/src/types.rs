//! Core data structures for the bzsync client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bug is the canonical, normalized record produced by every decode path.
///
/// Serialized field names follow the Bugzilla export names so that the JSON
/// written to the artifact cache can be fed back through the JSON decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bug {
    pub bug_id: u64,
    #[serde(default)]
    pub short_desc: String,
    pub creation_ts: DateTime<Utc>,
    pub delta_ts: DateTime<Utc>,

    #[serde(default)]
    pub reporter: User,
    #[serde(default)]
    pub assigned_to: User,
    #[serde(default)]
    pub qa_contact: User,

    #[serde(default)]
    pub classification_id: u64,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub rep_platform: String,
    #[serde(default)]
    pub op_sys: String,
    #[serde(default)]
    pub bug_status: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub bug_severity: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub target_milestone: String,
    #[serde(default)]
    pub dup_id: u64,

    #[serde(default)]
    pub bug_file_loc: String,
    #[serde(default)]
    pub status_whiteboard: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub estimated_time: String,
    #[serde(default)]
    pub remaining_time: String,
    #[serde(default)]
    pub actual_time: String,
    #[serde(default)]
    pub votes: i64,
    #[serde(default)]
    pub comment_sort_order: String,

    #[serde(default, deserialize_with = "int_flag")]
    pub everconfirmed: bool,
    #[serde(default, deserialize_with = "int_flag")]
    pub reporter_accessible: bool,
    #[serde(default, deserialize_with = "int_flag")]
    pub cclist_accessible: bool,

    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(rename = "group", default)]
    pub groups: Vec<Group>,
    #[serde(rename = "flag", default)]
    pub flags: Vec<Flag>,
    #[serde(rename = "token", default)]
    pub tokens: Vec<String>,

    // Custom drop-down fields, one entry per occurrence in the export.
    #[serde(default)]
    pub cf_foundby: Vec<String>,
    #[serde(default)]
    pub cf_nts_priority: Vec<String>,
    #[serde(default)]
    pub cf_biz_priority: Vec<String>,
    #[serde(default)]
    pub cf_blocker: Vec<String>,
    #[serde(default)]
    pub cf_it_deployment: Vec<String>,

    #[serde(alias = "Comments", default)]
    pub comments: Vec<Comment>,
    #[serde(alias = "Attachments", default)]
    pub attachments: Vec<Attachment>,
}

impl Bug {
    /// Flags of the given name that are still outstanding (status `?`).
    pub fn pending_flags<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Flag> + 'a {
        self.flags
            .iter()
            .filter(move |f| f.name == name && f.status == "?")
    }

    /// Emails with an outstanding needinfo request on this bug.
    pub fn needinfo_requestees(&self) -> Vec<&str> {
        self.pending_flags("needinfo")
            .map(|f| f.requestee.as_str())
            .filter(|r| !r.is_empty())
            .collect()
    }
}

/// User as found in reporter, assignee, QA contact and comment author fields.
/// The email is the durable identity, the name is cosmetic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.email)
        } else {
            write!(f, "{} <{}>", self.name, self.email)
        }
    }
}

/// Group membership as seen by Bugzilla.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    // Older JSON exports spell the group name as `email`.
    #[serde(alias = "email", default)]
    pub name: String,
}

/// Flag represents flags such as needinfo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub name: String,
    pub id: u64,
    pub type_id: u64,
    pub status: String,
    #[serde(default)]
    pub setter: String,
    #[serde(default)]
    pub requestee: String,
}

/// Comment on a bug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "commentid")]
    pub id: u64,
    #[serde(rename = "comment_count", default)]
    pub count: u64,
    #[serde(default)]
    pub who: User,
    #[serde(rename = "isprivate", default, deserialize_with = "int_flag")]
    pub is_private: bool,
    #[serde(rename = "thetext", default)]
    pub text: String,
    #[serde(alias = "BugWhen")]
    pub bug_when: DateTime<Utc>,
}

/// Attachment metadata as listed in the bug export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "attachid")]
    pub id: u64,
    #[serde(default)]
    pub filename: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub attacher: User,
    #[serde(rename = "isobsolete", default, deserialize_with = "int_flag")]
    pub is_obsolete: bool,
    #[serde(rename = "ispatch", default, deserialize_with = "int_flag")]
    pub is_patch: bool,
    #[serde(rename = "isprivate", default, deserialize_with = "int_flag")]
    pub is_private: bool,
    #[serde(alias = "Date")]
    pub date: DateTime<Utc>,
    #[serde(alias = "DeltaTS")]
    pub delta_ts: DateTime<Utc>,
    #[serde(default)]
    pub token: String,
}

/// What the download endpoint tells us about an attachment: only what fits
/// in the response headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub id: u64,
    pub filename: String,
    pub size: u64,
}

/// Accepts `true`/`false` as well as the 0/1 integers Bugzilla exports.
fn int_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => Ok(b),
        Raw::Int(n) => Ok(n != 0),
        Raw::Str(s) => match s.trim() {
            "" | "0" | "false" => Ok(false),
            "1" | "true" => Ok(true),
            other => Err(serde::de::Error::custom(format!(
                "invalid flag value: {}",
                other
            ))),
        },
    }
}

/// Priority short codes accepted by the edit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
    P4,
    P5,
}

impl Priority {
    pub const ALL: [Priority; 6] = [
        Priority::P0,
        Priority::P1,
        Priority::P2,
        Priority::P3,
        Priority::P4,
        Priority::P5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
            Priority::P5 => "P5",
        }
    }

    /// The long form the web interface expects in its priority drop-down.
    pub fn form_value(&self) -> &'static str {
        match self {
            Priority::P0 => "P0 - Crit Sit",
            Priority::P1 => "P1 - Urgent",
            Priority::P2 => "P2 - High",
            Priority::P3 => "P3 - Medium",
            Priority::P4 => "P4 - Low",
            Priority::P5 => "P5 - None",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("invalid priority value: {}", s))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Changes to be performed by one update. Every field left at its default,
/// or set to an empty string, is a no-op for that aspect of the bug.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    pub set_needinfo: Option<String>,
    pub remove_needinfo: Option<String>,
    pub clear_needinfo: bool,
    pub clear_all_needinfos: bool,

    pub add_comment: Option<String>,
    pub comment_is_private: bool,

    pub set_url: Option<String>,
    pub set_assignee: Option<String>,
    /// Short code, `P0` to `P5`.
    pub set_priority: Option<String>,
    pub set_description: Option<String>,
    pub set_whiteboard: Option<String>,
    pub set_status: Option<String>,
    pub set_resolution: Option<String>,
    pub set_duplicate: Option<u64>,

    pub add_cc: Option<String>,
    pub remove_cc: Option<String>,
    pub cc_myself: bool,

    /// Last modification time the caller saw; compared against the form when
    /// `check_delta_ts` is set.
    pub delta_ts: Option<DateTime<Utc>>,
    pub check_delta_ts: bool,
}

impl Changes {
    /// True when applying these changes would not touch any form field.
    pub fn is_empty(&self) -> bool {
        given(&self.set_needinfo).is_none()
            && given(&self.remove_needinfo).is_none()
            && !self.clear_needinfo
            && given(&self.add_comment).is_none()
            && given(&self.set_url).is_none()
            && given(&self.set_assignee).is_none()
            && given(&self.set_priority).is_none()
            && given(&self.set_description).is_none()
            && given(&self.set_whiteboard).is_none()
            && given(&self.set_status).is_none()
            && given(&self.set_resolution).is_none()
            && self.duplicate_of().is_none()
            && given(&self.add_cc).is_none()
            && given(&self.remove_cc).is_none()
            && !self.cc_myself
    }

    /// Target of a duplicate resolution; bug 0 means none.
    pub fn duplicate_of(&self) -> Option<u64> {
        self.set_duplicate.filter(|&id| id != 0)
    }
}

/// An empty string asks for no change, same as `None`.
pub(crate) fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_maps_to_long_form() {
        assert_eq!("P0".parse::<Priority>().unwrap().form_value(), "P0 - Crit Sit");
        assert_eq!("P5".parse::<Priority>().unwrap().form_value(), "P5 - None");
    }

    #[test]
    fn priority_rejects_unknown_codes() {
        let err = "bogus".parse::<Priority>().unwrap_err();
        assert!(err.contains("invalid priority"));
        assert!("p1".parse::<Priority>().is_err());
    }

    #[test]
    fn flags_accept_integers_and_booleans() {
        let c: Comment = serde_json::from_str(
            r#"{"commentid": 1, "isprivate": 1, "thetext": "x", "bug_when": "2019-03-20T19:48:42Z"}"#,
        )
        .unwrap();
        assert!(c.is_private);

        let c: Comment = serde_json::from_str(
            r#"{"commentid": 1, "isprivate": false, "BugWhen": "2019-03-20T19:48:42Z"}"#,
        )
        .unwrap();
        assert!(!c.is_private);
    }

    #[test]
    fn default_changes_are_empty() {
        assert!(Changes::default().is_empty());
        let changes = Changes {
            cc_myself: true,
            ..Default::default()
        };
        assert!(!changes.is_empty());
    }

    #[test]
    fn user_display() {
        let user = User {
            name: "Firstname Lastname".to_string(),
            email: "user@foobar.com".to_string(),
        };
        assert_eq!(user.to_string(), "Firstname Lastname <user@foobar.com>");
        let bare = User {
            name: String::new(),
            email: "user@foobar.com".to_string(),
        };
        assert_eq!(bare.to_string(), "user@foobar.com");
    }
}
