//! Record normalizer: turns raw XML or JSON bug exports into a [`Bug`].
//!
//! The XML export is first repaired at the text level, then deserialized into
//! shadow structures that keep timestamps in their wire encoding. The shadow
//! is converted into the canonical [`Bug`] only once every nested comment,
//! attachment and timestamp has been validated, so a failed decode never
//! yields a partially populated record.

use crate::error::ConnectionError;
use crate::types::{Attachment, Bug, Comment, Flag, Group, User};
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesCData, Event};
use quick_xml::{Reader, Writer};
use regex::bytes::Regex;
use serde::Deserialize;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Upper bound on a single bug payload.
pub const MAX_PAYLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Timestamp layout used by the XML export, e.g. `2017-07-03 13:29:00 +0000`.
const XML_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Timestamp layout of the edit form's `delta_ts`, which carries no offset.
const FORM_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
    Json,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Xml => "xml",
            Format::Json => "json",
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" => Ok(Format::Xml),
            "json" => Ok(Format::Json),
            other => Err(format!("unknown format: {}", other)),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decodes one bug payload in the given format.
pub fn decode(raw: &[u8], format: Format) -> Result<Bug, ConnectionError> {
    match format {
        Format::Xml => decode_xml(raw),
        Format::Json => decode_json(raw),
    }
}

/// Decodes an XML export, repairing its markup first.
pub fn decode_xml(raw: &[u8]) -> Result<Bug, ConnectionError> {
    check_size(raw)?;
    let repaired = repair_markup(raw);
    let text = std::str::from_utf8(&repaired)?;

    // A login page or any other HTML answer fails here rather than with an
    // obscure XML error.
    if !text.contains("<bugzilla") {
        return Err(ConnectionError::NotBugzilla);
    }

    let protected = protect_text(text).map_err(quick_xml::DeError::from)?;
    let export: XmlExport = quick_xml::de::from_str(&protected)?;
    let shadow = export.bug;
    if let Some(code) = shadow.error.as_deref().filter(|c| !c.is_empty()) {
        return Err(ConnectionError::ServerReported {
            code: code.to_string(),
        });
    }

    shadow.into_bug()
}

/// Decodes a JSON document holding one canonical bug.
pub fn decode_json(raw: &[u8]) -> Result<Bug, ConnectionError> {
    check_size(raw)?;
    Ok(serde_json::from_slice(raw)?)
}

fn check_size(raw: &[u8]) -> Result<(), ConnectionError> {
    if raw.len() as u64 > MAX_PAYLOAD_BYTES {
        return Err(ConnectionError::PayloadTooLarge {
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(())
}

fn flag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<flag(\s[^<>]*?)?/>").expect("flag pattern is a valid regex")
    })
}

/// Rewrites self-closing `<flag .../>` elements into explicit open/close
/// pairs. Everything else is left byte-for-byte untouched.
pub fn repair_markup(raw: &[u8]) -> Cow<'_, [u8]> {
    flag_pattern().replace_all(raw, &b"<flag${1}></flag>"[..])
}

/// Rewrites element text into CDATA sections so the serde layer, which trims
/// plain text nodes, hands comment bodies and summaries over exactly as sent.
/// Blank text is kept when it is part of an element's content and dropped
/// when it only separates elements.
fn protect_text(text: &str) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(text.len()));
    // Blank text right after a start tag, undecided until the next event.
    let mut pending: Option<String> = None;
    let mut after_start = false;
    let mut after_text = false;

    loop {
        let event = reader.read_event()?;
        if let Some(blank) = pending.take() {
            if matches!(event, Event::End(_) | Event::CData(_)) {
                write_cdata(&mut writer, &blank)?;
            }
        }
        match event {
            Event::Eof => break,
            Event::Text(t) => {
                let content = t.unescape()?;
                if after_text || !content.trim().is_empty() {
                    write_cdata(&mut writer, &content)?;
                    after_text = true;
                } else if after_start {
                    pending = Some(content.into_owned());
                }
                after_start = false;
            }
            other => {
                after_start = matches!(other, Event::Start(_));
                after_text = matches!(other, Event::CData(_));
                writer.write_event(other)?;
            }
        }
    }

    String::from_utf8(writer.into_inner()).map_err(|e| quick_xml::Error::Encoding(e.utf8_error().into()))
}

fn write_cdata(writer: &mut Writer<Vec<u8>>, content: &str) -> std::io::Result<()> {
    for section in BytesCData::escaped(content) {
        writer.write_event(Event::CData(section))?;
    }
    Ok(())
}

/// Parses an XML export timestamp and normalizes it to UTC.
pub fn parse_export_time(value: &str) -> Result<DateTime<Utc>, ConnectionError> {
    DateTime::parse_from_str(value.trim(), XML_TIME_FORMAT)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| ConnectionError::Timestamp {
            value: value.to_string(),
            source,
        })
}

/// Parses the edit form's `delta_ts`. The form omits the offset, in which
/// case the value is taken as UTC.
pub fn parse_form_time(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let value = value.trim();
    match DateTime::parse_from_str(value, XML_TIME_FORMAT) {
        Ok(t) => Ok(t.with_timezone(&Utc)),
        Err(_) => NaiveDateTime::parse_from_str(value, FORM_TIME_FORMAT).map(|t| t.and_utc()),
    }
}

fn required_time(
    value: Option<String>,
    field: &'static str,
) -> Result<DateTime<Utc>, ConnectionError> {
    match value {
        Some(v) if !v.trim().is_empty() => parse_export_time(&v),
        _ => Err(ConnectionError::MissingField(field)),
    }
}

// Shadow structures for the XML export. Attributes are prefixed with `@`,
// element text is `$text`, and timestamps stay raw until `into_bug`.

#[derive(Debug, Deserialize)]
struct XmlExport {
    bug: XmlBug,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct XmlBug {
    #[serde(rename = "@error")]
    error: Option<String>,

    bug_id: u64,
    creation_ts: Option<String>,
    short_desc: String,
    delta_ts: Option<String>,
    reporter_accessible: u8,
    cclist_accessible: u8,
    classification_id: u64,
    classification: String,
    product: String,
    component: String,
    version: String,
    rep_platform: String,
    op_sys: String,
    bug_status: String,
    resolution: String,
    dup_id: u64,
    bug_file_loc: String,
    status_whiteboard: String,
    keywords: String,
    priority: String,
    bug_severity: String,
    target_milestone: String,
    everconfirmed: u8,
    reporter: XmlUser,
    assigned_to: XmlUser,
    qa_contact: XmlUser,
    cc: Vec<String>,
    estimated_time: String,
    remaining_time: String,
    actual_time: String,
    cf_foundby: Vec<String>,
    cf_nts_priority: Vec<String>,
    cf_biz_priority: Vec<String>,
    cf_blocker: Vec<String>,
    cf_it_deployment: Vec<String>,
    votes: i64,
    comment_sort_order: String,
    token: Vec<String>,
    flag: Vec<XmlFlag>,
    group: Vec<XmlGroup>,
    long_desc: Vec<XmlComment>,
    attachment: Vec<XmlAttachment>,
}

#[derive(Debug, Default, Deserialize)]
struct XmlUser {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "$text", default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct XmlGroup {
    #[serde(rename = "@id")]
    id: u64,
    #[serde(rename = "$text", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct XmlFlag {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@id")]
    id: u64,
    #[serde(rename = "@type_id")]
    type_id: u64,
    #[serde(rename = "@status")]
    status: String,
    #[serde(rename = "@setter", default)]
    setter: String,
    #[serde(rename = "@requestee", default)]
    requestee: String,
}

#[derive(Debug, Deserialize)]
struct XmlComment {
    #[serde(rename = "@isprivate", default)]
    is_private: u8,
    commentid: u64,
    #[serde(default)]
    comment_count: u64,
    #[serde(default)]
    who: XmlUser,
    bug_when: Option<String>,
    #[serde(default)]
    thetext: String,
}

#[derive(Debug, Deserialize)]
struct XmlAttachment {
    #[serde(rename = "@isobsolete", default)]
    is_obsolete: u8,
    #[serde(rename = "@ispatch", default)]
    is_patch: u8,
    #[serde(rename = "@isprivate", default)]
    is_private: u8,
    attachid: u64,
    date: Option<String>,
    delta_ts: Option<String>,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    filename: String,
    #[serde(rename = "type", default)]
    content_type: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    attacher: XmlUser,
    #[serde(default)]
    token: String,
}

impl From<XmlUser> for User {
    fn from(u: XmlUser) -> Self {
        User {
            name: u.name,
            email: u.email,
        }
    }
}

impl From<XmlGroup> for Group {
    fn from(g: XmlGroup) -> Self {
        Group {
            id: g.id,
            name: g.name,
        }
    }
}

impl From<XmlFlag> for Flag {
    fn from(f: XmlFlag) -> Self {
        Flag {
            name: f.name,
            id: f.id,
            type_id: f.type_id,
            status: f.status,
            setter: f.setter,
            requestee: f.requestee,
        }
    }
}

impl XmlComment {
    fn into_comment(self) -> Result<Comment, ConnectionError> {
        Ok(Comment {
            id: self.commentid,
            count: self.comment_count,
            who: self.who.into(),
            is_private: self.is_private != 0,
            text: self.thetext,
            bug_when: required_time(self.bug_when, "long_desc.bug_when")?,
        })
    }
}

impl XmlAttachment {
    fn into_attachment(self) -> Result<Attachment, ConnectionError> {
        Ok(Attachment {
            id: self.attachid,
            filename: self.filename,
            content_type: self.content_type,
            size: self.size,
            desc: self.desc,
            attacher: self.attacher.into(),
            is_obsolete: self.is_obsolete != 0,
            is_patch: self.is_patch != 0,
            is_private: self.is_private != 0,
            date: required_time(self.date, "attachment.date")?,
            delta_ts: required_time(self.delta_ts, "attachment.delta_ts")?,
            token: self.token,
        })
    }
}

impl XmlBug {
    fn into_bug(self) -> Result<Bug, ConnectionError> {
        let creation_ts = required_time(self.creation_ts, "creation_ts")?;
        let delta_ts = required_time(self.delta_ts, "delta_ts")?;
        let comments = self
            .long_desc
            .into_iter()
            .map(XmlComment::into_comment)
            .collect::<Result<Vec<_>, _>>()?;
        let attachments = self
            .attachment
            .into_iter()
            .map(XmlAttachment::into_attachment)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Bug {
            bug_id: self.bug_id,
            short_desc: self.short_desc,
            creation_ts,
            delta_ts,
            reporter: self.reporter.into(),
            assigned_to: self.assigned_to.into(),
            qa_contact: self.qa_contact.into(),
            classification_id: self.classification_id,
            classification: self.classification,
            product: self.product,
            component: self.component,
            version: self.version,
            rep_platform: self.rep_platform,
            op_sys: self.op_sys,
            bug_status: self.bug_status,
            resolution: self.resolution,
            bug_severity: self.bug_severity,
            priority: self.priority,
            target_milestone: self.target_milestone,
            dup_id: self.dup_id,
            bug_file_loc: self.bug_file_loc,
            status_whiteboard: self.status_whiteboard,
            keywords: self.keywords,
            estimated_time: self.estimated_time,
            remaining_time: self.remaining_time,
            actual_time: self.actual_time,
            votes: self.votes,
            comment_sort_order: self.comment_sort_order,
            everconfirmed: self.everconfirmed != 0,
            reporter_accessible: self.reporter_accessible != 0,
            cclist_accessible: self.cclist_accessible != 0,
            cc: self.cc,
            groups: self.group.into_iter().map(Group::from).collect(),
            flags: self.flag.into_iter().map(Flag::from).collect(),
            tokens: self.token,
            cf_foundby: self.cf_foundby,
            cf_nts_priority: self.cf_nts_priority,
            cf_biz_priority: self.cf_biz_priority,
            cf_blocker: self.cf_blocker,
            cf_it_deployment: self.cf_it_deployment,
            comments,
            attachments,
        })
    }
}
