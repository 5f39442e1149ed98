//! Reads and updates bugs through the Bugzilla web interface.
//!
//! Reads use the XML export of `show_bug.cgi`. Updates open the same page as
//! HTML, fill in its edit form and post it back the way a browser would,
//! which reaches fields (flags, needinfo overrides) the XML-RPC API does not.

use crate::attachment::resolve_from_headers;
use crate::changes;
use crate::collision;
use crate::config::Settings;
use crate::decode::{decode, Format};
use crate::error::{ConnectionError, RequestError, Result};
use crate::form::ChangeForm;
use crate::outcome::classify;
use crate::storage::ArtifactCache;
use crate::transport::{read_limited, HttpTransport, Transport};
use crate::types::{AttachmentDescriptor, Bug, Changes};
use log::{debug, info, warn};
use std::io::{Read, Write};
use url::Url;

/// Selector of the edit form on the show page.
pub const CHANGE_FORM: &str = "form[name=changeform]";

pub struct Client<T: Transport = HttpTransport> {
    base_url: Url,
    transport: T,
    cache: Option<Box<dyn ArtifactCache>>,
    max_payload_bytes: u64,
}

impl Client<HttpTransport> {
    /// Client talking HTTP to the server named in `settings`.
    pub fn new(settings: &Settings) -> Result<Self> {
        let transport = HttpTransport::new(settings)?;
        Ok(Client::with_transport(&settings.base_url, transport)?
            .with_max_payload_bytes(settings.max_payload_bytes))
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(base_url: &str, transport: T) -> std::result::Result<Self, RequestError> {
        let parsed = Url::parse(base_url).map_err(|source| RequestError::BaseUrl {
            url: base_url.to_string(),
            source,
        })?;
        if parsed.cannot_be_a_base() {
            return Err(RequestError::CannotBeABase(base_url.to_string()));
        }
        Ok(Client {
            base_url: parsed,
            transport,
            cache: None,
            max_payload_bytes: crate::decode::MAX_PAYLOAD_BYTES,
        })
    }

    /// Every decoded bug is also handed to `cache`.
    pub fn with_cache(mut self, cache: Box<dyn ArtifactCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_payload_bytes(mut self, limit: u64) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn endpoint(&self, script: &str, id: u64) -> std::result::Result<Url, RequestError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RequestError::CannotBeABase(self.base_url.to_string()))?
            .pop_if_empty()
            .push(script);
        url.query_pairs_mut().append_pair("id", &id.to_string());
        Ok(url)
    }

    /// `<base>/show_bug.cgi?id=<id>`, the page holding the edit form.
    pub fn show_bug_url(&self, id: u64) -> std::result::Result<Url, RequestError> {
        self.endpoint("show_bug.cgi", id)
    }

    /// The show page as an XML export without attachment bodies.
    pub fn export_url(&self, id: u64) -> std::result::Result<Url, RequestError> {
        let mut url = self.endpoint("show_bug.cgi", id)?;
        url.query_pairs_mut()
            .append_pair("ctype", "xml")
            .append_pair("excludefield", "attachmentdata");
        Ok(url)
    }

    pub fn attachment_url(&self, id: u64) -> std::result::Result<Url, RequestError> {
        self.endpoint("attachment.cgi", id)
    }

    /// Fetches and decodes one bug.
    pub fn get_bug(&self, id: u64) -> Result<Bug> {
        let url = self.export_url(id)?;
        let raw = self
            .transport
            .get(&url)?
            .error_for_status()?
            .read_limited(self.max_payload_bytes)?;

        let bug = decode(&raw, Format::Xml)?;
        info!("fetched bug {} ({} comments)", bug.bug_id, bug.comments.len());
        self.cache_bug(&bug);
        Ok(bug)
    }

    /// Decodes a bug from a JSON document, without touching the network.
    pub fn bug_from_json<R: Read>(&self, reader: R) -> Result<Bug> {
        let raw = read_limited(reader, self.max_payload_bytes)?;

        let bug = decode(&raw, Format::Json)?;
        self.cache_bug(&bug);
        Ok(bug)
    }

    /// Applies `changes` to bug `id` through its edit form.
    ///
    /// When `changes.check_delta_ts` is set the update is refused if the bug
    /// changed since `changes.delta_ts`.
    pub fn update(&self, id: u64, changes: &Changes) -> Result<()> {
        changes::validate(changes)?;

        let page_url = self.show_bug_url(id)?;
        let response = self.transport.get(&page_url).map_err(|err| match err {
            ConnectionError::Transport { source, .. } => ConnectionError::Transport {
                context: "failed to fetch the update form",
                source,
            },
            other => other,
        })?;
        let page = response.error_for_status()?.read_limited(self.max_payload_bytes)?;
        let html = std::str::from_utf8(&page).map_err(ConnectionError::from)?;

        let mut form = ChangeForm::parse(page_url, html, CHANGE_FORM)?;
        if changes.check_delta_ts {
            if let Some(expected) = changes.delta_ts {
                collision::check(&form, expected)?;
            }
        }
        changes::apply(&mut form, changes)?;

        let action = form.action_url()?;
        let fields = form.submission();
        debug!("submitting {} fields for bug {} to {}", fields.len(), id, action);
        let reply = self
            .transport
            .post_form(&action, &fields)?
            .error_for_status()?
            .read_limited(self.max_payload_bytes)?;

        let outcome = classify(&String::from_utf8_lossy(&reply));
        debug!("bug {} update outcome: {:?}", id, outcome);
        outcome.into_result()?;
        info!("updated bug {}", id);
        Ok(())
    }

    /// Starts downloading attachment `id`.
    ///
    /// Only the descriptor is read up front; the body is left to the caller.
    pub fn download_attachment(&self, id: u64) -> Result<(AttachmentDescriptor, Box<dyn Read + Send>)> {
        let url = self.attachment_url(id)?;
        let response = self.transport.get(&url)?.error_for_status()?;
        let descriptor = resolve_from_headers(id, &response.headers)?;
        info!(
            "downloading attachment {} ({}, {} bytes)",
            id, descriptor.filename, descriptor.size
        );
        Ok((descriptor, response.body))
    }

    // Cache failures never fail the read.
    fn cache_bug(&self, bug: &Bug) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(err) = write_to_cache(cache.as_ref(), bug) {
            warn!("failed to cache bug {}: {:#}", bug.bug_id, err);
        }
    }
}

fn write_to_cache(cache: &dyn ArtifactCache, bug: &Bug) -> anyhow::Result<()> {
    let body = serde_json::to_vec(bug)?;
    let mut writer = cache.acquire_writer(&bug.bug_id.to_string())?;
    writer.write_all(&body)?;
    writer.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RawResponse;

    struct Offline;

    impl Transport for Offline {
        fn get(&self, _url: &Url) -> std::result::Result<RawResponse, ConnectionError> {
            Err(ConnectionError::Header("offline".into()))
        }

        fn post_form(&self, _url: &Url, _fields: &[(String, String)]) -> std::result::Result<RawResponse, ConnectionError> {
            Err(ConnectionError::Header("offline".into()))
        }
    }

    #[test]
    fn urls_extend_the_base_path() {
        let client = Client::with_transport("https://bugzilla.example.com/bugzilla/", Offline).unwrap();
        assert_eq!(
            client.show_bug_url(1047068).unwrap().as_str(),
            "https://bugzilla.example.com/bugzilla/show_bug.cgi?id=1047068"
        );
        assert_eq!(
            client.export_url(1047068).unwrap().as_str(),
            "https://bugzilla.example.com/bugzilla/show_bug.cgi?id=1047068&ctype=xml&excludefield=attachmentdata"
        );
        assert_eq!(
            client.attachment_url(7315202).unwrap().as_str(),
            "https://bugzilla.example.com/bugzilla/attachment.cgi?id=7315202"
        );
    }

    #[test]
    fn base_without_trailing_slash() {
        let client = Client::with_transport("https://bugzilla.example.com", Offline).unwrap();
        assert_eq!(
            client.show_bug_url(1).unwrap().as_str(),
            "https://bugzilla.example.com/show_bug.cgi?id=1"
        );
    }

    #[test]
    fn bad_base_url_is_a_request_error() {
        assert!(matches!(
            Client::with_transport("not a url", Offline),
            Err(RequestError::BaseUrl { .. })
        ));
        assert!(matches!(
            Client::with_transport("mailto:bugs@example.com", Offline),
            Err(RequestError::CannotBeABase(_))
        ));
    }

    #[test]
    fn invalid_changes_fail_before_any_request() {
        let client = Client::with_transport("https://bugzilla.example.com", Offline).unwrap();
        let changes = Changes {
            set_priority: Some("urgent".into()),
            ..Default::default()
        };
        let err = client.update(1, &changes).unwrap_err();
        assert!(err.to_string().contains("invalid priority"));
    }
}
