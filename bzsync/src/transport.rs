//! The HTTP seam between the client and a Bugzilla server.

use crate::config::Settings;
use crate::error::ConnectionError;
use log::debug;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::fmt;
use std::io::Read;
use url::Url;

/// A response whose body has not been read yet.
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fails with the canonical reason phrase unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self, ConnectionError> {
        if self.is_success() {
            return Ok(self);
        }
        let reason = StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected status")
            .to_string();
        Err(ConnectionError::Status {
            status: self.status,
            reason,
        })
    }

    /// Reads the whole body, refusing anything longer than `limit` bytes.
    pub fn read_limited(self, limit: u64) -> Result<Vec<u8>, ConnectionError> {
        read_limited(self.body, limit)
    }
}

/// Reads `reader` to the end, refusing anything longer than `limit` bytes.
pub fn read_limited<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>, ConnectionError> {
    let mut buf = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(ConnectionError::PayloadTooLarge { limit });
    }
    Ok(buf)
}

/// Issues the two kinds of request the client needs.
pub trait Transport {
    fn get(&self, url: &Url) -> Result<RawResponse, ConnectionError>;

    /// Posts `fields` as `application/x-www-form-urlencoded`.
    fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<RawResponse, ConnectionError>;
}

/// Blocking HTTP transport with Basic authentication on every request.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    user: String,
    password: String,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self, ConnectionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|source| ConnectionError::Transport {
                context: "cannot build HTTP client",
                source,
            })?;
        Ok(HttpTransport {
            client,
            user: settings.user.clone(),
            password: settings.password.clone(),
        })
    }

    fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        if self.user.is_empty() && self.password.is_empty() {
            return request;
        }
        request.basic_auth(&self.user, Some(&self.password))
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        context: &'static str,
    ) -> Result<RawResponse, ConnectionError> {
        let response = self
            .authorize(request)
            .send()
            .map_err(|source| ConnectionError::Transport { context, source })?;
        debug!("HTTP {} from {}", response.status(), response.url());
        Ok(RawResponse {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            body: Box::new(response),
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> Result<RawResponse, ConnectionError> {
        debug!("GET {}", url);
        self.send(self.client.get(url.clone()), "GET request failed")
    }

    fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<RawResponse, ConnectionError> {
        debug!("POST {} with {} fields", url, fields.len());
        self.send(self.client.post(url.clone()).form(fields), "failed to send a request to bugzilla")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn response(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            headers: HeaderMap::new(),
            body: Box::new(Cursor::new(body.as_bytes().to_vec())),
        }
    }

    #[test]
    fn non_success_carries_the_reason_phrase() {
        let err = response(401, "").error_for_status().unwrap_err();
        match err {
            ConnectionError::Status { status, reason } => {
                assert_eq!(status, 401);
                assert_eq!(reason, "Unauthorized");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(response(204, "").error_for_status().is_ok());
    }

    #[test]
    fn body_at_the_limit_is_accepted() {
        assert_eq!(response(200, "12345").read_limited(5).unwrap(), b"12345");
    }

    #[test]
    fn body_over_the_limit_is_refused() {
        assert!(matches!(
            response(200, "123456").read_limited(5),
            Err(ConnectionError::PayloadTooLarge { limit: 5 })
        ));
    }

    #[test]
    fn http_transport_builds_from_settings() {
        let settings = Settings::new("https://bugzilla.example.com", "user", "secret");
        assert!(HttpTransport::new(&settings).is_ok());
    }
}
