//! Describes an attachment download from its response headers.

use crate::error::ConnectionError;
use crate::types::AttachmentDescriptor;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH};

/// Builds the descriptor for attachment `id` from a download response.
///
/// The filename comes from the `Content-Disposition` parameter and the size
/// from `Content-Length`. Either header missing or malformed is an error.
pub fn resolve_from_headers(id: u64, headers: &HeaderMap) -> Result<AttachmentDescriptor, ConnectionError> {
    let disposition = header_str(headers, CONTENT_DISPOSITION.as_str())?;
    let filename = disposition_filename(disposition).ok_or_else(|| {
        ConnectionError::Header(format!("failed to parse Content-Disposition: {:?}", disposition))
    })?;

    let size = header_str(headers, CONTENT_LENGTH.as_str())?
        .trim()
        .parse::<u64>()
        .map_err(|_| ConnectionError::Header("bad Content-Length in response".to_string()))?;

    Ok(AttachmentDescriptor { id, filename, size })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ConnectionError> {
    headers
        .get(name)
        .ok_or_else(|| ConnectionError::Header(format!("missing {} in response", name)))?
        .to_str()
        .map_err(|_| ConnectionError::Header(format!("{} is not valid text", name)))
}

/// Extracts the `filename` parameter of a `Content-Disposition` value.
fn disposition_filename(value: &str) -> Option<String> {
    let mut parts = split_params(value).into_iter();
    let kind = parts.next()?;
    if kind.trim().is_empty() || kind.contains('=') {
        return None;
    }

    for param in parts {
        let (key, raw) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            continue;
        }
        let raw = raw.trim();
        let name = match raw.strip_prefix('"') {
            Some(quoted) => unquote(quoted.strip_suffix('"')?),
            None => raw.to_string(),
        };
        return Some(name);
    }
    None
}

// Splits on `;` outside double quotes.
fn split_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts.retain(|p| !p.trim().is_empty());
    parts
}

fn unquote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.extend(chars.next());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(disposition: Option<&str>, length: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(d) = disposition {
            map.insert(CONTENT_DISPOSITION, HeaderValue::from_str(d).unwrap());
        }
        if let Some(l) = length {
            map.insert(CONTENT_LENGTH, HeaderValue::from_str(l).unwrap());
        }
        map
    }

    #[test]
    fn quoted_filename_and_length() {
        let map = headers(Some(r#"inline; filename="supportconfig.tbz""#), Some("1848"));
        let att = resolve_from_headers(7315202, &map).unwrap();
        assert_eq!(
            att,
            AttachmentDescriptor {
                id: 7315202,
                filename: "supportconfig.tbz".to_string(),
                size: 1848,
            }
        );
    }

    #[test]
    fn bare_filename_and_semicolons_in_quotes() {
        let map = headers(Some("attachment; filename=log.txt"), Some("10"));
        assert_eq!(resolve_from_headers(1, &map).unwrap().filename, "log.txt");

        let map = headers(Some(r#"attachment; filename="a;b \"c\".txt"; size=3"#), Some("3"));
        assert_eq!(resolve_from_headers(1, &map).unwrap().filename, r#"a;b "c".txt"#);
    }

    #[test]
    fn missing_disposition_is_an_error() {
        let err = resolve_from_headers(1, &headers(None, Some("10"))).unwrap_err();
        assert!(matches!(err, ConnectionError::Header(_)));
    }

    #[test]
    fn malformed_disposition_is_an_error() {
        for bad in ["", "filename=x.txt", r#"inline; filename="unterminated"#, "inline"] {
            let err = resolve_from_headers(1, &headers(Some(bad), Some("10"))).unwrap_err();
            assert!(matches!(err, ConnectionError::Header(_)), "{:?}", bad);
        }
    }

    #[test]
    fn bad_length_is_an_error() {
        for bad in [None, Some("many"), Some("-1")] {
            let map = headers(Some(r#"inline; filename="x""#), bad);
            let err = resolve_from_headers(1, &map).unwrap_err();
            assert!(matches!(err, ConnectionError::Header(_)));
        }
    }
}
