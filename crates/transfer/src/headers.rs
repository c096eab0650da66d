//! Small HTTP header helpers shared by the fetchers and the downloader.

use percent_encoding::percent_decode_str;
use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, HeaderMap};

/// Reads `Content-Length` from the raw headers.
///
/// `Response::content_length` reports the decoded body size, which is 0 for
/// HEAD responses, so the header itself is consulted.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Returns `true` if the server advertises `Accept-Ranges: bytes`.
pub fn accepts_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"))
}

/// Extracts the file name from `Content-Disposition`, if any.
pub fn disposition_filename(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_disposition_filename)
}

/// Parses `filename*=` (RFC 5987, preferred) or `filename=` parameters.
pub fn parse_disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';').map(str::trim) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = val.trim().trim_matches('"');
                let raw = encoded.splitn(3, '\'').nth(2).unwrap_or(encoded);
                if let Ok(decoded) = percent_decode_str(raw).decode_utf8() {
                    return Some(decoded.into_owned());
                }
            }
            "filename" => {
                plain = Some(val.trim().trim_matches('"').to_string());
            }
            _ => {}
        }
    }
    plain.filter(|n| !n.is_empty())
}

/// Derives a display name from the last path segment of `url`.
pub fn name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("download");
    percent_decode_str(segment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}
