//! Preference hand-off between collection and negotiation.
//!
//! The finished bundle travels as URL-safe, unpadded base64 of its JSON in a
//! `prefs` query parameter: `<base>?prefs=<blob>`. Decoding also accepts a
//! percent-encoded raw JSON value in the same place.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::collections::HashMap;

use crate::error::{Result, SwipeError};
use crate::preferences::PreferenceBundle;

pub const PREFS_PARAM: &str = "prefs";

pub fn encode(bundle: &PreferenceBundle) -> Result<String> {
    let json = serde_json::to_vec(bundle).map_err(|e| SwipeError::Handoff(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode a blob produced by [`encode`], or percent-encoded JSON.
pub fn decode(blob: &str) -> Result<PreferenceBundle> {
    let blob = blob.trim();
    if blob.is_empty() {
        return Err(SwipeError::Handoff("empty preference blob".into()));
    }
    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(blob.trim_end_matches('=')) {
        if let Ok(bundle) = serde_json::from_slice::<PreferenceBundle>(&bytes) {
            return Ok(bundle);
        }
    }
    let raw = url_decode(blob);
    serde_json::from_str(&raw).map_err(|e| SwipeError::Handoff(format!("not a preference bundle: {e}")))
}

/// `<base>?prefs=<blob>`, appending with `&` when `base` already has a query.
pub fn to_url(base: &str, bundle: &PreferenceBundle) -> Result<String> {
    let sep = if base.contains('?') { '&' } else { '?' };
    Ok(format!("{base}{sep}{PREFS_PARAM}={}", encode(bundle)?))
}

/// Accepts a full hand-off URL, a bare query string, or just the blob.
pub fn from_url_or_blob(input: &str) -> Result<PreferenceBundle> {
    let input = input.trim();
    let query = match input.split_once('?') {
        Some((_, q)) => Some(q),
        None if input.contains('=') => Some(input),
        None => None,
    };
    match query {
        Some(q) => {
            // Strip any fragment before parsing.
            let q = q.split('#').next().unwrap_or(q);
            let params = parse_query_raw(q);
            let blob = params
                .get(PREFS_PARAM)
                .ok_or_else(|| SwipeError::Handoff(format!("no `{PREFS_PARAM}` parameter")))?;
            decode(blob)
        }
        None => decode(input),
    }
}

/// Percent-decode into bytes first so multi-byte UTF-8 survives.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3]).ok().and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split a query string into raw (still encoded) values.
fn parse_query_raw(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((key.to_string(), val.to_string()))
        })
        .collect()
}
