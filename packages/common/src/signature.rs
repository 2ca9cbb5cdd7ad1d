use std::collections::BTreeMap;
use std::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Ordered multimap of fields covered by a signature.
///
/// Keys are emitted in sorted order and values in insertion order, so the
/// encoded form is deterministic and matches what the server computes over
/// the same fields.
#[derive(Debug, Default)]
pub struct SignedValues(BTreeMap<String, Vec<String>>);

impl SignedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under the given key.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// Render the canonical `key=value&key=value` form with both sides
    /// escaped.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        for (key, values) in &self.0 {
            let prefix = escape(key);
            for value in values {
                if !buf.is_empty() {
                    buf.push('&');
                }
                buf.push_str(&prefix);
                buf.push('=');
                buf.push_str(&escape(value));
            }
        }
        buf
    }

    /// HMAC-SHA-256 of the encoded form, as standard base64.
    pub fn sign(&self, secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("hmac accepts keys of any length");
        mac.update(self.encode().as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

/// Percent-escape reserving only the RFC 3986 unreserved set
/// (`A-Z a-z 0-9 - . _ ~`). This is part of the signed wire format and must
/// not change.
pub fn escape(s: &str) -> String {
    let mut buf = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                buf.push(b as char)
            }
            _ => {
                let _ = write!(buf, "%{b:02X}");
            }
        }
    }
    buf
}

/// Timestamps are signed as RFC 3339 UTC rounded to whole seconds.
pub fn sign_time(t: DateTime<Utc>) -> String {
    let secs = (t.timestamp_millis() + 500).div_euclid(1000);
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(rounded) => rounded.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => t.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    }
}

/// Shortest decimal rendering of a float, shared by signatures over weights
/// and scores.
pub fn sign_float(f: f64) -> String {
    format!("{f}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_preserves_unreserved() {
        assert_eq!(escape("abc-XYZ_0.9~"), "abc-XYZ_0.9~");
    }

    #[test]
    fn test_escape_hex_encodes_everything_else() {
        assert_eq!(escape("a b/c"), "a%20b%2Fc");
        assert_eq!(escape("print('hi')\n"), "print%28%27hi%27%29%0A");
    }

    #[test]
    fn test_encode_sorts_keys_and_keeps_value_order() {
        let mut v = SignedValues::new();
        v.add("b", "2");
        v.add("a", "z");
        v.add("a", "a");
        assert_eq!(v.encode(), "a=z&a=a&b=2");
    }

    #[test]
    fn test_sign_is_stable() {
        let mut v = SignedValues::new();
        v.add("name", "demo");
        v.add("file-main.py", "print('hi')\n");
        let first = v.sign("secret");
        let second = v.sign("secret");
        assert_eq!(first, second);
        assert_ne!(first, v.sign("other-secret"));
    }

    #[test]
    fn test_sign_time_rounds_to_seconds() {
        let t = DateTime::<Utc>::from_timestamp(1_700_000_000, 499_000_000).unwrap();
        assert_eq!(sign_time(t), "2023-11-14T22:13:20Z");
        let t = DateTime::<Utc>::from_timestamp(1_700_000_000, 500_000_000).unwrap();
        assert_eq!(sign_time(t), "2023-11-14T22:13:21Z");
    }

    #[test]
    fn test_sign_float_shortest_form() {
        assert_eq!(sign_float(1.0), "1");
        assert_eq!(sign_float(0.5), "0.5");
    }
}
