//! Redaction and digest engine.
//!
//! Every value that enters the audit log goes through [`sanitize`] first:
//! e-mail addresses and phone numbers are masked, strings are collapsed to a
//! single line and truncated, containers are bounded in width and depth.
//! [`digest`] fingerprints sanitized content so request bodies can be
//! correlated without being stored.

use std::sync::OnceLock;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest as _, Sha256};

use crate::payload::{Payload, iso_timestamp, number_value};

pub const MAX_STRING_CHARS: usize = 512;
pub const MAX_KEY_CHARS: usize = 64;
pub const MAX_OBJECT_KEYS: usize = 32;
pub const MAX_ARRAY_ITEMS: usize = 25;
pub const MAX_DEPTH: usize = 5;
pub const MAX_DIGEST_SOURCE_BYTES: usize = 4096;

pub const REDACTED_EMAIL: &str = "[redacted-email]";
pub const REDACTED_PHONE: &str = "[redacted-phone]";
pub const DEPTH_LIMIT: &str = "[depth-limit]";
pub const NON_FINITE_NUMBER: &str = "[non-finite-number]";
pub const BYTES: &str = "[bytes]";

const ELLIPSIS: &str = "...";

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("email pattern must compile")
    })
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // ASCII digits only; `\d` would also match other scripts' digits.
    PATTERN.get_or_init(|| Regex::new(r"\+?[0-9][0-9\s-]{7,}[0-9]").expect("phone pattern must compile"))
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern must compile"))
}

/// Keep at most `max` characters. Longer input is cut to `max - 3` characters
/// and suffixed with `...`.
pub(crate) fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let mut out: String = input.chars().take(max.saturating_sub(ELLIPSIS.len())).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Hard cut at `max` characters, no marker.
pub(crate) fn cut_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

/// Collapse every whitespace run to one space and trim.
pub(crate) fn single_line(input: &str) -> String {
    whitespace_pattern().replace_all(input, " ").trim().to_string()
}

fn sanitize_string(input: &str) -> String {
    let trimmed = input.trim();
    let masked = email_pattern().replace_all(trimmed, REDACTED_EMAIL);
    let masked = phone_pattern().replace_all(&masked, REDACTED_PHONE);
    let collapsed = whitespace_pattern().replace_all(&masked, " ");
    truncate_chars(&collapsed, MAX_STRING_CHARS)
}

fn sanitize_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "key".to_string();
    }
    cut_chars(trimmed, MAX_KEY_CHARS)
}

/// Sanitize `value` from the root.
pub fn sanitize(value: &Payload) -> Value {
    sanitize_at(value, 0)
}

/// Sanitize `value` as if it sat `depth` levels below the root.
///
/// Nulls pass through at any depth. Every other value at or beyond
/// [`MAX_DEPTH`] is replaced by `"[depth-limit]"`.
pub fn sanitize_at(value: &Payload, depth: usize) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    if depth >= MAX_DEPTH {
        return Value::String(DEPTH_LIMIT.to_string());
    }

    match value {
        Payload::Null => Value::Null,
        Payload::Bool(b) => Value::Bool(*b),
        Payload::Int(i) => Value::from(*i),
        Payload::Float(f) => number_value(*f).unwrap_or_else(|| Value::String(NON_FINITE_NUMBER.to_string())),
        Payload::String(s) => Value::String(sanitize_string(s)),
        Payload::Timestamp(at) => Value::String(iso_timestamp(at)),
        Payload::Bytes(_) => Value::String(BYTES.to_string()),
        Payload::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|item| sanitize_at(item, depth + 1))
                .collect(),
        ),
        Payload::Object(entries) => {
            let mut map = Map::new();
            for (key, item) in entries.iter().take(MAX_OBJECT_KEYS) {
                map.insert(sanitize_key(key), sanitize_at(item, depth + 1));
            }
            Value::Object(map)
        }
    }
}

/// `sha256:` + unpadded base64url SHA-256 of the sanitized JSON form.
///
/// Absent and null inputs have no digest. Serializations longer than
/// [`MAX_DIGEST_SOURCE_BYTES`] are cut on a character boundary before hashing.
pub fn digest(value: Option<&Payload>) -> Option<String> {
    let value = value.filter(|v| !v.is_null())?;
    let serialized = serde_json::to_string(&sanitize(value)).ok()?;

    let mut end = serialized.len().min(MAX_DIGEST_SOURCE_BYTES);
    while !serialized.is_char_boundary(end) {
        end -= 1;
    }

    let hash = Sha256::digest(&serialized.as_bytes()[..end]);
    Some(format!("sha256:{}", URL_SAFE_NO_PAD.encode(hash)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn nested(levels: usize, leaf: Payload) -> Payload {
        (0..levels).fold(leaf, |inner, _| Payload::object([("k", inner)]))
    }

    #[test]
    fn masks_emails_and_phones() {
        let out = sanitize(&Payload::from("  mail jane.doe@example.org or call +49 170 1234567  "));
        assert_eq!(out, "mail [redacted-email] or call [redacted-phone]");
    }

    #[test]
    fn phone_masking_only_counts_ascii_digits() {
        let arabic_indic = "\u{0661}\u{0662}\u{0663}\u{0664}\u{0665}\u{0666}\u{0667}\u{0668}\u{0669}";
        assert_eq!(sanitize(&Payload::from(arabic_indic)), arabic_indic);
        assert_eq!(sanitize(&Payload::from("ref 0301-555-0199")), "ref [redacted-phone]");
    }

    #[test]
    fn collapses_whitespace_and_truncates_long_strings() {
        let out = sanitize(&Payload::from("a\n\n\tb"));
        assert_eq!(out, "a b");

        let long = "x".repeat(600);
        let Value::String(out) = sanitize(&Payload::from(long)) else {
            panic!("expected string");
        };
        assert_eq!(out.chars().count(), MAX_STRING_CHARS);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn renders_non_json_leaves() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(sanitize(&Payload::from(at)), "2024-05-06T07:08:09.000Z");
        assert_eq!(sanitize(&Payload::from(vec![0u8; 16])), BYTES);
        assert_eq!(sanitize(&Payload::from(f64::INFINITY)), NON_FINITE_NUMBER);
        assert_eq!(sanitize(&Payload::from(1.5)), 1.5);
        assert_eq!(sanitize(&Payload::from(true)), true);
    }

    #[test]
    fn bounds_container_width() {
        let wide = Payload::array((0i64..40).map(Payload::from));
        assert_eq!(sanitize(&wide).as_array().unwrap().len(), MAX_ARRAY_ITEMS);

        let many = Payload::object((0i64..40).map(|i| (format!("k{i}"), Payload::from(i))));
        let out = sanitize(&many);
        let map = out.as_object().unwrap();
        assert_eq!(map.len(), MAX_OBJECT_KEYS);
        assert_eq!(map.keys().next().unwrap(), "k0");
    }

    #[test]
    fn normalizes_keys() {
        let long_key = "k".repeat(100);
        let payload = Payload::object([("   ", Payload::from(1i64)), (long_key.as_str(), Payload::from(2i64))]);
        let out = sanitize(&payload);
        assert_eq!(out["key"], 1);
        assert_eq!(out[&"k".repeat(MAX_KEY_CHARS)], 2);
    }

    #[test]
    fn depth_limit_applies_at_fifth_level() {
        let out = sanitize(&nested(6, Payload::from("leaf")));
        assert_eq!(out["k"]["k"]["k"]["k"]["k"], DEPTH_LIMIT);

        let shallow = sanitize(&nested(4, Payload::from("leaf")));
        assert_eq!(shallow["k"]["k"]["k"]["k"], "leaf");
    }

    #[test]
    fn nulls_survive_beyond_the_depth_limit() {
        let out = sanitize(&nested(5, Payload::Null));
        assert_eq!(out["k"]["k"]["k"]["k"]["k"], Value::Null);
    }

    #[test]
    fn digest_of_absent_or_null_is_none() {
        assert_eq!(digest(None), None);
        assert_eq!(digest(Some(&Payload::Null)), None);
    }

    #[test]
    fn digest_is_prefixed_base64url() {
        let d = digest(Some(&Payload::object([("a", Payload::from(1i64))]))).unwrap();
        let encoded = d.strip_prefix("sha256:").unwrap();
        assert_eq!(encoded.len(), 43);
        assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn digest_ignores_masked_differences() {
        let a = Payload::object([("email", Payload::from("a@example.com"))]);
        let b = Payload::object([("email", Payload::from("b@example.com"))]);
        assert_eq!(digest(Some(&a)), digest(Some(&b)));
    }

    #[test]
    fn digest_only_covers_the_leading_bytes() {
        let item = |tail: &str| Payload::from(format!("{}{tail}", "y".repeat(500)));
        let mut first: Vec<Payload> = (0..20).map(|_| item("")).collect();
        let mut second = first.clone();
        first.push(item("a"));
        second.push(item("b"));
        assert_eq!(digest(Some(&Payload::Array(first))), digest(Some(&Payload::Array(second))));
    }

    #[test]
    fn digest_cut_respects_multibyte_characters() {
        let wide = Payload::from("ü".repeat(500));
        let payload = Payload::array((0..10).map(|_| wide.clone()));
        assert!(digest(Some(&payload)).is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn embedded_emails_never_survive(
            prefix in "[a-z ]{0,20}",
            local in "[a-z0-9._]{1,12}",
            domain in "[a-z]{1,12}",
            tld in "[a-z]{2,4}",
            suffix in "[a-z ]{0,20}",
        ) {
            let text = format!("{prefix} {local}@{domain}.{tld} {suffix}");
            let Value::String(out) = sanitize(&Payload::from(text)) else {
                return Err(TestCaseError::fail("expected string"));
            };
            prop_assert!(!out.contains('@'));
        }

        #[test]
        fn sanitized_strings_are_bounded_single_lines(text in "\\PC{0,700}") {
            let Value::String(out) = sanitize(&Payload::from(text)) else {
                return Err(TestCaseError::fail("expected string"));
            };
            prop_assert!(out.chars().count() <= MAX_STRING_CHARS);
            prop_assert!(!out.contains('\n'));
        }

        #[test]
        fn deep_nesting_is_always_cut(levels in 6usize..12) {
            let out = sanitize(&nested(levels, Payload::from(1i64)));
            prop_assert_eq!(&out["k"]["k"]["k"]["k"]["k"], DEPTH_LIMIT);
        }

        #[test]
        fn digest_is_deterministic(keys in proptest::collection::vec("[a-z]{1,8}", 0..10)) {
            let payload = Payload::object(keys.iter().map(|k| (k.clone(), Payload::from(k.as_str()))));
            let first = digest(Some(&payload));
            prop_assert_eq!(first.clone(), digest(Some(&payload)));
            prop_assert_eq!(first, digest(Some(&payload.clone())));
        }
    }
}
