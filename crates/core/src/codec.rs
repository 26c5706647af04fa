//! Key codec: field-name escaping, identifier hashing, prefix matching
//!
//! ## Field names
//!
//! The backing store treats object keys that begin with `$` as update
//! operators. Caller field names with that prefix are stored with a leading
//! `\` and restored on read. The transformation is exactly invertible for
//! every name that does not itself start with `\$`.
//!
//! ## Identifier hashing
//!
//! `hash_identifier` = base64url(SHA-256(utf8(id))) without padding. Always
//! [`HASH_TOKEN_LEN`] characters long, and safe as a database name.
//!
//! ## Prefix matching
//!
//! [`PrefixMatcher`] renders the anchored pattern sent over the wire
//! (`^<escaped prefix>.*`) and evaluates it locally.

use crate::error::{Error, Result};
use crate::types::Record;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Leading character the backend reserves for operators
pub const OPERATOR_PREFIX: char = '$';

/// Marker prepended to field names that start with [`OPERATOR_PREFIX`]
pub const ESCAPE_MARKER: char = '\\';

/// Length of a [`hash_identifier`] token
pub const HASH_TOKEN_LEN: usize = 43;

/// Characters with special meaning in the backend's pattern language
const PATTERN_SPECIAL: &[char] = &[
    '\\', '+', '=', '@', '$', '!', '*', '(', ')', '[', ']', '{', '}', '<', '>', '&', '.', '?',
    '^', '|',
];

// ============================================================================
// Field names
// ============================================================================

/// Escape a field name for storage
pub fn escape_field_name(name: &str) -> Cow<'_, str> {
    if name.starts_with(OPERATOR_PREFIX) {
        let mut escaped = String::with_capacity(name.len() + 1);
        escaped.push(ESCAPE_MARKER);
        escaped.push_str(name);
        Cow::Owned(escaped)
    } else {
        Cow::Borrowed(name)
    }
}

/// Reverse [`escape_field_name`]
pub fn unescape_field_name(name: &str) -> Cow<'_, str> {
    let mut chars = name.chars();
    if chars.next() == Some(ESCAPE_MARKER) && chars.next() == Some(OPERATOR_PREFIX) {
        Cow::Borrowed(&name[ESCAPE_MARKER.len_utf8()..])
    } else {
        Cow::Borrowed(name)
    }
}

/// Escape every object key in `record`, recursively
pub fn escape_record(record: &Record) -> Record {
    record
        .iter()
        .map(|(k, v)| {
            (
                escape_field_name(k).into_owned(),
                rewrite_keys(v.clone(), &|k| escape_field_name(k).into_owned()),
            )
        })
        .collect()
}

/// Unescape every object key in `record`, recursively
pub fn unescape_record(record: Record) -> Record {
    record
        .into_iter()
        .map(|(k, v)| {
            (
                unescape_field_name(&k).into_owned(),
                rewrite_keys(v, &|k| unescape_field_name(k).into_owned()),
            )
        })
        .collect()
}

/// Escape object keys nested inside a single value
pub fn escape_value(value: &Value) -> Value {
    rewrite_keys(value.clone(), &|k| escape_field_name(k).into_owned())
}

/// Unescape object keys nested inside a single value
pub fn unescape_value(value: Value) -> Value {
    rewrite_keys(value, &|k| unescape_field_name(k).into_owned())
}

fn rewrite_keys(value: Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (f(&k), rewrite_keys(v, f)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| rewrite_keys(v, f)).collect()),
        other => other,
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Reject record keys that cannot be stored
///
/// The empty key is rejected: as a prefix it would select every record of
/// the graph.
pub fn validate_record_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_key("record key must not be empty"));
    }
    if key.contains('\0') {
        return Err(Error::invalid_key(format!(
            "record key {:?} contains NUL",
            key
        )));
    }
    Ok(())
}

/// Reject field names that cannot be stored
///
/// Names already starting with the escape sequence `\$` are rejected: they
/// would read back unescaped and collide with the escaped form of `$` names.
pub fn validate_field_name(name: &str) -> Result<()> {
    if name.contains('\0') {
        return Err(Error::invalid_field(format!(
            "field name {:?} contains NUL",
            name
        )));
    }
    let mut chars = name.chars();
    if chars.next() == Some(ESCAPE_MARKER) && chars.next() == Some(OPERATOR_PREFIX) {
        return Err(Error::invalid_field(format!(
            "field name {:?} starts with the escape sequence",
            name
        )));
    }
    Ok(())
}

/// Validate every object key nested inside `value`
pub fn validate_value_fields(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => map.iter().try_for_each(|(k, v)| {
            validate_field_name(k)?;
            validate_value_fields(v)
        }),
        Value::Array(items) => items.iter().try_for_each(validate_value_fields),
        _ => Ok(()),
    }
}

// ============================================================================
// Identifier hashing
// ============================================================================

/// One-way token for a logical-graph identifier
pub fn hash_identifier(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

// ============================================================================
// Prefix matching
// ============================================================================

/// Matches every record key that starts with a literal prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrefixMatcher {
    prefix: String,
    pattern: String,
}

impl PrefixMatcher {
    /// Build a matcher for `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let mut pattern = String::with_capacity(prefix.len() * 2 + 3);
        pattern.push('^');
        for c in prefix.chars() {
            if PATTERN_SPECIAL.contains(&c) {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(".*");
        Self { prefix, pattern }
    }

    /// The literal prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Anchored pattern in the backend's pattern language
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// An empty prefix selects everything
    pub fn is_match_all(&self) -> bool {
        self.prefix.is_empty()
    }

    /// Whether `key` matches the pattern
    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_escape_operator_prefixed_name() {
        assert_eq!(escape_field_name("$set"), "\\$set");
        assert_eq!(escape_field_name("name"), "name");
        assert_eq!(escape_field_name(""), "");
        assert_eq!(escape_field_name("a$b"), "a$b");
    }

    #[test]
    fn test_unescape_reverses_escape() {
        assert_eq!(unescape_field_name("\\$set"), "$set");
        assert_eq!(unescape_field_name("name"), "name");
        assert_eq!(unescape_field_name("\\name"), "\\name");
    }

    #[test]
    fn test_escape_record_recurses_into_objects_and_arrays() {
        let record = json!({
            "$top": {"$inner": 1, "plain": 2},
            "list": [{"$item": true}],
        });
        let record = record.as_object().unwrap();
        let escaped = escape_record(record);
        assert_eq!(
            Value::Object(escaped.clone()),
            json!({
                "\\$top": {"\\$inner": 1, "plain": 2},
                "list": [{"\\$item": true}],
            })
        );
        assert_eq!(&unescape_record(escaped), record);
    }

    #[test]
    fn test_hash_identifier_shape() {
        let token = hash_identifier("=!1111.2222");
        assert_eq!(token.len(), HASH_TOKEN_LEN);
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
    }

    #[test]
    fn test_hash_identifier_known_value() {
        // SHA-256("") = e3b0c442...b855
        assert_eq!(
            hash_identifier(""),
            "47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU"
        );
    }

    #[test]
    fn test_hash_identifier_deterministic_and_distinct() {
        assert_eq!(hash_identifier("graph-a"), hash_identifier("graph-a"));
        assert_ne!(hash_identifier("graph-a"), hash_identifier("graph-b"));
    }

    #[test]
    fn test_prefix_matcher_pattern_escapes_specials() {
        let m = PrefixMatcher::new("(=!a)+b");
        assert_eq!(m.pattern(), "^\\(\\=\\!a\\)\\+b.*");
        let m = PrefixMatcher::new("[@]$x{y}<z>&*");
        assert_eq!(m.pattern(), "^\\[\\@\\]\\$x\\{y\\}\\<z\\>\\&\\*.*");
    }

    #[test]
    fn test_prefix_matcher_dot_is_literal() {
        let m = PrefixMatcher::new("a.b");
        assert_eq!(m.pattern(), "^a\\.b.*");
        assert!(m.matches("a.b/c"));
        assert!(!m.matches("axb/c"));
    }

    #[test]
    fn test_prefix_matcher_matches_only_at_start() {
        let m = PrefixMatcher::new("a/");
        assert!(m.matches("a/"));
        assert!(m.matches("a/b"));
        assert!(!m.matches("x/a/b"));
        assert!(!m.matches("a"));
    }

    #[test]
    fn test_empty_prefix_matches_everything() {
        let m = PrefixMatcher::new("");
        assert!(m.is_match_all());
        assert_eq!(m.pattern(), "^.*");
        assert!(m.matches(""));
        assert!(m.matches("anything"));
    }

    #[test]
    fn test_validate_record_key() {
        assert!(validate_record_key("a/b").is_ok());
        assert!(validate_record_key("").unwrap_err().is_malformed_input());
        assert!(validate_record_key("a\0b").is_err());
    }

    #[test]
    fn test_validate_field_name() {
        assert!(validate_field_name("").is_ok());
        assert!(validate_field_name("$x").is_ok());
        assert!(validate_field_name("x\0").is_err());
        assert!(validate_field_name("\\$a").unwrap_err().is_malformed_input());
        assert!(validate_field_name("\\a").is_ok());
        assert!(validate_field_name("a\\$").is_ok());
    }

    #[test]
    fn test_validate_value_fields_recurses() {
        assert!(validate_value_fields(&json!({"$a": {"b": [1, {"$c": 2}]}})).is_ok());
        assert!(validate_value_fields(&json!("\\$plain string")).is_ok());
        let nested = json!({"a": [{"\\$b": 1}]});
        assert!(validate_value_fields(&nested).unwrap_err().is_malformed_input());
    }

    proptest! {
        #[test]
        fn prop_escape_round_trip(name in "\\PC*") {
            prop_assume!(!name.starts_with("\\$"));
            let escaped = escape_field_name(&name).into_owned();
            prop_assert_eq!(unescape_field_name(&escaped), name.as_str());
        }

        #[test]
        fn prop_escaped_names_never_look_like_operators(name in "\\$\\PC*") {
            let escaped = escape_field_name(&name);
            prop_assert!(!escaped.starts_with(OPERATOR_PREFIX));
            prop_assert_eq!(unescape_field_name(&escaped), name.as_str());
        }

        #[test]
        fn prop_prefix_matcher_agrees_with_starts_with(prefix in "\\PC{0,8}", rest in "\\PC{0,8}") {
            let key = format!("{}{}", prefix, rest);
            prop_assert!(PrefixMatcher::new(prefix.clone()).matches(&key));
        }
    }
}
