//! Parses a single raw FIX message (SOH-delimited `tag=value` pairs) into a
//! [`FixMessage`]. This is a field-level parser only — it does not validate
//! checksums, required-field presence, or session-level semantics; that is
//! the [`crate::canon::canonicalize`] step's job.

use crate::model::{FixMessage, Tag};

/// Parses `bytes` — a single complete FIX message, SOH-delimited, with or
/// without a trailing separator — into a [`FixMessage`].
///
/// Malformed fields (no `=`, non-numeric tag, empty tag) are skipped rather
/// than rejected: the scanner is responsible for deciding whether a byte
/// range is a message at all, so by the time a range reaches the parser it
/// is treated as best-effort. This mirrors the permissive-decode stance the
/// linker and comparator rely on to keep operating across partially
/// corrupt logs.
pub fn parse(bytes: &[u8]) -> FixMessage {
    let mut msg = FixMessage::new();
    for field in bytes.split(|&b| b == 0x01) {
        if field.is_empty() {
            continue;
        }
        let Some(eq) = field.iter().position(|&b| b == b'=') else {
            continue;
        };
        let (tag_bytes, rest) = field.split_at(eq);
        let value = &rest[1..];
        if tag_bytes.is_empty() {
            continue;
        }
        let Ok(tag_str) = std::str::from_utf8(tag_bytes) else {
            continue;
        };
        let Ok(tag_num) = tag_str.parse::<u32>() else {
            continue;
        };
        let Some(tag) = Tag::new(tag_num) else {
            continue;
        };
        msg.push(tag, value.to_vec().into_boxed_slice());
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_message() {
        let raw = b"8=FIX.4.4\x0135=D\x0111=ORD1\x0110=128\x01";
        let msg = parse(raw);
        assert_eq!(msg.get_str(8), Some("FIX.4.4"));
        assert_eq!(msg.msg_type(), Some("D"));
        assert_eq!(msg.get_str(11), Some("ORD1"));
        assert_eq!(msg.get_str(10), Some("128"));
        assert_eq!(msg.len(), 4);
    }

    #[test]
    fn tolerates_missing_trailing_separator() {
        let raw = b"8=FIX.4.4\x0135=D\x0110=128";
        let msg = parse(raw);
        assert_eq!(msg.get_str(10), Some("128"));
    }

    #[test]
    fn skips_malformed_fields() {
        let raw = b"8=FIX.4.4\x01garbage\x01=novalue\x0135=D\x01";
        let msg = parse(raw);
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.msg_type(), Some("D"));
    }

    #[test]
    fn empty_input_yields_empty_message() {
        let msg = parse(b"");
        assert!(msg.is_empty());
    }

    #[test]
    fn value_may_contain_equals_sign() {
        let raw = b"58=a=b=c\x01";
        let msg = parse(raw);
        assert_eq!(msg.get_str(58), Some("a=b=c"));
    }
}
