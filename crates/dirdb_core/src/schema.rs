//! Schema service contract and the default attribute schema.

use crate::error::{CoreError, CoreResult};
use bytes::Bytes;
use std::collections::HashMap;

/// The attribute participates in equality indexing.
pub const ATTR_INDEXED: u32 = 0x0000_0001;

/// The attribute carries a uniqueness constraint enforced through its
/// index.
pub const ATTR_UNIQUE_INDEX: u32 = 0x0000_0002;

/// How an attribute's values canonicalise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// Case-insensitive text: trimmed and uppercased for indexing.
    CaseIgnore,
    /// Opaque binary: indexed byte-for-byte (GUIDs, SIDs).
    Binary,
}

/// The schema collaborator.
///
/// The index core never interprets attribute values itself: it asks the
/// schema for the canonical (indexed) form, for a printable rendering in
/// diagnostics, and for per-attribute flags.
pub trait Schema: Send + Sync {
    /// Converts a value to its canonical indexed form.
    ///
    /// # Errors
    ///
    /// Canonicalisation may refuse a value (for example a wildcard in a
    /// text attribute); the caller falls back to unindexed matching.
    fn canonicalise(&self, attr: &str, value: &[u8]) -> CoreResult<Bytes>;

    /// Renders a value for human-readable diagnostics.
    fn ldif_write(&self, attr: &str, value: &[u8]) -> String;

    /// Returns the `ATTR_*` flags for an attribute.
    fn attribute_flags(&self, attr: &str) -> u32;
}

/// A simple table-driven schema.
///
/// Attributes default to case-insensitive text with no flags; specific
/// attributes can be registered with their own syntax and flags.
#[derive(Debug, Default)]
pub struct DirSchema {
    attributes: HashMap<String, (u32, Syntax)>,
}

impl DirSchema {
    /// Creates an empty schema where every attribute is plain
    /// case-insensitive text.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an attribute, builder style.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, flags: u32, syntax: Syntax) -> Self {
        self.attributes
            .insert(name.to_ascii_lowercase(), (flags, syntax));
        self
    }

    fn lookup(&self, attr: &str) -> (u32, Syntax) {
        self.attributes
            .get(&attr.to_ascii_lowercase())
            .copied()
            .unwrap_or((0, Syntax::CaseIgnore))
    }
}

impl Schema for DirSchema {
    fn canonicalise(&self, attr: &str, value: &[u8]) -> CoreResult<Bytes> {
        let (_, syntax) = self.lookup(attr);
        match syntax {
            Syntax::Binary => Ok(Bytes::copy_from_slice(value)),
            Syntax::CaseIgnore => {
                if value.contains(&b'*') {
                    return Err(CoreError::operations(format!(
                        "refusing to canonicalise wildcard value for attribute '{attr}'"
                    )));
                }
                let trimmed = trim_ascii(value);
                Ok(Bytes::from(trimmed.to_ascii_uppercase()))
            }
        }
    }

    fn ldif_write(&self, attr: &str, value: &[u8]) -> String {
        let (_, syntax) = self.lookup(attr);
        if syntax == Syntax::Binary && value.len() == 16 {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(value);
            return uuid::Uuid::from_bytes(bytes).to_string();
        }
        String::from_utf8_lossy(value).into_owned()
    }

    fn attribute_flags(&self, attr: &str) -> u32 {
        self.lookup(attr).0
    }
}

fn trim_ascii(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &value[start..end]
}

/// Decides whether an index key value needs base64 protection.
///
/// Values that begin with a space, `#`, `:`, or `<`, end with a space,
/// or contain anything outside printable ASCII cannot appear raw in a
/// key.
#[must_use]
pub fn needs_base64(value: &[u8]) -> bool {
    let Some((&first, _)) = value.split_first() else {
        return false;
    };
    if matches!(first, b' ' | b'#' | b':' | b'<') {
        return true;
    }
    if value.last() == Some(&b' ') {
        return true;
    }
    value.iter().any(|&b| !(0x20..=0x7e).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_ignore_uppercases_and_trims() {
        let schema = DirSchema::new();
        let v = schema.canonicalise("cn", b"  Alice ").unwrap();
        assert_eq!(v.as_ref(), b"ALICE");
    }

    #[test]
    fn wildcards_are_refused() {
        let schema = DirSchema::new();
        assert!(schema.canonicalise("cn", b"Ali*").is_err());
    }

    #[test]
    fn binary_is_identity() {
        let schema = DirSchema::new().with_attribute("objectGUID", 0, Syntax::Binary);
        let raw = [0u8, 1, 2, 0xff];
        let v = schema.canonicalise("objectGUID", &raw).unwrap();
        assert_eq!(v.as_ref(), &raw);
    }

    #[test]
    fn ldif_write_renders_guids() {
        let schema = DirSchema::new().with_attribute("objectGUID", 0, Syntax::Binary);
        let guid = [0u8; 16];
        assert_eq!(
            schema.ldif_write("objectGUID", &guid),
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn flags_default_to_none() {
        let schema = DirSchema::new().with_attribute("sid", ATTR_UNIQUE_INDEX, Syntax::Binary);
        assert_eq!(schema.attribute_flags("SID"), ATTR_UNIQUE_INDEX);
        assert_eq!(schema.attribute_flags("cn"), 0);
    }

    #[test]
    fn base64_decision() {
        assert!(!needs_base64(b""));
        assert!(!needs_base64(b"ALICE"));
        assert!(needs_base64(b" leading"));
        assert!(needs_base64(b"trailing "));
        assert!(needs_base64(b":colon"));
        assert!(needs_base64(b"<angle"));
        assert!(needs_base64(b"#hash"));
        assert!(needs_base64(&[0x01, 0x02]));
        assert!(needs_base64("caf\u{e9}".as_bytes()));
    }
}
