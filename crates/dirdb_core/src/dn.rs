//! Distinguished names.
//!
//! A DN is a hierarchical, comparable name: a sequence of
//! `attr=value` components, leaf first, optionally preceded by extended
//! components in angle brackets (`<GUID=...>;CN=...`). Special names
//! beginning with `@` address control records; they are opaque and never
//! split into components.
//!
//! Comparison and lookup always go through the casefolded form; the
//! case-preserved form is what gets stored and shown.

use crate::error::{CoreError, CoreResult};
use bytes::Bytes;
use std::fmt;

/// A parsed distinguished name.
#[derive(Debug, Clone)]
pub struct Dn {
    special: Option<String>,
    components: Vec<(String, String)>,
    extended: Vec<(String, Bytes)>,
}

impl Dn {
    /// An empty DN (the root; parent of top-level entries).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            special: None,
            components: Vec::new(),
            extended: Vec::new(),
        }
    }

    /// Parses a DN from its string form.
    ///
    /// Accepts the empty string (the root), special `@` names, extended
    /// components (`<NAME=VALUE>;...`), and `attr=value` component lists
    /// with backslash escaping inside values.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a well-formed DN.
    pub fn parse(s: &str) -> CoreResult<Self> {
        if s.is_empty() {
            return Ok(Self::empty());
        }
        if s.starts_with('@') {
            return Ok(Self {
                special: Some(s.to_string()),
                components: Vec::new(),
                extended: Vec::new(),
            });
        }

        let mut extended = Vec::new();
        let mut rest = s;
        while rest.starts_with('<') {
            let close = rest
                .find('>')
                .ok_or_else(|| CoreError::operations(format!("unterminated extended component in DN '{s}'")))?;
            let inner = &rest[1..close];
            let eq = inner
                .find('=')
                .ok_or_else(|| CoreError::operations(format!("malformed extended component in DN '{s}'")))?;
            let name = &inner[..eq];
            let value = &inner[eq + 1..];
            if name.is_empty() {
                return Err(CoreError::operations(format!(
                    "empty extended component name in DN '{s}'"
                )));
            }
            extended.push((name.to_string(), decode_extended_value(value)));
            rest = &rest[close + 1..];
            rest = rest.strip_prefix(';').unwrap_or(rest);
        }

        let mut components = Vec::new();
        if !rest.is_empty() {
            for part in split_unescaped(rest, ',') {
                let (attr, value) = split_component(&part)
                    .ok_or_else(|| CoreError::operations(format!("malformed DN component in '{s}'")))?;
                components.push((attr, value));
            }
        }

        Ok(Self {
            special: None,
            components,
            extended,
        })
    }

    /// Returns true for `@`-prefixed control names.
    #[must_use]
    pub fn is_special(&self) -> bool {
        self.special.is_some()
    }

    /// Returns true for the empty (root) DN.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.special.is_none() && self.components.is_empty()
    }

    /// The case-preserved string form, without extended components.
    #[must_use]
    pub fn linearized(&self) -> String {
        if let Some(special) = &self.special {
            return special.clone();
        }
        self.components
            .iter()
            .map(|(attr, value)| format!("{attr}={}", escape_value(value)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The casefolded string form used for keying and comparison.
    ///
    /// Special names are already canonical and fold to themselves.
    #[must_use]
    pub fn casefolded(&self) -> String {
        if let Some(special) = &self.special {
            return special.clone();
        }
        self.components
            .iter()
            .map(|(attr, value)| {
                format!(
                    "{}={}",
                    attr.to_ascii_uppercase(),
                    escape_value(value.trim()).to_ascii_uppercase()
                )
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The parent DN: everything above the leaf component.
    ///
    /// A top-level entry's parent is the empty DN. Special names and the
    /// empty DN have no parent.
    #[must_use]
    pub fn parent(&self) -> Option<Dn> {
        if self.special.is_some() || self.components.is_empty() {
            return None;
        }
        Some(Dn {
            special: None,
            components: self.components[1..].to_vec(),
            extended: Vec::new(),
        })
    }

    /// Looks up an extended component value by name (case-insensitive).
    #[must_use]
    pub fn extended_component(&self, name: &str) -> Option<&Bytes> {
        self.extended
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Number of `attr=value` components.
    #[must_use]
    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Returns true if `self` is `other` or lies below it in the tree.
    #[must_use]
    pub fn is_descendant_or_self(&self, ancestor: &Dn) -> bool {
        if ancestor.is_empty() {
            return !self.is_special();
        }
        if self.special.is_some() || ancestor.special.is_some() {
            return self == ancestor;
        }
        let n = ancestor.components.len();
        if self.components.len() < n {
            return false;
        }
        let tail = Dn {
            special: None,
            components: self.components[self.components.len() - n..].to_vec(),
            extended: Vec::new(),
        };
        tail == *ancestor
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.casefolded() == other.casefolded()
    }
}

impl Eq for Dn {}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.linearized())
    }
}

/// Splits `attr=value`, unescaping the value. Attr names are plain
/// identifiers; anything else is malformed.
fn split_component(part: &str) -> Option<(String, String)> {
    let eq = part.find('=')?;
    let attr = part[..eq].trim();
    if attr.is_empty()
        || !attr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        || !attr.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
    {
        return None;
    }
    let value = unescape_value(&part[eq + 1..]);
    if value.is_empty() {
        return None;
    }
    Some((attr.to_string(), value))
}

/// Splits on an unescaped separator, preserving escapes in the pieces.
fn split_unescaped(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn unescape_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

fn escape_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == ',' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Extended component values carrying a textual GUID decode to its
/// 16-byte form; anything else stays as raw bytes.
fn decode_extended_value(value: &str) -> Bytes {
    if let Ok(guid) = uuid::Uuid::parse_str(value) {
        return Bytes::copy_from_slice(guid.as_bytes());
    }
    Bytes::copy_from_slice(value.as_bytes())
}
