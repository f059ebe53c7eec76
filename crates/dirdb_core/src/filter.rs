//! Filter trees and record matching.
//!
//! The filter parser lives outside the core; this module defines the
//! tree it produces and the full re-match evaluation that runs over
//! every candidate record after index lookup. Only equality composes
//! with the index; everything else matches here and nowhere else.

use crate::dn::Dn;
use crate::error::CoreResult;
use crate::schema::Schema;
use bytes::Bytes;
use dirdb_codec::Record;

/// Search scope relative to the base DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The base entry itself.
    Base,
    /// Direct children of the base.
    OneLevel,
    /// The base and everything below it.
    Subtree,
}

/// A filter parse tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every child must match.
    And(Vec<Filter>),
    /// At least one child must match.
    Or(Vec<Filter>),
    /// The child must not match.
    Not(Box<Filter>),
    /// Attribute equality; the only leaf the index can answer.
    Equality {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: Bytes,
    },
    /// Attribute presence.
    Present {
        /// Attribute name.
        attr: String,
    },
    /// Substring match with optional anchors.
    Substring {
        /// Attribute name.
        attr: String,
        /// Leading anchor (`abc*`).
        start: Option<Bytes>,
        /// Interior chunks (`*abc*`), in order.
        middle: Vec<Bytes>,
        /// Trailing anchor (`*abc`).
        end: Option<Bytes>,
    },
    /// Ordering match: value >= asserted.
    Greater {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: Bytes,
    },
    /// Ordering match: value <= asserted.
    Less {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: Bytes,
    },
    /// Approximate match; evaluated as canonical equality.
    Approx {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: Bytes,
    },
    /// Extensible match; never satisfied by this core.
    Extended {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: Bytes,
    },
}

impl Filter {
    /// Builds an equality leaf.
    #[must_use]
    pub fn eq(attr: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::Equality {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Builds a presence leaf.
    #[must_use]
    pub fn present(attr: impl Into<String>) -> Self {
        Self::Present { attr: attr.into() }
    }

    /// Builds a conjunction.
    #[must_use]
    pub fn and(children: Vec<Filter>) -> Self {
        Self::And(children)
    }

    /// Builds a disjunction.
    #[must_use]
    pub fn or(children: Vec<Filter>) -> Self {
        Self::Or(children)
    }

    /// Builds a negation.
    #[must_use]
    pub fn not(child: Filter) -> Self {
        Self::Not(Box::new(child))
    }
}

/// True for the attribute names that address the DN itself.
pub(crate) fn is_dn_attr(attr: &str) -> bool {
    attr.eq_ignore_ascii_case("dn") || attr.eq_ignore_ascii_case("distinguishedName")
}

/// Evaluates a filter tree against a record (no scope check).
pub(crate) fn matches_record(
    schema: &dyn Schema,
    record: &Record,
    filter: &Filter,
) -> CoreResult<bool> {
    match filter {
        Filter::And(children) => {
            for child in children {
                if !matches_record(schema, record, child)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Filter::Or(children) => {
            for child in children {
                if matches_record(schema, record, child)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Filter::Not(child) => Ok(!matches_record(schema, record, child)?),
        Filter::Equality { attr, value } | Filter::Approx { attr, value } => {
            if is_dn_attr(attr) {
                let record_dn = Dn::parse(&record.dn)?;
                return match Dn::parse(&String::from_utf8_lossy(value)) {
                    Ok(asserted) => Ok(record_dn == asserted),
                    Err(_) => Ok(false),
                };
            }
            let Some(el) = record.find_element(attr) else {
                return Ok(false);
            };
            Ok(el
                .values
                .iter()
                .any(|v| values_equal(schema, attr, v, value)))
        }
        Filter::Present { attr } => {
            if is_dn_attr(attr) {
                return Ok(true);
            }
            Ok(record.find_element(attr).is_some())
        }
        Filter::Substring {
            attr,
            start,
            middle,
            end,
        } => {
            let Some(el) = record.find_element(attr) else {
                return Ok(false);
            };
            let start = start.as_ref().map(|c| canonical_or_raw(schema, attr, c));
            let middle: Vec<Bytes> = middle
                .iter()
                .map(|c| canonical_or_raw(schema, attr, c))
                .collect();
            let end = end.as_ref().map(|c| canonical_or_raw(schema, attr, c));
            Ok(el.values.iter().any(|v| {
                let v = canonical_or_raw(schema, attr, v);
                substring_match(&v, start.as_deref(), &middle, end.as_deref())
            }))
        }
        Filter::Greater { attr, value } => Ok(ordering_match(schema, record, attr, value, true)),
        Filter::Less { attr, value } => Ok(ordering_match(schema, record, attr, value, false)),
        Filter::Extended { .. } => Ok(false),
    }
}

/// Checks a record DN against the search base and scope.
pub(crate) fn matches_scope(record_dn: &Dn, base: &Dn, scope: Scope) -> bool {
    match scope {
        Scope::Base => record_dn == base,
        Scope::OneLevel => record_dn.parent().as_ref() == Some(base),
        Scope::Subtree => record_dn.is_descendant_or_self(base),
    }
}

fn values_equal(schema: &dyn Schema, attr: &str, a: &[u8], b: &[u8]) -> bool {
    match (schema.canonicalise(attr, a), schema.canonicalise(attr, b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => a == b,
    }
}

fn canonical_or_raw(schema: &dyn Schema, attr: &str, value: &[u8]) -> Bytes {
    schema
        .canonicalise(attr, value)
        .unwrap_or_else(|_| Bytes::copy_from_slice(value))
}

fn ordering_match(
    schema: &dyn Schema,
    record: &Record,
    attr: &str,
    value: &Bytes,
    greater: bool,
) -> bool {
    let Some(el) = record.find_element(attr) else {
        return false;
    };
    let asserted = canonical_or_raw(schema, attr, value);
    el.values.iter().any(|v| {
        let v = canonical_or_raw(schema, attr, v);
        if greater {
            v >= asserted
        } else {
            v <= asserted
        }
    })
}

fn substring_match(
    value: &[u8],
    start: Option<&[u8]>,
    middle: &[Bytes],
    end: Option<&[u8]>,
) -> bool {
    let mut pos = 0;
    if let Some(prefix) = start {
        if !value.starts_with(prefix) {
            return false;
        }
        pos = prefix.len();
    }
    for chunk in middle {
        match find_subslice(&value[pos..], chunk) {
            Some(idx) => pos += idx + chunk.len(),
            None => return false,
        }
    }
    if let Some(suffix) = end {
        let remaining = &value[pos..];
        if remaining.len() < suffix.len() || !remaining.ends_with(suffix) {
            return false;
        }
    }
    true
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
