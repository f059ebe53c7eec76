//! Index key formatting.
//!
//! An index key is the DN of an index record, composed from an
//! attribute and a value. Keys that would exceed the configured maximum
//! are truncated and moved into a disjoint keyspace by switching the
//! separators from `:`/`::` to `#`/`##`; lookups against a truncated
//! key must verify candidates against the real records afterwards.

use crate::catalog::Catalog;
use crate::error::{CoreError, CoreResult};
use crate::index::{IDXDN, IDXONE, INDEX};
use crate::schema::{needs_base64, Schema};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;

/// Whether a formatted key had to be shortened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Truncation {
    /// The key fits; lookups through it are exact.
    NotTruncated,
    /// The value portion was cut; candidates need post-verification.
    Truncated,
}

/// A formatted index key plus what the formatter learned on the way.
#[derive(Debug)]
pub(crate) struct IndexKey {
    /// The index record's DN, e.g. `@INDEX:CN:ALICE`.
    pub dn: String,
    /// Truncation state of the key.
    pub truncation: Truncation,
    /// Schema flags of the attribute (0 for pseudo-attributes).
    pub attr_flags: u32,
}

/// The backing store key grows by this much around the DN ("DN=" plus
/// a terminator), which counts against the key budget.
const RECORD_KEY_OVERHEAD: usize = 4;

/// Formats the index key for `(attr, value)`.
///
/// Pseudo-attributes (leading `@`) pass both name and value through
/// untouched; real attributes are casefolded and their value
/// canonicalised by the schema, which may refuse.
///
/// # Errors
///
/// Fails if canonicalisation refuses the value or if `max_key_length`
/// cannot fit even a minimal key for this attribute.
pub(crate) fn format_index_key(
    schema: &dyn Schema,
    catalog: &Catalog,
    max_key_length: usize,
    attr: &str,
    value: &[u8],
) -> CoreResult<IndexKey> {
    let max_key_length = if max_key_length == 0 {
        usize::MAX
    } else {
        max_key_length
    };

    let (attr_for_dn, canon, attr_flags) = if attr.starts_with('@') {
        (attr.to_string(), Bytes::copy_from_slice(value), 0)
    } else {
        (
            attr.to_ascii_uppercase(),
            schema.canonicalise(attr, value)?,
            schema.attribute_flags(attr),
        )
    };
    let attr_len = attr_for_dn.len();
    let indx_len = INDEX.len();

    // Worst case needs three separators and at least one value byte.
    let min_key_length = RECORD_KEY_OVERHEAD + indx_len + 3 + 1;
    if max_key_length < min_key_length + attr_len {
        return Err(CoreError::operations(format!(
            "max_key_length is too small ({max_key_length}) < ({})",
            min_key_length + attr_len
        )));
    }
    let max_key_length = max_key_length - RECORD_KEY_OVERHEAD;

    // A casefolded DN is already linearized and separator-safe, so the
    // DN-valued indices skip base64 when the GUID index is enabled.
    let should_b64 = if catalog.guid_mode() && (attr == IDXDN || attr == IDXONE) {
        false
    } else {
        needs_base64(&canon)
    };

    if should_b64 {
        let vstr = BASE64.encode(&canon);
        let key_len = 3 + indx_len + attr_len + vstr.len();
        if key_len > max_key_length {
            let keep = vstr.len() - (key_len - max_key_length);
            Ok(IndexKey {
                dn: format!("{INDEX}#{attr_for_dn}##{}", &vstr[..keep]),
                truncation: Truncation::Truncated,
                attr_flags,
            })
        } else {
            Ok(IndexKey {
                dn: format!("{INDEX}:{attr_for_dn}::{vstr}"),
                truncation: Truncation::NotTruncated,
                attr_flags,
            })
        }
    } else {
        let text = std::str::from_utf8(&canon)
            .map_err(|_| CoreError::operations("index key value is not valid UTF-8"))?;
        let key_len = 2 + indx_len + attr_len + text.len();
        if key_len > max_key_length {
            let mut keep = text.len() - (key_len - max_key_length);
            while !text.is_char_boundary(keep) {
                keep -= 1;
            }
            Ok(IndexKey {
                dn: format!("{INDEX}#{attr_for_dn}#{}", &text[..keep]),
                truncation: Truncation::Truncated,
                attr_flags,
            })
        } else {
            Ok(IndexKey {
                dn: format!("{INDEX}:{attr_for_dn}:{text}"),
                truncation: Truncation::NotTruncated,
                attr_flags,
            })
        }
    }
}
