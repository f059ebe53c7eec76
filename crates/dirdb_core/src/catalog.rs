//! The index catalog: which attributes are indexed, and in which mode.
//!
//! Normally read from the `@INDEXLIST` control record once per
//! transaction. Override hooks can replace the control record entirely;
//! when they do, indexed-ness comes from schema flags and `@INDEXLIST`
//! is never consulted.

use crate::schema::{Schema, ATTR_INDEXED};
use dirdb_codec::Record;
use std::collections::HashSet;

/// Attribute of `@INDEXLIST` listing the indexed attributes.
pub const IDXATTR: &str = "@IDXATTR";
/// Attribute of `@INDEXLIST` naming the GUID attribute (GUID mode).
pub const IDXGUID: &str = "@IDXGUID";
/// Attribute of `@INDEXLIST` naming the extended-DN GUID component.
pub const IDX_DN_GUID: &str = "@IDX_DN_GUID";

/// Cached view of the index configuration.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    attributes: HashSet<String>,
    guid_attr: Option<String>,
    guid_dn_component: Option<String>,
    one_level: bool,
    use_schema_flags: bool,
}

impl Catalog {
    /// Builds a catalog from the `@INDEXLIST` record, or an empty one if
    /// the record is absent.
    #[must_use]
    pub fn from_record(indexlist: Option<&Record>) -> Self {
        let Some(rec) = indexlist else {
            return Self::default();
        };

        let attributes = rec
            .find_element(IDXATTR)
            .map(|el| {
                el.values
                    .iter()
                    .map(|v| String::from_utf8_lossy(v).to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let guid_attr = rec
            .first_value(IDXGUID)
            .map(|v| String::from_utf8_lossy(v).into_owned());
        let guid_dn_component = rec
            .first_value(IDX_DN_GUID)
            .map(|v| String::from_utf8_lossy(v).into_owned());

        let one_level = rec
            .first_value(crate::index::IDXONE)
            .map(|v| matches!(v.as_ref(), b"1" | b"true" | b"TRUE"))
            .unwrap_or(false);

        Self {
            attributes,
            guid_attr,
            guid_dn_component,
            one_level,
            use_schema_flags: false,
        }
    }

    /// Builds a catalog from override hooks, bypassing `@INDEXLIST`.
    ///
    /// Indexed-ness then comes from [`Schema::attribute_flags`].
    #[must_use]
    pub fn from_overrides(
        one_level: bool,
        guid_attr: Option<String>,
        guid_dn_component: Option<String>,
    ) -> Self {
        Self {
            attributes: HashSet::new(),
            guid_attr,
            guid_dn_component,
            one_level,
            use_schema_flags: true,
        }
    }

    /// Replaces the GUID configuration (the GUID override hook).
    pub fn set_guid_index(&mut self, attr: String, dn_component: Option<String>) {
        self.guid_attr = Some(attr);
        self.guid_dn_component = dn_component;
    }

    /// True when entries are keyed by GUID rather than DN.
    #[must_use]
    pub fn guid_mode(&self) -> bool {
        self.guid_attr.is_some()
    }

    /// The GUID attribute name, in GUID mode.
    #[must_use]
    pub fn guid_attr(&self) -> Option<&str> {
        self.guid_attr.as_deref()
    }

    /// The extended-DN component carrying the GUID, if configured.
    #[must_use]
    pub fn guid_dn_component(&self) -> Option<&str> {
        self.guid_dn_component.as_deref()
    }

    /// True when the one-level parent index is maintained.
    #[must_use]
    pub fn one_level_indexes(&self) -> bool {
        self.one_level
    }

    /// True when any attribute equality index exists.
    #[must_use]
    pub fn has_attribute_indexes(&self) -> bool {
        self.use_schema_flags || !self.attributes.is_empty()
    }

    /// Decides whether `attr` is equality-indexed.
    ///
    /// The GUID attribute itself is never listed: it is implicitly
    /// covered by being the record key.
    #[must_use]
    pub fn is_indexed(&self, schema: &dyn Schema, attr: &str) -> bool {
        if let Some(guid_attr) = &self.guid_attr {
            if attr.eq_ignore_ascii_case(guid_attr) {
                return false;
            }
        }
        if self.use_schema_flags {
            return schema.attribute_flags(attr) & ATTR_INDEXED != 0;
        }
        self.attributes.contains(&attr.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DirSchema;
    use dirdb_codec::Element;

    #[test]
    fn absent_record_means_nothing_indexed() {
        let catalog = Catalog::from_record(None);
        let schema = DirSchema::new();
        assert!(!catalog.has_attribute_indexes());
        assert!(!catalog.guid_mode());
        assert!(!catalog.is_indexed(&schema, "cn"));
    }

    #[test]
    fn indexlist_attributes_are_case_insensitive() {
        let rec = Record::new("@INDEXLIST").with_element(Element::single(IDXATTR, "cn"));
        let catalog = Catalog::from_record(Some(&rec));
        let schema = DirSchema::new();
        assert!(catalog.is_indexed(&schema, "CN"));
        assert!(!catalog.is_indexed(&schema, "sn"));
    }

    #[test]
    fn guid_attr_is_implicitly_covered() {
        let rec = Record::new("@INDEXLIST")
            .with_element(Element::single(IDXATTR, "objectGUID"))
            .with_element(Element::single(IDXGUID, "objectGUID"));
        let catalog = Catalog::from_record(Some(&rec));
        let schema = DirSchema::new();
        assert!(catalog.guid_mode());
        assert!(!catalog.is_indexed(&schema, "objectGUID"));
    }

    #[test]
    fn one_level_toggle() {
        let rec = Record::new("@INDEXLIST").with_element(Element::single(crate::index::IDXONE, "1"));
        let catalog = Catalog::from_record(Some(&rec));
        assert!(catalog.one_level_indexes());
    }

    #[test]
    fn overrides_use_schema_flags() {
        let catalog = Catalog::from_overrides(true, Some("objectGUID".into()), Some("GUID".into()));
        let schema = DirSchema::new().with_attribute("cn", ATTR_INDEXED, crate::schema::Syntax::CaseIgnore);
        assert!(catalog.has_attribute_indexes());
        assert!(catalog.is_indexed(&schema, "cn"));
        assert!(!catalog.is_indexed(&schema, "sn"));
        assert_eq!(catalog.guid_dn_component(), Some("GUID"));
    }
}
