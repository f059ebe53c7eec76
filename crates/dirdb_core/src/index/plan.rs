//! The query planner: compiling a filter tree into a candidate list.
//!
//! Recursive descent over the parse tree with set algebra at each
//! node. Candidate lists may over-approximate - the re-match after
//! candidate fetch is mandatory - so the planner is free to shortcut,
//! except where a strict list forbids widening.

use crate::database::Database;
use crate::dn::Dn;
use crate::error::{CoreError, CoreResult};
use crate::filter::{is_dn_attr, Filter};
use crate::index::{format_index_key, DnList};
use crate::schema::ATTR_UNIQUE_INDEX;
use bytes::Bytes;

/// What the planner learned about a subtree.
#[derive(Debug)]
pub(crate) enum PlanOutcome {
    /// Candidate values covering every possible match (maybe more).
    Matches(DnList),
    /// Provably nothing matches.
    NoMatches,
    /// The index cannot answer; the caller needs a full scan.
    Unindexed,
}

impl Database {
    /// Compiles a filter tree into a candidate list.
    pub(crate) fn plan_filter(&mut self, tree: &Filter) -> CoreResult<PlanOutcome> {
        match tree {
            Filter::And(children) => self.plan_and(children),
            Filter::Or(children) => self.plan_or(children),
            // An indexed NOT would need total-set knowledge; give up
            // and let an enclosing AND reduce the list instead.
            Filter::Not(_) => Ok(PlanOutcome::Unindexed),
            Filter::Equality { attr, value } => self.plan_equality(attr, value),
            Filter::Present { .. }
            | Filter::Substring { .. }
            | Filter::Greater { .. }
            | Filter::Less { .. }
            | Filter::Approx { .. }
            | Filter::Extended { .. } => Ok(PlanOutcome::Unindexed),
        }
    }

    fn plan_equality(&mut self, attr: &str, value: &Bytes) -> CoreResult<PlanOutcome> {
        if self.config().disallow_dn_filter && attr.eq_ignore_ascii_case("dn") {
            return Ok(PlanOutcome::Matches(DnList::new()));
        }
        if attr.starts_with('@') {
            // Pseudo-attributes are never user-searchable.
            return Ok(PlanOutcome::Matches(DnList::new()));
        }

        if is_dn_attr(attr) {
            let Ok(text) = std::str::from_utf8(value) else {
                return Ok(PlanOutcome::Matches(DnList::new()));
            };
            let Ok(dn) = Dn::parse(text) else {
                // Unparseable DN: no match.
                return Ok(PlanOutcome::Matches(DnList::new()));
            };
            return match self.index_dn_base(&dn) {
                Ok((list, _)) => Ok(PlanOutcome::Matches(list)),
                Err(CoreError::NoSuchObject) => Ok(PlanOutcome::NoMatches),
                Err(e) => Err(e),
            };
        }

        if let Some(guid_attr) = self.catalog.guid_attr() {
            if attr.eq_ignore_ascii_case(guid_attr) {
                // The GUID is the record key: a one-element candidate
                // list, no store lookup needed.
                let guid_attr = guid_attr.to_string();
                return match self.schema().canonicalise(&guid_attr, value) {
                    Ok(canon) => Ok(PlanOutcome::Matches(DnList::from_values(vec![canon]))),
                    Err(_) => Ok(PlanOutcome::Unindexed),
                };
            }
        }

        self.plan_simple(attr, value)
    }

    /// Equality on an ordinary attribute: load its index record.
    fn plan_simple(&mut self, attr: &str, value: &[u8]) -> CoreResult<PlanOutcome> {
        if !self.catalog.is_indexed(self.schema(), attr) {
            return Ok(PlanOutcome::Unindexed);
        }

        let max_key_length = self.config().max_key_length;
        let key = match format_index_key(self.schema(), &self.catalog, max_key_length, attr, value)
        {
            Ok(key) => key,
            // Key formatting can be refused (wildcard values); a full
            // scan still answers correctly.
            Err(CoreError::Operations { .. }) => return Ok(PlanOutcome::Unindexed),
            Err(e) => return Err(e),
        };

        // Truncation is ignored here: a truncated key over-matches and
        // the re-match filters the excess.
        match self.dn_list_load(&key.dn) {
            Ok(list) => Ok(PlanOutcome::Matches(list)),
            Err(CoreError::NoSuchObject) => Ok(PlanOutcome::NoMatches),
            Err(e) => Err(e),
        }
    }

    fn plan_or(&mut self, children: &[Filter]) -> CoreResult<PlanOutcome> {
        let guid_mode = self.catalog.guid_mode();
        let mut list = DnList::new();
        for child in children {
            match self.plan_filter(child)? {
                // X || 0 == X
                PlanOutcome::NoMatches => continue,
                // X || * == *
                PlanOutcome::Unindexed => return Ok(PlanOutcome::Unindexed),
                PlanOutcome::Matches(child_list) => list.union_with(child_list, guid_mode),
            }
        }
        if list.is_empty() {
            return Ok(PlanOutcome::NoMatches);
        }
        Ok(PlanOutcome::Matches(list))
    }

    fn plan_and(&mut self, children: &[Filter]) -> CoreResult<PlanOutcome> {
        // First pass: hunt for unique equality leaves (GUID, DN, or a
        // unique-indexed attribute). One hit settles the whole AND -
        // over-matching is fine, the re-match filters.
        for child in children {
            let Filter::Equality { attr, .. } = child else {
                continue;
            };
            if !self.is_unique_attr(attr) {
                continue;
            }
            match self.plan_filter(child)? {
                // 0 && X == 0
                PlanOutcome::NoMatches => return Ok(PlanOutcome::NoMatches),
                PlanOutcome::Matches(list) => return Ok(PlanOutcome::Matches(list)),
                PlanOutcome::Unindexed => {}
            }
        }

        // Second pass: intersect whatever the index can answer.
        let guid_mode = self.catalog.guid_mode();
        let mut list: Option<DnList> = None;
        for child in children {
            match self.plan_filter(child)? {
                PlanOutcome::NoMatches => return Ok(PlanOutcome::NoMatches),
                // This child contributes nothing; others may.
                PlanOutcome::Unindexed => continue,
                PlanOutcome::Matches(child_list) => {
                    let merged = match list.take() {
                        None => child_list,
                        Some(mut current) => {
                            current.intersect_with(&child_list, guid_mode);
                            current
                        }
                    };
                    if merged.is_empty() {
                        return Ok(PlanOutcome::NoMatches);
                    }
                    if merged.len() < 2 {
                        // Not worth loading the rest of the tree.
                        return Ok(PlanOutcome::Matches(merged));
                    }
                    list = Some(merged);
                }
            }
        }

        match list {
            Some(list) => Ok(PlanOutcome::Matches(list)),
            // None of the children were indexed.
            None => Ok(PlanOutcome::Unindexed),
        }
    }

    /// True for attributes whose equality match is at most one entry.
    fn is_unique_attr(&self, attr: &str) -> bool {
        if let Some(guid_attr) = self.catalog.guid_attr() {
            if attr.eq_ignore_ascii_case(guid_attr) {
                return true;
            }
        }
        if is_dn_attr(attr) {
            return true;
        }
        self.schema().attribute_flags(attr) & ATTR_UNIQUE_INDEX != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IDXATTR;
    use crate::database::Config;
    use crate::index::INDEXLIST_DN;
    use crate::schema::DirSchema;
    use dirdb_codec::{Element, Record};
    use dirdb_storage::MemoryKv;
    use std::sync::Arc;

    fn open_with_index_on_cn() -> Database {
        let mut db = Database::open(
            Arc::new(MemoryKv::new()),
            Arc::new(DirSchema::new()),
            Config::default(),
        )
        .unwrap();
        let indexlist =
            Record::new(INDEXLIST_DN).with_element(Element::single(IDXATTR, "cn"));
        db.put_record(&indexlist).unwrap();
        db.reload_catalog().unwrap();
        db
    }

    fn seed(db: &mut Database, index_dn: &str, dns: &[&str]) {
        let list = DnList::from_values(dns.iter().map(|d| Bytes::from(d.to_string())).collect());
        db.dn_list_store(index_dn, list).unwrap();
    }

    #[test]
    fn unindexed_attribute_falls_back() {
        let mut db = open_with_index_on_cn();
        let outcome = db.plan_filter(&Filter::eq("sn", "x")).unwrap();
        assert!(matches!(outcome, PlanOutcome::Unindexed));
    }

    #[test]
    fn not_is_never_indexed() {
        let mut db = open_with_index_on_cn();
        let outcome = db
            .plan_filter(&Filter::not(Filter::eq("cn", "a")))
            .unwrap();
        assert!(matches!(outcome, PlanOutcome::Unindexed));
    }

    #[test]
    fn equality_leaf_loads_the_index_record() {
        let mut db = open_with_index_on_cn();
        seed(&mut db, "@INDEX:CN:A", &["CN=a,O=X"]);

        match db.plan_filter(&Filter::eq("cn", "a")).unwrap() {
            PlanOutcome::Matches(list) => assert_eq!(list.len(), 1),
            other => panic!("expected matches, got {other:?}"),
        }
        assert!(matches!(
            db.plan_filter(&Filter::eq("cn", "zz")).unwrap(),
            PlanOutcome::NoMatches
        ));
    }

    #[test]
    fn or_unions_and_propagates_unindexed() {
        let mut db = open_with_index_on_cn();
        seed(&mut db, "@INDEX:CN:A", &["CN=a,O=X"]);
        seed(&mut db, "@INDEX:CN:B", &["CN=b,O=X"]);

        let f = Filter::or(vec![Filter::eq("cn", "a"), Filter::eq("cn", "b")]);
        match db.plan_filter(&f).unwrap() {
            PlanOutcome::Matches(list) => assert_eq!(list.len(), 2),
            other => panic!("expected matches, got {other:?}"),
        }

        let f = Filter::or(vec![Filter::eq("cn", "a"), Filter::eq("sn", "b")]);
        assert!(matches!(
            db.plan_filter(&f).unwrap(),
            PlanOutcome::Unindexed
        ));
    }

    #[test]
    fn and_intersects_and_skips_unindexed_children() {
        let mut db = open_with_index_on_cn();
        seed(&mut db, "@INDEX:CN:A", &["CN=a,O=X", "CN=a,O=Y", "CN=a,O=Z"]);
        seed(&mut db, "@INDEX:CN:B", &["CN=a,O=Y", "CN=a,O=Z", "CN=q,O=Q"]);

        let f = Filter::and(vec![Filter::eq("cn", "a"), Filter::eq("cn", "b")]);
        match db.plan_filter(&f).unwrap() {
            PlanOutcome::Matches(list) => assert_eq!(list.len(), 2),
            other => panic!("expected matches, got {other:?}"),
        }

        // An unindexed child inside an AND is simply skipped.
        let f = Filter::and(vec![Filter::eq("cn", "a"), Filter::present("sn")]);
        match db.plan_filter(&f).unwrap() {
            PlanOutcome::Matches(list) => assert_eq!(list.len(), 3),
            other => panic!("expected matches, got {other:?}"),
        }

        // All children unindexed: the whole AND is unindexed.
        let f = Filter::and(vec![Filter::present("sn")]);
        assert!(matches!(db.plan_filter(&f).unwrap(), PlanOutcome::Unindexed));
    }

    #[test]
    fn dn_filter_can_be_disallowed() {
        let kv = Arc::new(MemoryKv::new());
        let mut db = Database::open(
            kv,
            Arc::new(DirSchema::new()),
            Config {
                disallow_dn_filter: true,
                ..Config::default()
            },
        )
        .unwrap();
        match db.plan_filter(&Filter::eq("dn", "CN=a,O=X")).unwrap() {
            PlanOutcome::Matches(list) => assert!(list.is_empty()),
            other => panic!("expected empty matches, got {other:?}"),
        }
    }
}
