//! End-to-end scenarios over an in-memory backing store.

use bytes::Bytes;
use dirdb_core::{
    Config, Database, DirSchema, Dn, Element, Filter, Record, Scope, SearchDisposition,
    SearchRequest, Syntax, ATTR_UNIQUE_INDEX, IDXATTR, IDXGUID, IDXONE, INDEXLIST_DN,
};
use dirdb_storage::{KvStore, MemoryKv};
use std::sync::Arc;

fn open(schema: DirSchema, config: Config) -> (Arc<MemoryKv>, Database) {
    let kv = Arc::new(MemoryKv::new());
    let db = Database::open(kv.clone(), Arc::new(schema), config).unwrap();
    (kv, db)
}

fn indexlist(attrs: &[&str], guid_attr: Option<&str>, one_level: bool) -> Record {
    let mut rec = Record::new(INDEXLIST_DN);
    if !attrs.is_empty() {
        rec = rec.with_element(Element::new(
            IDXATTR,
            attrs.iter().map(|a| Bytes::from(a.to_string())).collect(),
        ));
    }
    if let Some(attr) = guid_attr {
        rec = rec.with_element(Element::single(IDXGUID, attr.to_string()));
    }
    if one_level {
        rec = rec.with_element(Element::single(IDXONE, "1"));
    }
    rec
}

fn configure(db: &mut Database, indexlist_record: &Record) {
    db.put_record(indexlist_record).unwrap();
    // A transaction start re-reads the catalog; outside one, open a
    // throwaway transaction to pick the new control record up.
    db.transaction_start().unwrap();
    db.transaction_commit().unwrap();
}

fn add_entry(db: &mut Database, record: &Record) {
    db.put_record(record).unwrap();
    db.index_add_new(record).unwrap();
}

fn remove_entry(db: &mut Database, record: &Record) {
    db.index_delete(record).unwrap();
    db.delete_record(record).unwrap();
}

fn search_dns(db: &mut Database, base: &str, scope: Scope, tree: &Filter) -> Vec<String> {
    let base = Dn::parse(base).unwrap();
    let mut dns = Vec::new();
    let disposition = db
        .search_indexed(
            &SearchRequest {
                base: &base,
                scope,
                tree,
                attrs: None,
            },
            &mut |record| {
                dns.push(record.dn.clone());
                Ok(dirdb_core::Flow::Continue)
            },
        )
        .unwrap();
    match disposition {
        SearchDisposition::Indexed(count) => assert_eq!(count as usize, dns.len()),
        SearchDisposition::Unindexed => panic!("expected an indexed search"),
    }
    dns
}

fn guid(n: u8) -> Bytes {
    Bytes::copy_from_slice(&[n; 16])
}

// Scenario 1: DN-mode add, search, delete.
#[test]
fn dn_mode_add_search_delete() {
    let (_kv, mut db) = open(DirSchema::new(), Config::default());
    configure(&mut db, &indexlist(&["cn"], None, false));

    let alice = Record::new("CN=Alice,O=X")
        .with_element(Element::single("cn", "Alice"))
        .with_element(Element::single("sn", "A"));
    add_entry(&mut db, &alice);

    let found = search_dns(&mut db, "", Scope::Subtree, &Filter::eq("cn", "Alice"));
    assert_eq!(found, vec!["CN=Alice,O=X".to_string()]);

    remove_entry(&mut db, &alice);
    let found = search_dns(&mut db, "", Scope::Subtree, &Filter::eq("cn", "Alice"));
    assert!(found.is_empty());
}

// Scenario 2: GUID-mode uniqueness on a UNIQUE_INDEX attribute.
#[test]
fn guid_mode_unique_index_rejects_duplicates() {
    let schema = DirSchema::new()
        .with_attribute("objectGUID", 0, Syntax::Binary)
        .with_attribute("sid", ATTR_UNIQUE_INDEX, Syntax::Binary);
    let (_kv, mut db) = open(schema, Config::default());
    configure(&mut db, &indexlist(&["sid"], Some("objectGUID"), false));

    let r1 = Record::new("CN=One,O=X")
        .with_element(Element::single("objectGUID", guid(1)))
        .with_element(Element::single("sid", vec![0x01u8]));
    let r2 = Record::new("CN=Two,O=X")
        .with_element(Element::single("objectGUID", guid(2)))
        .with_element(Element::single("sid", vec![0x01u8]));

    add_entry(&mut db, &r1);
    db.put_record(&r2).unwrap();
    let err = db.index_add_new(&r2).unwrap_err();
    assert!(matches!(
        err,
        dirdb_core::CoreError::ConstraintViolation { .. }
    ));
}

// Scenario 3: one-level scope is strict.
#[test]
fn one_level_scope_returns_exactly_the_children() {
    let (_kv, mut db) = open(DirSchema::new(), Config::default());
    configure(&mut db, &indexlist(&["cn"], None, true));

    for (dn, cn) in [
        ("CN=a,O=P", "a"),
        ("CN=b,O=P", "b"),
        ("CN=c,O=Q", "c"),
    ] {
        let rec = Record::new(dn).with_element(Element::single("cn", cn));
        add_entry(&mut db, &rec);
    }

    let found = search_dns(&mut db, "O=P", Scope::OneLevel, &Filter::present("cn"));
    assert_eq!(found.len(), 2);
    assert!(found.contains(&"CN=a,O=P".to_string()));
    assert!(found.contains(&"CN=b,O=P".to_string()));

    let found = search_dns(&mut db, "O=P", Scope::OneLevel, &Filter::eq("cn", "a"));
    assert_eq!(found, vec!["CN=a,O=P".to_string()]);
}

// Scenario 4: colliding truncated keys are disambiguated by re-match.
#[test]
fn truncated_key_collisions_are_post_verified() {
    let (_kv, mut db) = open(
        DirSchema::new(),
        Config {
            max_key_length: 40,
            ..Config::default()
        },
    );
    configure(&mut db, &indexlist(&["cn"], None, false));

    let long1 = format!("{}1", "X".repeat(40));
    let long2 = format!("{}2", "X".repeat(40));
    let r1 = Record::new("CN=first,O=X").with_element(Element::single("cn", long1.clone()));
    let r2 = Record::new("CN=second,O=X").with_element(Element::single("cn", long2));
    add_entry(&mut db, &r1);
    add_entry(&mut db, &r2);

    let found = search_dns(
        &mut db,
        "",
        Scope::Subtree,
        &Filter::eq("cn", long1.as_bytes().to_vec()),
    );
    assert_eq!(found, vec!["CN=first,O=X".to_string()]);
}

// Scenario 5: OR of two equality leaves, no duplicates.
#[test]
fn or_unions_without_duplicates() {
    let (_kv, mut db) = open(DirSchema::new(), Config::default());
    configure(&mut db, &indexlist(&["cn"], None, false));

    for (dn, cn) in [
        ("CN=ra,O=X", "a"),
        ("CN=rb,O=X", "b"),
        ("CN=rc,O=X", "c"),
    ] {
        let rec = Record::new(dn).with_element(Element::single("cn", cn));
        add_entry(&mut db, &rec);
    }

    let tree = Filter::or(vec![Filter::eq("cn", "a"), Filter::eq("cn", "b")]);
    let mut found = search_dns(&mut db, "", Scope::Subtree, &tree);
    found.sort();
    assert_eq!(
        found,
        vec!["CN=ra,O=X".to_string(), "CN=rb,O=X".to_string()]
    );
}

// Scenario 6: AND short-circuits on the unique GUID leaf; the re-match
// still applies the rest of the filter.
#[test]
fn and_with_unique_guid_leaf_short_circuits() {
    let schema = DirSchema::new().with_attribute("objectGUID", 0, Syntax::Binary);
    let (_kv, mut db) = open(schema, Config::default());
    configure(&mut db, &indexlist(&["cn"], Some("objectGUID"), false));

    let rec = Record::new("CN=Alice,O=X")
        .with_element(Element::single("objectGUID", guid(9)))
        .with_element(Element::single("cn", "Alice"));
    add_entry(&mut db, &rec);

    let tree = Filter::and(vec![
        Filter::eq("objectGUID", guid(9)),
        Filter::eq("cn", "Alice"),
    ]);
    assert_eq!(
        search_dns(&mut db, "", Scope::Subtree, &tree),
        vec!["CN=Alice,O=X".to_string()]
    );

    // The candidate comes back from the GUID leaf alone, then the
    // re-match throws it out on the disagreeing cn.
    let tree = Filter::and(vec![
        Filter::eq("objectGUID", guid(9)),
        Filter::eq("cn", "bogus"),
    ]);
    assert!(search_dns(&mut db, "", Scope::Subtree, &tree).is_empty());

    // A GUID no record carries: the candidate key points at nothing.
    let tree = Filter::and(vec![
        Filter::eq("objectGUID", guid(77)),
        Filter::eq("cn", "Alice"),
    ]);
    assert!(search_dns(&mut db, "", Scope::Subtree, &tree).is_empty());
}

// Scenario 7: cancelling a transaction leaves no trace.
#[test]
fn transaction_cancel_restores_everything() {
    let (kv, mut db) = open(DirSchema::new(), Config::default());
    configure(&mut db, &indexlist(&["cn"], None, false));

    let before = kv.dump();

    db.transaction_start().unwrap();
    let rec = Record::new("CN=Ghost,O=X").with_element(Element::single("cn", "Ghost"));
    add_entry(&mut db, &rec);

    // Read-your-writes inside the transaction.
    let found = search_dns(&mut db, "", Scope::Subtree, &Filter::eq("cn", "Ghost"));
    assert_eq!(found, vec!["CN=Ghost,O=X".to_string()]);

    db.transaction_cancel().unwrap();

    assert_eq!(kv.dump(), before);
    let found = search_dns(&mut db, "", Scope::Subtree, &Filter::eq("cn", "Ghost"));
    assert!(found.is_empty());
}

// Scenario 8: reindex re-keys entries across a DN-mode to GUID-mode
// switch and rewrites the scope indices in the new format.
#[test]
fn reindex_across_mode_change() {
    let schema = DirSchema::new().with_attribute("objectGUID", 0, Syntax::Binary);
    let (kv, mut db) = open(schema, Config::default());
    configure(&mut db, &indexlist(&["cn"], None, true));

    for (dn, cn, g) in [("CN=a,O=P", "a", 1u8), ("CN=b,O=P", "b", 2u8)] {
        let rec = Record::new(dn)
            .with_element(Element::single("cn", cn))
            .with_element(Element::single("objectGUID", guid(g)));
        add_entry(&mut db, &rec);
    }
    assert!(kv.fetch(b"DN=CN=A,O=P").unwrap().is_some());

    // Switch the control record to GUID keying, then rebuild.
    db.put_record(&indexlist(&["cn"], Some("objectGUID"), true))
        .unwrap();
    db.transaction_start().unwrap();
    db.reindex().unwrap();
    db.transaction_commit().unwrap();

    // Entries moved to GUID keys.
    assert!(kv.fetch(b"DN=CN=A,O=P").unwrap().is_none());
    let mut guid_key = b"GUID=".to_vec();
    guid_key.extend_from_slice(&[1u8; 16]);
    assert!(kv.fetch(&guid_key).unwrap().is_some());

    // The DN index appeared, in GUID format.
    let idxdn = db
        .fetch_record_by_key(b"DN=@INDEX:@IDXDN:CN=A,O=P")
        .unwrap()
        .expect("@IDXDN record");
    assert_eq!(
        idxdn.first_value(dirdb_core::IDXVERSION).unwrap().as_ref(),
        b"3"
    );
    let payload = idxdn.first_value(dirdb_core::IDX).unwrap();
    assert_eq!(payload.as_ref(), &[1u8; 16]);

    // The one-level index holds both children as packed GUIDs.
    let one = db
        .fetch_record_by_key(b"DN=@INDEX:@IDXONE:O=P")
        .unwrap()
        .expect("@IDXONE record");
    assert_eq!(one.first_value(dirdb_core::IDX).unwrap().len(), 32);

    // And searches still work in the new mode.
    let found = search_dns(&mut db, "O=P", Scope::OneLevel, &Filter::eq("cn", "b"));
    assert_eq!(found, vec!["CN=b,O=P".to_string()]);
}
