//! End-to-end graph copies between memory-store transactions and into
//! detached views.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use odb::{
    CascadePlan, Construction, CopyState, Cx, ElementKind, FieldDef, FieldId, FieldKind,
    FieldPath, MemoryStore, MemoryTransaction, ObjId, ObjIdMap, ObjType, ObjectTransaction,
    OdbError, Proxy, ProxyFactory, ReferenceOptions, Result, Schema, Transaction, TypeId, Value,
};
use proptest::prelude::*;

// ─── Helpers ─────────────────────────────────────────────────────────────

const FOLDER: u32 = 1;
const DOC: u32 = 2;

// Folder fields
const TITLE: u32 = 1;
const PARENT: u32 = 2;
const CHILDREN: u32 = 3;

// Doc fields
const BODY: u32 = 1;
const OWNER: u32 = 2;
const SEE_ALSO: u32 = 3;

fn tid(n: u32) -> TypeId {
    TypeId::new(n).unwrap()
}

fn fid(n: u32) -> FieldId {
    FieldId::new(n).unwrap()
}

fn folder(n: u32) -> ObjId {
    ObjId::new(tid(FOLDER), n)
}

fn doc(n: u32) -> ObjId {
    ObjId::new(tid(DOC), n)
}

fn schema() -> Schema {
    Schema::new()
        .with_type(
            ObjType::new(tid(FOLDER), "Folder")
                .with_field(FieldDef::simple(fid(TITLE), "title"))
                .with_field(FieldDef::reference(
                    fid(PARENT),
                    "parent",
                    ReferenceOptions::STRICT,
                ))
                .with_field(FieldDef::new(
                    fid(CHILDREN),
                    "children",
                    FieldKind::List(ElementKind::Reference(ReferenceOptions::STRICT)),
                )),
        )
        .with_type(
            ObjType::new(tid(DOC), "Doc")
                .with_field(FieldDef::simple(fid(BODY), "body"))
                .with_field(FieldDef::reference(
                    fid(OWNER),
                    "owner",
                    ReferenceOptions::STRICT,
                ))
                .with_field(FieldDef::reference(
                    fid(SEE_ALSO),
                    "see_also",
                    ReferenceOptions::ALLOW_DELETED,
                )),
        )
}

struct Node {
    id: ObjId,
    txn: Arc<dyn Transaction>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Proxy for Node {
    fn id(&self) -> ObjId {
        self.id
    }
}

impl Node {
    fn text(&self, field: u32) -> String {
        self.txn
            .read_scalar(self.id, fid(field))
            .unwrap()
            .as_text()
            .unwrap_or_default()
            .to_owned()
    }
}

fn node_factory() -> impl ProxyFactory<Node> {
    |ctx: &Construction<'_, Node>| -> Result<Arc<Node>> {
        Ok(Arc::new(Node {
            id: ctx.id(),
            txn: Arc::clone(ctx.transaction()),
        }))
    }
}

/// A root folder holding two docs, each owned by the folder.
///
/// ```text
/// folder(1) "root" --children--> [doc(1), doc(2)]
/// doc(i) --owner--> folder(1)
/// doc(1) --see_also--> doc(99)   (never existed)
/// ```
fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new(schema());
    let txn = store.begin();
    txn.create(folder(1), false).unwrap();
    txn.write_field(folder(1), fid(TITLE), Value::from("root"), false)
        .unwrap();
    txn.write_field(
        folder(1),
        fid(CHILDREN),
        Value::List(vec![Value::Ref(doc(1)), Value::Ref(doc(2))]),
        false,
    )
    .unwrap();
    for i in 1..=2 {
        txn.create(doc(i), false).unwrap();
        txn.write_field(doc(i), fid(BODY), Value::from(format!("body {i}")), false)
            .unwrap();
        txn.write_reference(doc(i), fid(OWNER), Some(folder(1)), false)
            .unwrap();
    }
    txn.write_reference(doc(1), fid(SEE_ALSO), Some(doc(99)), false)
        .unwrap();
    txn.commit().unwrap();
    store
}

fn open(txn: Arc<dyn Transaction>) -> ObjectTransaction<Node> {
    ObjectTransaction::new(txn, node_factory())
}

// ─── Tests ───────────────────────────────────────────────────────────────

#[test]
fn copy_to_moves_full_cascade_between_stores() {
    let source = open(Arc::new(seeded_store().begin()));
    let dest_store = MemoryStore::new(schema());
    let dest_txn = Arc::new(dest_store.begin());
    let dest = open(dest_txn.clone());
    let plan = CascadePlan::full(&schema());
    let mut state = CopyState::new();

    let root = source
        .copy_to(&Cx::new(), &dest, folder(1), &plan, &mut state)
        .unwrap();
    assert_eq!(root.id(), folder(1));
    assert_eq!(root.text(TITLE), "root");
    assert!(Arc::ptr_eq(&root, &dest.get(&Cx::new(), folder(1)).unwrap()));

    dest_txn.commit().unwrap();
    assert_eq!(dest_store.len(), 3);
    assert!(dest_store.contains(doc(2)));
    assert!(!dest_store.contains(doc(99)));
}

#[test]
fn copy_to_reports_uncascaded_reference() {
    let source = open(Arc::new(seeded_store().begin()));
    let dest = open(Arc::new(MemoryStore::new(schema()).begin()));
    let mut state = CopyState::new();

    let err = source
        .copy_to(&Cx::new(), &dest, doc(2), &CascadePlan::new(), &mut state)
        .unwrap_err();
    assert_eq!(
        err,
        OdbError::DanglingReference {
            referrer: doc(2).get(),
            field: OWNER,
            target: folder(1).get(),
            unresolved: 1,
        }
    );
    // The object itself was written before the failure surfaced.
    assert!(dest.transaction().exists(doc(2)).unwrap());
    assert!(state.deleted_assignments().is_empty());
}

#[test]
fn explicit_path_copies_owner_with_doc() {
    let source = open(Arc::new(seeded_store().begin()));
    let dest = open(Arc::new(MemoryStore::new(schema()).begin()));
    // doc.owner, then the owner's children.
    let plan = CascadePlan::new().with_path(
        tid(DOC),
        FieldPath::new([fid(OWNER), fid(CHILDREN)]).unwrap(),
    );
    let mut state = CopyState::new();

    let copied = source
        .copy_to(&Cx::new(), &dest, doc(2), &plan, &mut state)
        .unwrap();
    assert_eq!(copied.text(BODY), "body 2");
    let ids: BTreeSet<ObjId> = dest
        .transaction()
        .object_ids(None)
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(ids, BTreeSet::from([folder(1), doc(1), doc(2)]));
}

#[test]
fn allow_deleted_reference_survives_copy() {
    let source = open(Arc::new(seeded_store().begin()));
    let dest = open(Arc::new(MemoryStore::new(schema()).begin()));
    let plan = CascadePlan::new().with_path(tid(DOC), FieldPath::single(fid(OWNER)));
    let mut state = CopyState::new();

    source
        .copy_all_to(&Cx::new(), &dest, [doc(1), doc(2)], &plan, &mut state)
        .unwrap();
    assert_eq!(
        dest.transaction()
            .read_reference(doc(1), fid(SEE_ALSO))
            .unwrap(),
        Some(doc(99))
    );
}

#[test]
fn copy_out_builds_detached_view() {
    let source = open(Arc::new(seeded_store().begin()));
    let plan = CascadePlan::full(&schema());
    let mut state = CopyState::new().with_suppressed_notifications(true);

    let (detached, root) = source
        .copy_out(&Cx::new(), folder(1), &plan, &mut state)
        .unwrap();
    assert!(detached.transaction().is_detached());
    assert_eq!(root.text(TITLE), "root");
    assert_eq!(detached.transaction().object_ids(None).unwrap().len(), 3);
    assert_eq!(
        detached
            .transaction()
            .read_collection(folder(1), fid(CHILDREN))
            .unwrap(),
        Value::List(vec![Value::Ref(doc(1)), Value::Ref(doc(2))])
    );
}

#[test]
fn remapped_copy_within_one_transaction_duplicates_subtree() {
    let txn: Arc<dyn Transaction> = Arc::new(seeded_store().begin());
    let otx = open(Arc::clone(&txn));
    let remap = ObjIdMap::from_pairs([
        (folder(1), folder(10)),
        (doc(1), doc(10)),
        (doc(2), doc(20)),
    ])
    .unwrap();
    let mut state = CopyState::new().with_remap(remap);

    let clone = otx
        .copy_to(&Cx::new(), &otx, folder(1), &CascadePlan::full(&schema()), &mut state)
        .unwrap();
    assert_eq!(clone.id(), folder(10));
    assert_eq!(
        txn.read_collection(folder(10), fid(CHILDREN)).unwrap(),
        Value::List(vec![Value::Ref(doc(10)), Value::Ref(doc(20))])
    );
    assert_eq!(
        txn.read_reference(doc(20), fid(OWNER)).unwrap(),
        Some(folder(10))
    );
    // Originals untouched.
    assert_eq!(
        txn.read_reference(doc(2), fid(OWNER)).unwrap(),
        Some(folder(1))
    );
}

#[test]
fn suppressed_copy_fires_no_listeners() {
    let source = open(Arc::new(seeded_store().begin()));
    let dest_txn = Arc::new(MemoryStore::new(schema()).begin());
    let events = Arc::new(Mutex::new(0_usize));
    {
        let events = Arc::clone(&events);
        dest_txn.add_create_listener(Arc::new(move |_id: ObjId| {
            *events.lock().unwrap() += 1;
        }));
    }
    let dest = open(dest_txn.clone());
    let plan = CascadePlan::full(&schema());

    let mut quiet = CopyState::new().with_suppressed_notifications(true);
    source
        .copy_to(&Cx::new(), &dest, folder(1), &plan, &mut quiet)
        .unwrap();
    assert_eq!(*events.lock().unwrap(), 0);

    let loud_dest_txn = Arc::new(MemoryStore::new(schema()).begin());
    let counted = Arc::clone(&events);
    loud_dest_txn.add_create_listener(Arc::new(move |_id: ObjId| {
        *counted.lock().unwrap() += 1;
    }));
    let loud_dest = open(loud_dest_txn);
    let mut loud = CopyState::new();
    source
        .copy_to(&Cx::new(), &loud_dest, folder(1), &plan, &mut loud)
        .unwrap();
    assert_eq!(*events.lock().unwrap(), 3);
}

#[test]
fn state_reuse_across_sequential_copies_skips_done_work() {
    let source = open(Arc::new(seeded_store().begin()));
    let dest = open(Arc::new(MemoryStore::new(schema()).begin()));
    let plan = CascadePlan::full(&schema());
    let mut state = CopyState::new();

    source
        .copy_to(&Cx::new(), &dest, doc(1), &plan, &mut state)
        .unwrap();
    let copied_after_first = state.history().copied_len();
    assert_eq!(copied_after_first, 3);

    // Everything reachable from the folder is already copied.
    let again = source
        .copy_to(&Cx::new(), &dest, folder(1), &plan, &mut state)
        .unwrap();
    assert_eq!(again.id(), folder(1));
    assert_eq!(state.history().copied_len(), copied_after_first);
}

#[test]
fn read_only_destination_rejects_copy() {
    let store = seeded_store();
    let source = open(Arc::new(store.begin()));
    let dest = open(Arc::new(MemoryStore::new(schema()).begin_read_only()));
    let mut state = CopyState::new();
    assert_eq!(
        source
            .copy_to(&Cx::new(), &dest, folder(1), &CascadePlan::new(), &mut state)
            .unwrap_err(),
        OdbError::ReadOnly
    );
}

// ─── Property: full-cascade copy reproduces the reachable graph ──────────

/// Parent link (if any) of folders `1..=n`, possibly cyclic.
fn graph_strategy() -> impl Strategy<Value = Vec<Option<u32>>> {
    (2_u32..12).prop_flat_map(|n| prop::collection::vec(prop::option::of(1..=n), n as usize))
}

/// Folder numbers reached from `root` by following parent links.
fn reachable(root: u32, links: &[Option<u32>]) -> BTreeSet<u32> {
    let mut seen = BTreeSet::new();
    let mut at = Some(root);
    while let Some(n) = at {
        if !seen.insert(n) {
            break;
        }
        at = links[usize::try_from(n).unwrap() - 1];
    }
    seen
}

proptest! {
    #[test]
    fn prop_full_copy_matches_reachable_set(links in graph_strategy()) {
        let store = MemoryStore::new(schema());
        let source_txn = store.begin();
        let ids: Vec<ObjId> = (1..=links.len())
            .map(|i| folder(u32::try_from(i).unwrap()))
            .collect();
        for id in &ids {
            source_txn.create(*id, false).unwrap();
        }
        for (from, parent) in ids.iter().copied().zip(&links) {
            source_txn
                .write_reference(from, fid(PARENT), parent.map(folder), false)
                .unwrap();
        }
        let source = open(Arc::new(source_txn));
        let dest_txn = Arc::new(MemoryTransaction::detached(Arc::new(schema())));
        let dest = open(dest_txn.clone());
        let mut state = CopyState::new();

        source
            .copy_to(&Cx::new(), &dest, folder(1), &CascadePlan::full(&schema()), &mut state)
            .unwrap();

        let expected: Vec<ObjId> = reachable(1, &links).into_iter().map(folder).collect();
        prop_assert_eq!(dest_txn.object_ids(None).unwrap(), expected.clone());
        for id in expected {
            prop_assert_eq!(
                dest_txn.read_reference(id, fid(PARENT)).unwrap(),
                source.transaction().read_reference(id, fid(PARENT)).unwrap()
            );
        }
    }
}
