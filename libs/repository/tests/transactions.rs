//! Integration tests for snapshots, sub-transactions and index maintenance.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use rstest::rstest;
use sched_id::EntityId;
use sched_repository::{
    key, Action, Database, IndexDef, LoadedRow, Privilege, Record, RepoError, RepoResult,
    RowMeta, Table, Transaction, TxContext, TxMode, VersionNumber,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Widget {
    name: String,
    group: i64,
}

const BY_NAME: IndexDef<Widget> = IndexDef::unique("widget_by_name", |w| key![w.name.as_str()]);
const BY_GROUP: IndexDef<Widget> = IndexDef::ordinary("widget_by_group", |w| key![w.group]);
const BY_GROUP_NAME: IndexDef<Widget> =
    IndexDef::ordinary("widget_by_group_name", |w| key![w.group, w.name.as_str()]);

impl Record for Widget {
    const TABLE: &'static str = "widget";
    const INDEXES: &'static [IndexDef<Self>] = &[BY_NAME, BY_GROUP, BY_GROUP_NAME];

    fn validate(&self) -> RepoResult<()> {
        if self.name.is_empty() {
            return Err(RepoError::Invalid {
                table: Self::TABLE,
                reason: "widget without a name".into(),
            });
        }
        Ok(())
    }
}

fn widget(name: &str, group: i64) -> Widget {
    Widget {
        name: name.to_string(),
        group,
    }
}

fn setup() -> (Database, Table<Widget>) {
    let db = Database::new();
    let widgets = db.table::<Widget>().unwrap();
    (db, widgets)
}

fn names(rows: &[sched_repository::Row<Widget>]) -> Vec<String> {
    rows.iter().map(|r| r.name.clone()).collect()
}

#[test]
fn test_commit_is_invisible_to_older_snapshots() {
    let (db, widgets) = setup();
    let before = db.begin(TxContext::system(), TxMode::ReadOnly);

    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let row = widgets.create(&mut tx, widget("a", 1)).unwrap();
    assert_eq!(widgets.get(&tx, row.id).unwrap().name, "a");
    assert!(widgets.try_get(&before, row.id).is_none());
    let version = tx.commit().unwrap();
    assert_eq!(version, VersionNumber::new(1));

    assert!(widgets.try_get(&before, row.id).is_none());
    let after = db.begin(TxContext::system(), TxMode::ReadOnly);
    assert_eq!(widgets.get(&after, row.id).unwrap().data, widget("a", 1));
}

#[test]
fn test_rollback_sub_discards_rows_and_index_entries() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let kept = widgets.create(&mut tx, widget("kept", 7)).unwrap();

    tx.begin_sub();
    let dropped = widgets.create(&mut tx, widget("dropped", 7)).unwrap();
    widgets
        .modify(&mut tx, kept.id, |w| w.group = 8)
        .unwrap();
    assert_eq!(names(&widgets.get_vector(&tx, &BY_GROUP, &key![7i64]).unwrap()), ["dropped"]);
    tx.rollback_sub().unwrap();

    assert!(widgets.try_get(&tx, dropped.id).is_none());
    assert_eq!(names(&widgets.get_vector(&tx, &BY_GROUP, &key![7i64]).unwrap()), ["kept"]);
    assert!(widgets.get_vector(&tx, &BY_GROUP, &key![8i64]).unwrap().is_empty());
    assert!(widgets.get_unique(&tx, &BY_NAME, &key!["dropped"]).unwrap_err().is_not_found());
    tx.commit().unwrap();
}

#[test]
fn test_commit_sub_merges_into_parent() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    tx.begin_sub();
    tx.begin_sub();
    let row = widgets.create(&mut tx, widget("deep", 1)).unwrap();
    tx.commit_sub().unwrap();
    tx.commit_sub().unwrap();
    assert_eq!(tx.depth(), 0);
    tx.commit().unwrap();

    let reader = db.begin(TxContext::system(), TxMode::ReadOnly);
    assert_eq!(widgets.get_unique(&reader, &BY_NAME, &key!["deep"]).unwrap().id, row.id);
}

#[test]
fn test_dropped_transaction_rolls_back() {
    let (db, widgets) = setup();
    {
        let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
        widgets.create(&mut tx, widget("lost", 1)).unwrap();
    }
    let reader = db.begin(TxContext::system(), TxMode::ReadOnly);
    assert!(widgets.scan(&reader).is_empty());
    assert_eq!(db.last_committed(), VersionNumber::ZERO);
}

#[test]
fn test_duplicate_unique_key_leaves_nothing_staged() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    widgets.create(&mut tx, widget("dup", 1)).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let err = widgets.create(&mut tx, widget("dup", 2)).unwrap_err();
    assert!(err.is_duplicate_key());
    assert_eq!(tx.depth(), 0);
    assert_eq!(tx.change_count(), 0);
    assert!(widgets.get_vector(&tx, &BY_GROUP, &key![2i64]).unwrap().is_empty());
}

#[test]
fn test_unique_key_can_move_within_one_transaction() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let first = widgets.create(&mut tx, widget("x", 1)).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    widgets.modify(&mut tx, first.id, |w| w.name = "y".into()).unwrap();
    let second = widgets.create(&mut tx, widget("x", 1)).unwrap();
    tx.commit().unwrap();

    let reader = db.begin(TxContext::system(), TxMode::ReadOnly);
    assert_eq!(widgets.get_unique(&reader, &BY_NAME, &key!["x"]).unwrap().id, second.id);
    assert_eq!(widgets.get_unique(&reader, &BY_NAME, &key!["y"]).unwrap().id, first.id);
    assert_eq!(
        widgets
            .get_unique_at(&reader, &BY_NAME, &key!["x"], VersionNumber::new(1))
            .unwrap()
            .id,
        first.id
    );
}

#[rstest]
#[case::create(Privilege::Create)]
#[case::edit(Privilege::Edit)]
#[case::drop(Privilege::Drop)]
fn test_refused_privilege_is_access_violation(#[case] refused: Privilege) {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let existing = widgets.create(&mut tx, widget("guarded", 1)).unwrap();
    tx.commit().unwrap();

    let checker = move |_: EntityId, action: &Action| action.privilege != refused;
    let mut tx = db.begin(TxContext::new(EntityId::new(99), Arc::new(checker)), TxMode::ReadWrite);
    let result = match refused {
        Privilege::Create => widgets.create(&mut tx, widget("new", 1)).map(|_| ()),
        Privilege::Edit => widgets.modify(&mut tx, existing.id, |w| w.group = 2).map(|_| ()),
        Privilege::Drop => widgets.delete(&mut tx, existing.id),
    };

    match result.unwrap_err() {
        RepoError::AccessViolation {
            principal,
            privilege,
            table,
            ..
        } => {
            assert_eq!(principal, EntityId::new(99));
            assert_eq!(privilege, refused);
            assert_eq!(table, "widget");
        }
        other => panic!("expected access violation, got {other:?}"),
    }
    assert_eq!(tx.change_count(), 0);
    assert_eq!(widgets.get(&tx, existing.id).unwrap().data, widget("guarded", 1));
}

#[test]
fn test_write_in_read_only_transaction_is_fatal() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadOnly);
    assert!(widgets.create(&mut tx, widget("nope", 1)).unwrap_err().is_fatal());
}

#[test]
fn test_validation_failure_is_reported() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let err = widgets.create(&mut tx, widget("", 1)).unwrap_err();
    assert!(matches!(err, RepoError::Invalid { table: "widget", .. }));
    assert_eq!(tx.change_count(), 0);
}

#[test]
fn test_commit_with_open_sub_is_fatal_and_publishes_nothing() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    tx.begin_sub();
    widgets.create(&mut tx, widget("half", 1)).unwrap();
    assert!(tx.commit().unwrap_err().is_fatal());
    assert_eq!(db.last_committed(), VersionNumber::ZERO);
}

#[test]
fn test_commit_sub_without_sub_is_fatal() {
    let (db, _widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    assert!(tx.commit_sub().unwrap_err().is_fatal());
}

#[test]
fn test_rollback_sub_without_sub_is_fatal() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let row = widgets.create(&mut tx, widget("outer", 1)).unwrap();
    assert!(tx.rollback_sub().unwrap_err().is_fatal());
    assert_eq!(tx.depth(), 0);
    assert_eq!(widgets.get(&tx, row.id).unwrap().name, "outer");
}

#[test]
fn test_registering_table_twice_is_fatal() {
    let (db, _widgets) = setup();
    assert!(db.table::<Widget>().unwrap_err().is_fatal());
}

#[test]
fn test_history_is_partitioned_across_updates_and_delete() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let row = widgets.create(&mut tx, widget("h", 1)).unwrap();
    tx.commit().unwrap();
    for group in 2..5 {
        let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
        widgets.modify(&mut tx, row.id, |w| w.group = group).unwrap();
        tx.commit().unwrap();
    }
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    widgets.delete(&mut tx, row.id).unwrap();
    let deleted_at = tx.commit().unwrap();

    let chain = widgets.history(row.id).unwrap();
    assert!(chain.is_partitioned());
    assert_eq!(chain.versions().len(), 4);
    assert!(chain.current().is_none());

    let reader = db.begin(TxContext::system(), TxMode::ReadOnly);
    assert!(widgets.try_get(&reader, row.id).is_none());
    assert_eq!(widgets.get_at(&reader, row.id, VersionNumber::new(2)).unwrap().group, 2);
    assert!(widgets.get_at(&reader, row.id, deleted_at).unwrap_err().is_not_found());
}

#[test]
fn test_unchanged_index_key_keeps_its_entry() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let a = widgets.create(&mut tx, widget("a", 1)).unwrap();
    let b = widgets.create(&mut tx, widget("b", 1)).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    widgets.modify(&mut tx, a.id, |w| w.name = "a2".into()).unwrap();
    tx.commit().unwrap();

    let reader = db.begin(TxContext::system(), TxMode::ReadOnly);
    let ids: Vec<_> = widgets
        .get_vector(&reader, &BY_GROUP, &key![1i64])
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![a.id, b.id]);
}

#[test]
fn test_prefix_scan_orders_by_key() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    widgets.create(&mut tx, widget("c", 1)).unwrap();
    widgets.create(&mut tx, widget("a", 1)).unwrap();
    widgets.create(&mut tx, widget("z", 2)).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    widgets.create(&mut tx, widget("b", 1)).unwrap();
    let rows = widgets.scan_prefix(&tx, &BY_GROUP_NAME, &key![1i64]).unwrap();
    assert_eq!(names(&rows), ["a", "b", "c"]);
}

#[test]
fn test_filtered_scan_propagates_filter_error() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    widgets.create(&mut tx, widget("a", 1)).unwrap();
    widgets.create(&mut tx, widget("b", 1)).unwrap();

    let kept = widgets
        .get_vector_filtered(&tx, &BY_GROUP, &key![1i64], |r| {
            Ok::<_, RepoError>(r.name != "a")
        })
        .unwrap();
    assert_eq!(names(&kept), ["b"]);

    let err = widgets
        .get_vector_filtered(&tx, &BY_GROUP, &key![1i64], |r| {
            Err::<bool, _>(RepoError::Fatal(format!("bad row {}", r.name)))
        })
        .unwrap_err();
    assert_eq!(err, RepoError::Fatal("bad row a".into()));
}

#[test]
fn test_compaction_respects_open_snapshots() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let row = widgets.create(&mut tx, widget("c", 1)).unwrap();
    tx.commit().unwrap();

    let old_reader = db.begin(TxContext::system(), TxMode::ReadOnly);
    for group in 2..4 {
        let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
        widgets.modify(&mut tx, row.id, |w| w.group = group).unwrap();
        tx.commit().unwrap();
    }
    assert_eq!(db.lowest_active_version(), VersionNumber::new(1));

    let stats = widgets.compact();
    assert_eq!(stats.versions_pruned, 0);
    assert_eq!(widgets.get(&old_reader, row.id).unwrap().group, 1);
    drop(old_reader);

    let stats = db.compact_history();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].versions_pruned, 2);
    assert_eq!(stats[0].index_entries_pruned, 4);
    assert_eq!(widgets.history(row.id).unwrap().versions().len(), 1);

    let reader = db.begin(TxContext::system(), TxMode::ReadOnly);
    assert_eq!(widgets.get(&reader, row.id).unwrap().group, 3);
    assert!(widgets.get_vector(&reader, &BY_GROUP, &key![1i64]).unwrap().is_empty());
}

#[test]
fn test_readers_keep_live_rows_while_compaction_runs() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let row = widgets.create(&mut tx, widget("busy", 0)).unwrap();
    tx.commit().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let writer = thread::spawn({
        let (db, widgets, stop) = (db.clone(), widgets.clone(), stop.clone());
        move || {
            let mut group = 0;
            while !stop.load(Ordering::Relaxed) {
                group += 1;
                let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
                widgets.modify(&mut tx, row.id, |w| w.group = group).unwrap();
                tx.commit().unwrap();
            }
        }
    });
    let compactor = thread::spawn({
        let (db, stop) = (db.clone(), stop.clone());
        move || {
            while !stop.load(Ordering::Relaxed) {
                db.compact_history();
            }
        }
    });

    for _ in 0..2_000 {
        let reader = db.begin(TxContext::system(), TxMode::ReadOnly);
        assert!(widgets.try_get(&reader, row.id).is_some());
    }
    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
    compactor.join().unwrap();
}

fn loaded(id: u64, name: &str, valid_to: Option<u64>) -> LoadedRow<Widget> {
    let now = chrono::Utc::now();
    LoadedRow {
        id: EntityId::new(id),
        meta: RowMeta {
            creator: EntityId::new(0),
            created_at: now,
            changer: EntityId::new(0),
            changed_at: now,
        },
        data: widget(name, 1),
        valid_to: valid_to.map(VersionNumber::new),
    }
}

#[test]
fn test_load_skips_deleted_rows_and_advances_ids() {
    let (db, widgets) = setup();
    let stats = widgets
        .load(vec![loaded(40, "a", None), loaded(41, "b", Some(0)), loaded(7, "c", None)])
        .unwrap();
    assert_eq!((stats.read, stats.loaded), (3, 2));

    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    assert_eq!(widgets.get(&tx, EntityId::new(40)).unwrap().name, "a");
    assert!(widgets.try_get(&tx, EntityId::new(41)).is_none());
    let fresh = widgets.create(&mut tx, widget("d", 1)).unwrap();
    assert_eq!(fresh.id, EntityId::new(41));
}

#[test]
fn test_load_rejects_duplicate_ids_and_keys() {
    let (_db, widgets) = setup();
    assert!(widgets
        .load(vec![loaded(1, "a", None), loaded(1, "b", None)])
        .unwrap_err()
        .is_fatal());

    let (_db, widgets) = setup();
    assert!(widgets
        .load(vec![loaded(1, "a", None), loaded(2, "a", None)])
        .unwrap_err()
        .is_duplicate_key());
}

#[test]
fn test_load_rejects_id_at_end_of_sequence() {
    let (db, widgets) = setup();
    assert!(widgets
        .load(vec![loaded(u64::MAX, "last", None)])
        .unwrap_err()
        .is_fatal());
    let reader = db.begin(TxContext::system(), TxMode::ReadOnly);
    assert!(widgets.try_get(&reader, EntityId::new(u64::MAX)).is_none());
}

#[test]
fn test_sub_closure_rolls_back_on_error() {
    let (db, widgets) = setup();
    let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
    let result: RepoResult<()> = tx.sub(|tx| {
        widgets.create(tx, widget("inner", 1))?;
        Err(RepoError::Fatal("abort".into()))
    });
    assert!(result.is_err());
    assert_eq!(tx.depth(), 0);
    assert!(widgets.scan(&tx).is_empty());
}

#[derive(Debug, Clone)]
enum Op {
    Create(i64),
    Update(usize, i64),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3i64).prop_map(Op::Create),
        (any::<usize>(), 0..3i64).prop_map(|(i, g)| Op::Update(i, g)),
        any::<usize>().prop_map(Op::Delete),
    ]
}

fn pick(model: &BTreeMap<EntityId, Widget>, index: usize) -> Option<EntityId> {
    if model.is_empty() {
        return None;
    }
    model.keys().nth(index % model.len()).copied()
}

/// Checks every lookup path of `widgets` under `tx` against `model`.
fn check_lookups(
    widgets: &Table<Widget>,
    tx: &Transaction,
    model: &BTreeMap<EntityId, Widget>,
    names_seen: &BTreeMap<String, EntityId>,
) -> Result<(), TestCaseError> {
    let rows: BTreeMap<_, _> = widgets
        .scan(tx)
        .into_iter()
        .map(|r| (r.id, r.data))
        .collect();
    prop_assert_eq!(&rows, model);

    for (name, id) in names_seen {
        match widgets.get_unique(tx, &BY_NAME, &key![name.as_str()]) {
            Ok(row) => {
                prop_assert_eq!(row.id, *id);
                prop_assert!(model.contains_key(id));
            }
            Err(e) => {
                prop_assert!(e.is_not_found());
                prop_assert!(!model.contains_key(id));
            }
        }
    }

    for group in 0..3i64 {
        let indexed: BTreeSet<_> = widgets
            .get_vector(tx, &BY_GROUP, &key![group])
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        let mut expected: Vec<_> = model
            .iter()
            .filter(|(_, w)| w.group == group)
            .map(|(id, w)| (w.name.clone(), *id))
            .collect();
        prop_assert_eq!(indexed, expected.iter().map(|(_, id)| *id).collect::<BTreeSet<_>>());

        expected.sort();
        let prefixed: Vec<_> = widgets
            .scan_prefix(tx, &BY_GROUP_NAME, &key![group])
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        prop_assert_eq!(prefixed, expected.into_iter().map(|(_, id)| id).collect::<Vec<_>>());
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_rolled_back_subs_leave_no_trace(
        batches in prop::collection::vec(
            (prop::collection::vec(op_strategy(), 1..6), any::<bool>()),
            1..10,
        )
    ) {
        let (db, widgets) = setup();
        let mut model: BTreeMap<EntityId, Widget> = BTreeMap::new();
        let mut names_seen: BTreeMap<String, EntityId> = BTreeMap::new();
        let mut counter = 0;

        for (ops, keep) in batches {
            let mut tx = db.begin(TxContext::system(), TxMode::ReadWrite);
            tx.begin_sub();
            let mut staged = model.clone();
            for op in ops {
                match op {
                    Op::Create(group) => {
                        counter += 1;
                        let w = widget(&format!("w{counter}"), group);
                        let row = widgets.create(&mut tx, w.clone()).unwrap();
                        names_seen.insert(w.name.clone(), row.id);
                        staged.insert(row.id, w);
                    }
                    Op::Update(index, group) => {
                        if let Some(id) = pick(&staged, index) {
                            let row = widgets.modify(&mut tx, id, |w| w.group = group).unwrap();
                            staged.insert(id, row.data);
                        }
                    }
                    Op::Delete(index) => {
                        if let Some(id) = pick(&staged, index) {
                            widgets.delete(&mut tx, id).unwrap();
                            staged.remove(&id);
                        }
                    }
                }
            }
            if keep {
                tx.commit_sub().unwrap();
                model = staged;
            } else {
                tx.rollback_sub().unwrap();
            }
            check_lookups(&widgets, &tx, &model, &names_seen)?;
            tx.commit().unwrap();

            let reader = db.begin(TxContext::system(), TxMode::ReadOnly);
            check_lookups(&widgets, &reader, &model, &names_seen)?;
            for id in names_seen.values() {
                if let Some(chain) = widgets.history(*id) {
                    prop_assert!(chain.is_partitioned());
                }
            }
        }
    }
}
