//! Integration tests for snapshots, the WAL, and restart recovery.

use arachne_common::types::Value;
use arachne_core::store::VertexFilter;
use arachne_engine::durability::snapshot::list_snapshots;
use arachne_engine::{Config, Database};

fn durable_config(dir: &std::path::Path) -> Config {
    // No background threads in tests; snapshots are triggered manually.
    Config::durable(dir)
        .with_gc_cycle_sec(-1)
        .with_query_execution_time_sec(-1)
}

#[test]
fn restart_restores_committed_state() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = Database::new(durable_config(dir.path())).unwrap();
        let dba = db.access().unwrap();
        let alice = dba.create_vertex().unwrap();
        alice.add_label("Person").unwrap();
        alice.set_property("name", Value::from("Alice")).unwrap();
        let bob = dba.create_vertex().unwrap();
        bob.add_label("Person").unwrap();
        bob.set_property("name", Value::from("Bob")).unwrap();
        let edge = dba.create_edge(&alice, &bob, "KNOWS").unwrap();
        edge.set_property("since", Value::from(2019i64)).unwrap();
        dba.commit().unwrap();

        // A second transaction that aborts must leave no trace.
        let doomed = db.access().unwrap();
        let ghost = doomed.create_vertex().unwrap();
        ghost.add_label("Ghost").unwrap();
        doomed.abort().unwrap();

        db.close();
    }

    let db = Database::new(durable_config(dir.path())).unwrap();
    let dba = db.access().unwrap();
    assert_eq!(dba.vertex_count(), 2);
    assert_eq!(dba.edge_count(), 1);

    let person = db.store().catalogs().label_id("Person").unwrap();
    let people = dba.vertices(&VertexFilter::Label(person)).unwrap();
    assert_eq!(people.len(), 2);
    assert_eq!(people[0].property("name").unwrap(), Value::from("Alice"));

    let out = people[0].out_edges().unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].edge_type_name().unwrap(), "KNOWS");
    assert_eq!(out[0].property("since").unwrap(), Value::from(2019i64));
    assert_eq!(out[0].to().unwrap().property("name").unwrap(), Value::from("Bob"));
}

#[test]
fn snapshot_cutoff_splits_replay() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = Database::new(durable_config(dir.path())).unwrap();
        let before = db.access().unwrap();
        let v = before.create_vertex().unwrap();
        v.set_property("phase", Value::from("pre-snapshot")).unwrap();
        before.commit().unwrap();

        db.snapshot_now().unwrap();

        let after = db.access().unwrap();
        let v = after.create_vertex().unwrap();
        v.set_property("phase", Value::from("post-snapshot")).unwrap();
        after.commit().unwrap();

        db.close();
    }

    let db = Database::new(durable_config(dir.path())).unwrap();
    let info = db.recovery_info().unwrap();
    assert!(info.snapshot_cutoff.is_some());
    // Only the post-snapshot transaction replays from the WAL: begin,
    // create, set-property, commit.
    assert_eq!(info.wal_records_applied, 4);

    let dba = db.access().unwrap();
    assert_eq!(dba.vertex_count(), 2);
}

#[test]
fn retention_keeps_newest_two() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(
        durable_config(dir.path()).with_snapshot_max_retained(2),
    )
    .unwrap();

    let mut cutoffs = Vec::new();
    for _ in 0..3 {
        // A mutation between snapshots keeps cutoffs distinct and the
        // images meaningful.
        let dba = db.access().unwrap();
        dba.create_vertex().unwrap();
        dba.commit().unwrap();
        let path = db.snapshot_now().unwrap();
        cutoffs.push(path);
    }

    let remaining = list_snapshots(db.config().durability_directory.as_path()).unwrap();
    assert_eq!(remaining.len(), 2);
    // The two newest survive; the first snapshot is gone.
    assert!(!cutoffs[0].exists());
    assert!(cutoffs[1].exists());
    assert!(cutoffs[2].exists());
}

#[test]
fn recovery_prefers_newest_snapshot() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = Database::new(durable_config(dir.path())).unwrap();
        let dba = db.access().unwrap();
        dba.create_vertex().unwrap();
        dba.commit().unwrap();
        db.snapshot_now().unwrap();

        let dba = db.access().unwrap();
        dba.create_vertex().unwrap();
        dba.commit().unwrap();
        db.snapshot_now().unwrap();
        db.close();
    }

    let db = Database::new(durable_config(dir.path())).unwrap();
    let info = db.recovery_info().unwrap();
    // Nothing committed after the second snapshot.
    assert_eq!(info.wal_records_applied, 0);
    let dba = db.access().unwrap();
    assert_eq!(dba.vertex_count(), 2);
}

#[test]
fn synchronous_commit_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::new(durable_config(dir.path()).with_synchronous_commit()).unwrap();
        let dba = db.access().unwrap();
        let v = dba.create_vertex().unwrap();
        v.set_property("durable", Value::from(true)).unwrap();
        dba.commit().unwrap();
        // No close: synchronous commit alone must have persisted it.
        std::mem::forget(db);
    }

    let db = Database::new(durable_config(dir.path())).unwrap();
    let dba = db.access().unwrap();
    assert_eq!(dba.vertex_count(), 1);
}

#[test]
fn snapshot_on_exit_runs_at_close() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::new(
            durable_config(dir.path()).with_snapshot_on_exit(),
        )
        .unwrap();
        let dba = db.access().unwrap();
        dba.create_vertex().unwrap();
        dba.commit().unwrap();
        assert!(list_snapshots(dir.path()).unwrap().is_empty());
        db.close();
    }
    assert_eq!(list_snapshots(dir.path()).unwrap().len(), 1);
}

#[test]
fn index_definitions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::new(durable_config(dir.path())).unwrap();
        let dba = db.access().unwrap();
        for age in [10i64, 20, 30] {
            let v = dba.create_vertex().unwrap();
            v.add_label("Person").unwrap();
            v.set_property("age", Value::from(age)).unwrap();
        }
        assert!(dba.build_index("Person", Some("age")).unwrap());
        dba.commit().unwrap();
        db.close();
    }

    let db = Database::new(durable_config(dir.path())).unwrap();
    let person = db.store().catalogs().label_id("Person").unwrap();
    let age = db.store().catalogs().property_id("age").unwrap();
    let index = db
        .store()
        .indexes()
        .ready_label_property(person, age)
        .expect("index rebuilt and ready after recovery");
    assert_eq!(index.equal(&Value::from(20i64)).len(), 1);
}
