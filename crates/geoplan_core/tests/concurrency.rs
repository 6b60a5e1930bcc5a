use geoplan_core::{
    attrs, EntityRepository, FieldValue, LinkRepository, Store, StoreConfig,
};
use std::path::Path;
use std::thread;
use uuid::Uuid;

const WORKERS: usize = 4;
const TASKS_PER_WORKER: usize = 25;

fn worker_config(path: &Path) -> StoreConfig {
    StoreConfig::file(path).with_sync_on_startup(false)
}

#[test]
fn concurrent_writers_on_one_file_all_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geoplan.db");
    let store = Store::connect(&StoreConfig::file(&path)).unwrap();
    let graph = store.shared_schema();
    let project = store
        .entity("project")
        .unwrap()
        .create(&attrs([("name", "Survey")]))
        .unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let graph = graph.clone();
            let config = worker_config(&path);
            thread::spawn(move || {
                let store = Store::connect_shared(&config, graph).unwrap();
                let tasks = store.entity("task").unwrap();
                for index in 0..TASKS_PER_WORKER {
                    tasks
                        .create(&attrs([
                            ("title", FieldValue::from(format!("task {worker}-{index}"))),
                            ("project_id", project.into()),
                        ]))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let tasks = store.entity("task").unwrap().list_by_parent("project_id", project).unwrap();
    assert_eq!(tasks.len(), WORKERS * TASKS_PER_WORKER);
    let mut ids: Vec<Uuid> = tasks.iter().map(|record| record.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), WORKERS * TASKS_PER_WORKER);
}

#[test]
fn racing_links_on_one_pair_leave_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geoplan.db");
    let store = Store::connect(&StoreConfig::file(&path)).unwrap();
    let graph = store.shared_schema();
    let memo = store
        .entity("memo")
        .unwrap()
        .create(&attrs([("title", "Kickoff")]))
        .unwrap();
    let person = store
        .entity("person")
        .unwrap()
        .create(&attrs([("name", "Ana"), ("email", "ana@example.com")]))
        .unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let graph = graph.clone();
            let config = worker_config(&path);
            thread::spawn(move || {
                let store = Store::connect_shared(&config, graph).unwrap();
                store
                    .links("memo_posts_person")
                    .unwrap()
                    .link(memo, person, &attrs([("posted_at", worker as i64)]))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let links = store.links("memo_posts_person").unwrap();
    let listed = links.list_by_left(memo).unwrap();
    assert_eq!(listed.len(), 1);
    let posted_at = listed[0].payload.get("posted_at").cloned();
    assert!(matches!(posted_at, Some(FieldValue::Integer(value)) if (0..WORKERS as i64).contains(&value)));
}
