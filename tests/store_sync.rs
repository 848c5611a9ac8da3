use async_trait::async_trait;
use ball_planner_lib::bridge::MemoryBridge;
use ball_planner_lib::db::SqlMirror;
use ball_planner_lib::models::{DateKey, TaskCategory, TaskPatch, TaskStatus};
use ball_planner_lib::store::Store;
use ball_planner_lib::sync::{Change, ChangeOp, QueueState, RemoteStore, SyncQueue};
use ball_planner_lib::{AppError, AppResult};
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// SQLite mirror that can be told to reject updates.
struct FlakyMirror {
    inner: SqlMirror,
    reject_updates: AtomicBool,
}

#[async_trait]
impl RemoteStore for FlakyMirror {
    async fn apply(&self, change: &Change) -> AppResult<()> {
        if self.reject_updates.load(Ordering::SeqCst) && change.operation() == ChangeOp::Update {
            return Err(AppError::Sync("connection reset".to_string()));
        }
        self.inner.apply_change(change)
    }
}

fn day(raw: &str) -> DateKey {
    DateKey::Day(NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date"))
}

#[tokio::test]
async fn failed_update_leaves_remote_unchanged_and_stays_queued() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mirror = Arc::new(FlakyMirror {
        inner: SqlMirror::new(&dir.path().join("mirror.sqlite")).expect("mirror"),
        reject_updates: AtomicBool::new(true),
    });
    let queue = SyncQueue::new(mirror.clone());
    let bridge = Arc::new(MemoryBridge::new());
    let store = Store::new(bridge, "state.json").with_sync(queue.clone());
    store.hydrate(None).confirmed().await.expect("hydrate");

    let (task, receipt) = store.create_task(day("2025-03-10"), TaskCategory::Work);
    receipt.confirmed().await.expect("create");
    store
        .update_task(
            &task.id,
            TaskPatch {
                status: Some(TaskStatus::Done),
                ..TaskPatch::default()
            },
        )
        .confirmed()
        .await
        .expect("update");
    queue.wait_idle().await;

    let remote = mirror.inner.load_snapshot().expect("snapshot");
    assert_eq!(remote.tasks.len(), 1);
    assert_eq!(remote.tasks[0].id, task.id);
    assert_eq!(remote.tasks[0].status, TaskStatus::Todo);

    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert!(matches!(&pending[0], Change::UpdateTask { id, .. } if *id == task.id));
    assert_eq!(queue.state(), QueueState::Backlog);

    // The local copy is ahead of the remote one.
    assert_eq!(store.select(|state| state.tasks[0].status), TaskStatus::Done);

    mirror.reject_updates.store(false, Ordering::SeqCst);
    queue.flush().await;
    assert!(queue.is_empty());
    let remote = mirror.inner.load_snapshot().expect("snapshot");
    assert_eq!(remote.tasks[0].status, TaskStatus::Done);
}

#[tokio::test]
async fn later_changes_wait_behind_a_failed_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mirror = Arc::new(FlakyMirror {
        inner: SqlMirror::new(&dir.path().join("mirror.sqlite")).expect("mirror"),
        reject_updates: AtomicBool::new(true),
    });
    let queue = SyncQueue::new(mirror.clone());
    let store = Store::new(Arc::new(MemoryBridge::new()), "state.json").with_sync(queue.clone());

    let (person, _) = store.add_person("Ada", None);
    queue.wait_idle().await;
    store.edit_person(
        &person.id,
        ball_planner_lib::models::PersonPatch {
            name: Some("Ada L.".to_string()),
            ..Default::default()
        },
    );
    queue.wait_idle().await;
    let (note, _) = store.add_one_on_one_item(&person.id, "Discuss roadmap");
    queue.wait_idle().await;

    // Only the insert of the person made it; the note waits behind the rejected edit.
    assert_eq!(mirror.inner.count_rows("one_on_one_people").expect("count"), 1);
    assert_eq!(mirror.inner.count_rows("one_on_ones").expect("count"), 0);
    let pending = queue.pending();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].operation(), ChangeOp::Update);
    assert!(matches!(&pending[1], Change::InsertOneOnOne(item) if item.id == note.id));
}

#[tokio::test]
async fn deleting_a_person_only_touches_their_bucket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mirror = Arc::new(SqlMirror::new(&dir.path().join("mirror.sqlite")).expect("mirror"));
    let queue = SyncQueue::new(mirror.clone());
    let store = Store::new(Arc::new(MemoryBridge::new()), "state.json").with_sync(queue.clone());

    let (ada, _) = store.add_person("Ada", None);
    let (bob, _) = store.add_person("Bob", None);
    store.add_one_on_one_item(&ada.id, "one");
    store.add_one_on_one_item(&ada.id, "two");
    let (kept, receipt) = store.add_one_on_one_item(&bob.id, "three");
    receipt.confirmed().await.expect("write");

    store.delete_person(&ada.id).confirmed().await.expect("delete");
    queue.wait_idle().await;

    let state = store.snapshot();
    assert_eq!(state.people.len(), 1);
    assert!(!state.one_on_ones.contains_key(&ada.id));
    assert_eq!(state.one_on_ones[&bob.id].len(), 1);
    assert_eq!(state.one_on_ones[&bob.id][0].id, kept.id);

    let remote = mirror.load_snapshot().expect("snapshot");
    assert_eq!(remote.people.len(), 1);
    assert_eq!(remote.one_on_ones.len(), 1);
    assert_eq!(remote.one_on_ones[0].person_id, bob.id);
}

#[tokio::test]
async fn remote_snapshot_round_trips_into_a_fresh_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mirror = Arc::new(SqlMirror::new(&dir.path().join("mirror.sqlite")).expect("mirror"));
    let queue = SyncQueue::new(mirror.clone());
    let store = Store::new(Arc::new(MemoryBridge::new()), "state.json").with_sync(queue.clone());

    let (first, _) = store.add_person("First", None);
    let (second, _) = store.add_person("Second", None);
    store.reorder_people(&[second.id.clone(), first.id.clone()]);
    store.create_task(DateKey::Inbox, TaskCategory::Personal);
    queue.wait_idle().await;

    let fresh = Store::new(Arc::new(MemoryBridge::new()), "state.json");
    fresh
        .apply_remote_snapshot(mirror.load_snapshot().expect("snapshot"))
        .confirmed()
        .await
        .expect("apply");

    let state = fresh.snapshot();
    let names = state.people.iter().map(|person| person.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["Second", "First"]);
    assert_eq!(fresh.inbox_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reorders_reach_the_remote_in_local_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mirror = Arc::new(SqlMirror::new(&dir.path().join("mirror.sqlite")).expect("mirror"));
    let queue = SyncQueue::new(mirror.clone());
    let store = Arc::new(Store::new(Arc::new(MemoryBridge::new()), "state.json").with_sync(queue.clone()));

    let ids = ["Ada", "Ben", "Cy", "Dee", "Eve", "Fay"]
        .iter()
        .map(|name| store.add_person(name, None).0.id)
        .collect::<Vec<_>>();

    let workers = (0..4)
        .map(|worker| {
            let store = store.clone();
            let ids = ids.clone();
            tokio::spawn(async move {
                for round in 0..25 {
                    let mut order = ids.clone();
                    order.rotate_left((worker + round) % ids.len());
                    if worker % 2 == 1 {
                        order.reverse();
                    }
                    store.reorder_people(&order);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect::<Vec<_>>();
    for worker in workers {
        worker.await.expect("worker");
    }
    queue.wait_idle().await;
    assert_eq!(queue.state(), QueueState::Idle);

    let local = store.select(|state| {
        state
            .people
            .iter()
            .map(|person| (person.id.clone(), person.sort_order))
            .collect::<Vec<_>>()
    });
    let remote = mirror
        .load_snapshot()
        .expect("snapshot")
        .people
        .into_iter()
        .map(|person| (person.id, person.sort_order))
        .collect::<Vec<_>>();
    assert_eq!(remote, local);
}
