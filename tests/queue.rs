use chrono::NaiveDate;
use qubus::queue::{JobQueue, TaskDescriptor};
use qubus::store::DocumentStore;
use serde_json::json;

fn descriptor(pid: u64, name: &str) -> TaskDescriptor {
    TaskDescriptor {
        pid,
        name: name.to_string(),
        callback: format!("{name}_callback"),
        action_hook: String::new(),
        schedule: String::from("*/5 * * * *"),
        enabled: true,
        debug: false,
        max_runtime: None,
    }
}

fn open(dir: &tempfile::TempDir) -> JobQueue {
    JobQueue::open(&DocumentStore::new(dir.path()).unwrap()).unwrap()
}

#[test]
fn enqueue_is_an_upsert_by_pid() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = open(&dir);
    let mut mailer = descriptor(7, "mailer");
    queue.enqueue(&mailer).unwrap();
    queue.enqueue(&mailer).unwrap();
    assert_eq!(queue.job_count().unwrap(), 1);

    mailer.schedule = String::from("@hourly");
    mailer.enabled = false;
    queue.enqueue(&mailer).unwrap();
    queue.enqueue(&descriptor(8, "cleanup")).unwrap();
    assert_eq!(queue.job_count().unwrap(), 2);

    let stored = queue.job(7).unwrap().unwrap();
    assert_eq!(stored.descriptor, mailer);
    assert_eq!(stored.executions, 0);
    let enabled: Vec<u64> = queue.enabled_jobs().unwrap().iter().map(|job| job.descriptor.pid).collect();
    assert_eq!(enabled, [8]);

    // survives a reopen
    let mut reopened = open(&dir);
    assert_eq!(reopened.job(7).unwrap().unwrap().descriptor.schedule, "@hourly");
}

#[test]
fn record_run_counts_executions() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = open(&dir);
    queue.enqueue(&descriptor(1, "mailer")).unwrap();
    let started = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap().and_hms_opt(9, 0, 0).unwrap();
    queue.record_run(1, started, 0.25).unwrap();
    queue.record_run(1, started, 0.5).unwrap();

    let job = queue.job(1).unwrap().unwrap();
    assert_eq!(job.executions, 2);
    assert_eq!(job.last_run.as_deref(), Some("2026-10-19 09:00:00"));
    assert_eq!(job.last_run_at(), Some(started));
    assert_eq!(job.last_runtime, Some(0.5));

    // re-registering keeps the counters
    queue.enqueue(&descriptor(1, "mailer")).unwrap();
    assert_eq!(queue.job(1).unwrap().unwrap().executions, 2);

    assert!(queue.record_run(99, started, 0.1).is_err());
}

#[test]
fn items_are_claimed_in_order_and_leased() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = open(&dir);
    let first = queue.create_item("mailer", json!({"to": "a@example.com"})).unwrap();
    let second = queue.create_item("mailer", json!({"to": "b@example.com"})).unwrap();
    queue.create_item("other", json!(null)).unwrap();
    assert_eq!(queue.number_of_items("mailer").unwrap(), 2);

    let now = 1_000_000;
    let claimed = queue.claim_item_at("mailer", 30, now).unwrap().unwrap();
    assert_eq!(claimed.item_id, first);
    assert_eq!(claimed.data["to"], "a@example.com");
    assert_eq!(claimed.expire, now + 30);

    let next = queue.claim_item_at("mailer", 30, now).unwrap().unwrap();
    assert_eq!(next.item_id, second);
    assert!(queue.claim_item_at("mailer", 30, now).unwrap().is_none());

    // an expired lease can be claimed again
    let again = queue.claim_item_at("mailer", 30, now + 31).unwrap().unwrap();
    assert_eq!(again.item_id, first);

    assert!(queue.release_item(&next).unwrap());
    assert_eq!(queue.claim_item_at("mailer", 30, now + 1).unwrap().unwrap().item_id, second);

    assert!(queue.delete_item(&again).unwrap());
    assert!(!queue.delete_item(&again).unwrap());
    assert_eq!(queue.number_of_items("mailer").unwrap(), 1);
    assert_eq!(queue.delete_queue("mailer").unwrap(), 1);
    assert_eq!(queue.number_of_items("other").unwrap(), 1);
}

#[test]
fn removing_a_job_purges_its_items() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = open(&dir);
    queue.enqueue(&descriptor(3, "indexer")).unwrap();
    queue.enqueue(&descriptor(4, "mailer")).unwrap();
    queue.create_item("indexer", json!(1)).unwrap();
    queue.create_item("indexer", json!(2)).unwrap();
    queue.create_item("mailer", json!(3)).unwrap();

    assert_eq!(queue.remove_job(3, "indexer").unwrap(), 1);
    assert!(queue.job(3).unwrap().is_none());
    assert_eq!(queue.number_of_items("indexer").unwrap(), 0);
    assert_eq!(queue.number_of_items("mailer").unwrap(), 1);
    assert_eq!(queue.remove_job(3, "indexer").unwrap(), 0);
}

#[test]
fn handles_on_one_store_see_each_others_writes() {
    let dir = tempfile::tempdir().unwrap();
    let mut long_lived = open(&dir);
    let mut other = open(&dir);
    assert!(long_lived.jobs().unwrap().is_empty());

    other.enqueue(&descriptor(1, "mailer")).unwrap();
    other.create_item("mailer", json!("a")).unwrap();
    assert_eq!(long_lived.job_count().unwrap(), 1);
    assert_eq!(long_lived.number_of_items("mailer").unwrap(), 1);

    long_lived.enqueue(&descriptor(2, "cleanup")).unwrap();
    long_lived.create_item("cleanup", json!("b")).unwrap();
    let mut reopened = open(&dir);
    let pids: Vec<u64> = reopened.jobs().unwrap().iter().map(|job| job.descriptor.pid).collect();
    assert_eq!(pids, [1, 2]);
    assert_eq!(reopened.number_of_items("mailer").unwrap(), 1);
    assert_eq!(reopened.number_of_items("cleanup").unwrap(), 1);
}
