//! Job records and queue items, kept in the document store.
//!
//! A [`JobRecord`] describes a recurring scheduled job and lives in the `tasks`
//! table. A [`QueueItem`] is one unit of work for a job and lives in the
//! `task_queue` table. Items are claimed by setting an `expire` lease; an item
//! whose lease ran out can be claimed again.
//!
//! Other processes write to the same tables, so every operation re-reads the
//! table files before it looks at or changes them.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::{QubusError, Result};
use crate::store::{Collection, Document, DocumentStore, ID_FIELD};

pub const JOB_TABLE: &str = "tasks";
pub const ITEM_TABLE: &str = "task_queue";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What callers hand to [`JobQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub pid: u64,
    pub name: String,
    pub callback: String,
    #[serde(default)]
    pub action_hook: String,
    pub schedule: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub max_runtime: Option<u64>,
}

fn enabled_by_default() -> bool {
    true
}

/// A stored job: the descriptor plus run counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(flatten)]
    pub descriptor: TaskDescriptor,
    #[serde(default)]
    pub executions: u64,
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub last_runtime: Option<f64>,
}

impl JobRecord {
    pub fn last_run_at(&self) -> Option<NaiveDateTime> {
        self.last_run
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(rename = "_id", default)]
    pub item_id: u64,
    pub queue: String,
    pub data: Value,
    pub created: i64,
    /// Unix time the current claim runs out; 0 when unclaimed.
    #[serde(default)]
    pub expire: i64,
}

fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(QubusError::Store(format!("expected a JSON object, got {other}"))),
    }
}

fn from_document<T: for<'de> Deserialize<'de>>(document: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

// Run `work` between begin and commit on a fresh copy of the table, rolling back when it fails.
fn bracket<T>(collection: &mut Collection, work: impl FnOnce(&mut Collection) -> Result<T>) -> Result<T> {
    collection.reload()?;
    collection.begin()?;
    match work(collection).and_then(|value| collection.commit().map(|_| value)) {
        Ok(value) => Ok(value),
        Err(e) => {
            if collection.in_transaction() {
                if let Err(rollback) = collection.rollback() {
                    error!(target: "qubus::error", error = %rollback, "store rollback failed");
                }
            }
            Err(e)
        }
    }
}

// ------------- JobQueue -------------
#[derive(Debug)]
pub struct JobQueue {
    jobs: Collection,
    items: Collection,
}

impl JobQueue {
    pub fn open(store: &DocumentStore) -> Result<Self> {
        Ok(Self { jobs: store.table(JOB_TABLE)?, items: store.table(ITEM_TABLE)? })
    }

    /// Insert the job, or update the stored descriptor when `pid` is already known.
    pub fn enqueue(&mut self, descriptor: &TaskDescriptor) -> Result<()> {
        let patch = to_document(descriptor)?;
        let pid = descriptor.pid;
        bracket(&mut self.jobs, |jobs| {
            if jobs.where_eq("pid", pid).count() > 0 {
                jobs.where_eq("pid", pid).update(patch)?;
                debug!(pid, "updated job");
            } else {
                let record = JobRecord {
                    descriptor: descriptor.clone(),
                    executions: 0,
                    last_run: None,
                    last_runtime: None,
                };
                jobs.insert(to_document(&record)?)?;
                debug!(pid, "inserted job");
            }
            Ok(())
        })
    }

    pub fn job(&mut self, pid: u64) -> Result<Option<JobRecord>> {
        self.jobs.reload()?;
        self.jobs.where_eq("pid", pid).first().map(from_document).transpose()
    }
    /// Every stored job, in insertion order.
    pub fn jobs(&mut self) -> Result<Vec<JobRecord>> {
        self.jobs.reload()?;
        self.jobs.all().into_iter().map(from_document).collect()
    }
    pub fn enabled_jobs(&mut self) -> Result<Vec<JobRecord>> {
        self.jobs.reload()?;
        self.jobs.where_eq("enabled", true).get().into_iter().map(from_document).collect()
    }
    pub fn job_count(&mut self) -> Result<usize> {
        self.jobs.reload()?;
        Ok(self.jobs.count())
    }

    /// Count one more execution of `pid`, started at `started` and lasting `elapsed` seconds.
    pub fn record_run(&mut self, pid: u64, started: NaiveDateTime, elapsed: f64) -> Result<()> {
        bracket(&mut self.jobs, |jobs| {
            let current = jobs
                .where_eq("pid", pid)
                .first()
                .ok_or_else(|| QubusError::Store(format!("no job with pid {pid}")))?;
            let executions = current.get("executions").and_then(Value::as_u64).unwrap_or(0);
            let mut patch = Map::new();
            patch.insert("executions".into(), Value::from(executions + 1));
            patch.insert("last_run".into(), Value::from(started.format(TIMESTAMP_FORMAT).to_string()));
            patch.insert("last_runtime".into(), Value::from(elapsed));
            jobs.where_eq("pid", pid).update(patch)?;
            Ok(())
        })
    }

    /// Drop a job together with every item still queued for it.
    pub fn remove_job(&mut self, pid: u64, name: &str) -> Result<usize> {
        let removed = bracket(&mut self.jobs, |jobs| jobs.where_eq("pid", pid).delete())?;
        bracket(&mut self.items, |items| items.where_eq("queue", name).delete())?;
        Ok(removed)
    }

    // ------------- Items -------------
    pub fn create_item(&mut self, queue: &str, data: Value) -> Result<u64> {
        let item = QueueItem {
            item_id: 0,
            queue: queue.to_string(),
            data,
            created: Utc::now().timestamp(),
            expire: 0,
        };
        let mut document = to_document(&item)?;
        document.remove(ID_FIELD);
        self.items.reload()?;
        self.items.insert(document)
    }
    pub fn number_of_items(&mut self, queue: &str) -> Result<usize> {
        self.items.reload()?;
        Ok(self.items.where_eq("queue", queue).count())
    }
    /// Claim the oldest claimable item of `queue` for `lease` seconds.
    pub fn claim_item(&mut self, queue: &str, lease: u64) -> Result<Option<QueueItem>> {
        self.claim_item_at(queue, lease, Utc::now().timestamp())
    }
    pub fn claim_item_at(&mut self, queue: &str, lease: u64, now: i64) -> Result<Option<QueueItem>> {
        self.items.reload()?;
        let candidate = self
            .items
            .where_eq("queue", queue)
            .get()
            .into_iter()
            .map(from_document::<QueueItem>)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|item| item.expire == 0 || item.expire <= now)
            .min_by_key(|item| (item.created, item.item_id));
        let Some(mut item) = candidate else {
            return Ok(None);
        };
        item.expire = now + lease as i64;
        let mut patch = Map::new();
        patch.insert("expire".into(), Value::from(item.expire));
        self.items.where_eq(ID_FIELD, item.item_id).update(patch)?;
        Ok(Some(item))
    }
    /// Hand a claimed item back to the queue.
    pub fn release_item(&mut self, item: &QueueItem) -> Result<bool> {
        let mut patch = Map::new();
        patch.insert("expire".into(), Value::from(0));
        self.items.reload()?;
        Ok(self.items.where_eq(ID_FIELD, item.item_id).update(patch)? > 0)
    }
    pub fn delete_item(&mut self, item: &QueueItem) -> Result<bool> {
        self.items.reload()?;
        Ok(self.items.where_eq(ID_FIELD, item.item_id).delete()? > 0)
    }
    pub fn delete_queue(&mut self, queue: &str) -> Result<usize> {
        self.items.reload()?;
        self.items.where_eq("queue", queue).delete()
    }
}
