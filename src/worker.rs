//! The cron worker.
//!
//! One [`Worker::tick`] walks every stored job in order. For each job:
//!
//! 1. disabled jobs are skipped without touching their lock file;
//! 2. a job whose callback is no longer registered is removed, together with its
//!    queued items, unless the registry is empty, in which case the job is only
//!    skipped;
//! 3. jobs that are not due are skipped;
//! 4. the lock file is checked against the job's `max_runtime` and then reset;
//! 5. the job runs: its action hook fires, then its queue items are claimed and
//!    handed to the callback one at a time until the queue is empty or the
//!    callback returns `false`;
//! 6. the run counters are stored and the lock file is removed.
//!
//! Failures are contained per job. The tick itself only fails when the job list
//! cannot be read.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{Local, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{QubusError, Result};
use crate::queue::{JobQueue, JobRecord};
use crate::registry::Registry;
use crate::schedule::Schedule;
use crate::store::DocumentStore;

lazy_static! {
    static ref UNSAFE_FILE_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_\-]").unwrap();
}

// ------------- Outcomes -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    NotDue,
    StaleCallback,
    NoCallbacks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobOutcome {
    /// The queue was emptied; `processed` items were deleted.
    Completed { processed: usize },
    /// The callback declined an item, which went back to the queue.
    Released { processed: usize },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub pid: u64,
    pub name: String,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub started: NaiveDateTime,
    pub jobs: Vec<JobReport>,
}

impl TickReport {
    pub fn outcome(&self, pid: u64) -> Option<&JobOutcome> {
        self.jobs.iter().find(|job| job.pid == pid).map(|job| &job.outcome)
    }
}

// ------------- LockFile -------------
/// Marks a running job. Its age approximates how long the job has been running.
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn for_job(lock_dir: &Path, job_name: &str) -> Self {
        let file_name = UNSAFE_FILE_CHARS.replace_all(job_name, "_");
        Self { path: lock_dir.join(format!("{file_name}.lock")) }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// Time since the lock was last written, `None` when there is no lock.
    pub fn age(&self) -> Result<Option<Duration>> {
        match fs::metadata(&self.path) {
            Ok(metadata) => {
                let modified = metadata.modified()?;
                Ok(Some(SystemTime::now().duration_since(modified).unwrap_or_default()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
    /// Delete and recreate the lock, restarting its clock.
    pub fn reset(&self) -> Result<()> {
        self.remove()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, std::process::id().to_string())?;
        Ok(())
    }
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ------------- Worker -------------
pub struct Worker {
    pub queue: JobQueue,
    pub registry: Registry,
    lock_dir: PathBuf,
    lease: u64,
    schedules: HashMap<u64, Schedule>,
}

impl Worker {
    pub fn new(queue: JobQueue, registry: Registry, lock_dir: impl Into<PathBuf>, lease: u64) -> Self {
        Self { queue, registry, lock_dir: lock_dir.into(), lease, schedules: HashMap::new() }
    }
    pub fn from_settings(settings: &Settings, registry: Registry) -> Result<Self> {
        let store = DocumentStore::new(&settings.store_path)?;
        fs::create_dir_all(&settings.lock_dir)?;
        Ok(Self::new(JobQueue::open(&store)?, registry, &settings.lock_dir, settings.lease_seconds))
    }
    /// Use `schedule` for job `pid` instead of its stored schedule string.
    /// This is how predicate schedules are attached.
    pub fn set_schedule(&mut self, pid: u64, schedule: Schedule) {
        self.schedules.insert(pid, schedule);
    }
    pub fn lock_for(&self, job: &JobRecord) -> LockFile {
        LockFile::for_job(&self.lock_dir, &job.descriptor.name)
    }

    pub fn tick(&mut self) -> Result<TickReport> {
        self.tick_at(Local::now().naive_local())
    }

    pub fn tick_at(&mut self, now: NaiveDateTime) -> Result<TickReport> {
        let jobs = self.queue.jobs()?;
        let mut report = TickReport { started: now, jobs: Vec::with_capacity(jobs.len()) };
        for job in jobs {
            let outcome = match self.run_job(&job, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    if job.descriptor.debug {
                        error!(target: "qubus::error", job = %job.descriptor.name, error = %e, "job failed");
                        error!(target: "qubus::system_email", job = %job.descriptor.name, error = %e, "job failed");
                    } else {
                        debug!(job = %job.descriptor.name, error = %e, "job failed");
                    }
                    JobOutcome::Failed { error: e.to_string() }
                }
            };
            report.jobs.push(JobReport {
                pid: job.descriptor.pid,
                name: job.descriptor.name.clone(),
                outcome,
            });
        }
        info!(jobs = report.jobs.len(), "cron tick complete");
        Ok(report)
    }

    fn run_job(&mut self, job: &JobRecord, now: NaiveDateTime) -> Result<JobOutcome> {
        let descriptor = &job.descriptor;
        if !descriptor.enabled {
            return Ok(JobOutcome::Skipped { reason: SkipReason::Disabled });
        }
        if !self.registry.exists(&descriptor.callback) {
            if self.registry.is_empty() {
                warn!(job = %descriptor.name, "no callbacks are registered, job left in place");
                return Ok(JobOutcome::Skipped { reason: SkipReason::NoCallbacks });
            }
            warn!(job = %descriptor.name, callback = %descriptor.callback, "callback is gone, removing job");
            self.queue.remove_job(descriptor.pid, &descriptor.name)?;
            return Ok(JobOutcome::Skipped { reason: SkipReason::StaleCallback });
        }
        if !self.is_due(job, now)? {
            return Ok(JobOutcome::Skipped { reason: SkipReason::NotDue });
        }
        let lock = self.check_lock(job)?;
        let clock = Instant::now();
        let outcome = self.run(job);
        let elapsed = clock.elapsed().as_secs_f64();
        if let Err(e) = lock.remove() {
            warn!(job = %descriptor.name, error = %e, "could not remove lock file");
        }
        let outcome = outcome?;
        if let Err(e) = self.queue.record_run(descriptor.pid, now, elapsed) {
            error!(target: "qubus::error", job = %descriptor.name, error = %e, "could not record run");
        }
        Ok(outcome)
    }

    pub fn is_due(&self, job: &JobRecord, now: NaiveDateTime) -> Result<bool> {
        match self.schedules.get(&job.descriptor.pid) {
            Some(schedule) => Ok(schedule.is_due(now)),
            None => Ok(job.descriptor.schedule.parse::<Schedule>()?.is_due(now)),
        }
    }

    /// Enforce `max_runtime` against the age of the previous lock, then reset it.
    ///
    /// A lock older than the budget is removed and the job fails for this tick,
    /// so the next tick starts from a fresh lock.
    pub fn check_lock(&self, job: &JobRecord) -> Result<LockFile> {
        let lock = self.lock_for(job);
        if let Some(max) = job.descriptor.max_runtime {
            if cfg!(windows) {
                return Err(QubusError::UnsupportedPlatform(String::from(
                    "max runtime is not supported on Windows",
                )));
            }
            if let Some(age) = lock.age()? {
                if age.as_secs() > max {
                    lock.remove()?;
                    return Err(QubusError::MaxRuntimeExceeded {
                        job: job.descriptor.name.clone(),
                        elapsed: age.as_secs(),
                        max,
                    });
                }
            }
        }
        lock.reset()?;
        Ok(lock)
    }

    fn run(&mut self, job: &JobRecord) -> Result<JobOutcome> {
        let hook = &job.descriptor.action_hook;
        if !hook.is_empty() {
            let fired = self.registry.do_action(hook)?;
            debug!(job = %job.descriptor.name, hook = %hook, fired, "fired action hook");
        }
        self.drain(job)
    }

    /// Claim and process the job's queue items one at a time.
    pub fn drain(&mut self, job: &JobRecord) -> Result<JobOutcome> {
        let name = &job.descriptor.name;
        let callback = &job.descriptor.callback;
        let mut processed = 0;
        loop {
            let Some(item) = self.queue.claim_item(name, self.lease)? else {
                let remaining = self.queue.number_of_items(name)?;
                if remaining == 0 {
                    info!(job = %name, processed, "queue drained");
                } else {
                    info!(job = %name, processed, remaining, "items still pending");
                }
                return Ok(JobOutcome::Completed { processed });
            };
            match self.registry.invoke(callback, &item.data) {
                Ok(true) => {
                    self.queue.delete_item(&item)?;
                    processed += 1;
                }
                Ok(false) => {
                    self.queue.release_item(&item)?;
                    info!(job = %name, item = item.item_id, "item released for a later tick");
                    return Ok(JobOutcome::Released { processed });
                }
                Err(e) => {
                    self.queue.release_item(&item)?;
                    return Err(e);
                }
            }
        }
    }
}
