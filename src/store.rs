//! A file-per-table JSON document store.
//!
//! Each table lives in `<base>/<name>.json` as `{"next_id": n, "rows": [...]}`.
//! Rows are JSON objects and get an auto-increment `_id` on insert. Writes go
//! straight to disk unless a [`Collection::begin`] is open, in which case they
//! are buffered until [`Collection::commit`] or undone by [`Collection::rollback`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{QubusError, Result};

pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";

lazy_static! {
    static ref VALID_TABLE: Regex = Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap();
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    base_path: PathBuf,
}

impl DocumentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
    /// Open a table, creating its document when absent.
    pub fn table(&self, name: &str) -> Result<Collection> {
        if !VALID_TABLE.is_match(name) {
            return Err(QubusError::Store(format!("invalid table name '{name}'")));
        }
        Collection::open(self.base_path.join(format!("{name}.json")))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TableFile {
    next_id: u64,
    rows: Vec<Document>,
}

// ------------- Collection -------------
#[derive(Debug)]
pub struct Collection {
    path: PathBuf,
    data: TableFile,
    snapshot: Option<TableFile>,
}

impl Collection {
    fn open(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                TableFile { next_id: 1, rows: Vec::new() }
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            let fresh = TableFile { next_id: 1, rows: Vec::new() };
            write_atomic(&path, &fresh)?;
            fresh
        };
        Ok(Self { path, data, snapshot: None })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the table from disk, dropping unflushed changes.
    pub fn reload(&mut self) -> Result<()> {
        let reopened = Collection::open(self.path.clone())?;
        self.data = reopened.data;
        self.snapshot = None;
        Ok(())
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(QubusError::Store(String::from("a transaction is already open")));
        }
        self.snapshot = Some(self.data.clone());
        Ok(())
    }
    pub fn commit(&mut self) -> Result<()> {
        if self.snapshot.take().is_none() {
            return Err(QubusError::Store(String::from("commit without begin")));
        }
        self.flush()
    }
    pub fn rollback(&mut self) -> Result<()> {
        match self.snapshot.take() {
            Some(snapshot) => {
                self.data = snapshot;
                Ok(())
            }
            None => Err(QubusError::Store(String::from("rollback without begin"))),
        }
    }
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
    fn flush(&self) -> Result<()> {
        write_atomic(&self.path, &self.data)
    }
    fn written(&self) -> Result<()> {
        if self.snapshot.is_none() { self.flush() } else { Ok(()) }
    }

    // ------------- Reads -------------
    pub fn all(&self) -> Vec<Document> {
        self.data.rows.clone()
    }
    pub fn count(&self) -> usize {
        self.data.rows.len()
    }
    pub fn where_eq(&mut self, field: &str, value: impl Into<Value>) -> Filter<'_> {
        Filter { collection: self, conditions: vec![(field.to_string(), value.into())] }
    }

    // ------------- Writes -------------
    /// Insert a document and return its `_id`.
    pub fn insert(&mut self, mut document: Document) -> Result<u64> {
        let id = self.data.next_id.max(1);
        self.data.next_id = id + 1;
        document.insert(ID_FIELD.to_string(), Value::from(id));
        self.data.rows.push(document);
        trace!(table = %self.path.display(), id, "inserted document");
        self.written()?;
        Ok(id)
    }
    /// Remove every row. The id counter keeps counting.
    pub fn truncate(&mut self) -> Result<usize> {
        let removed = self.data.rows.len();
        self.data.rows.clear();
        self.written()?;
        Ok(removed)
    }
}

fn write_atomic(path: &Path, data: &TableFile) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(data)?.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// ------------- Filter -------------
/// Rows of a collection matching every `where_eq` condition.
pub struct Filter<'c> {
    collection: &'c mut Collection,
    conditions: Vec<(String, Value)>,
}

impl<'c> Filter<'c> {
    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }
    fn matches(conditions: &[(String, Value)], row: &Document) -> bool {
        conditions
            .iter()
            .all(|(field, value)| row.get(field).is_some_and(|v| loosely_equal(v, value)))
    }
    pub fn get(&self) -> Vec<Document> {
        self.collection
            .data
            .rows
            .iter()
            .filter(|row| Self::matches(&self.conditions, row))
            .cloned()
            .collect()
    }
    pub fn first(&self) -> Option<Document> {
        self.collection
            .data
            .rows
            .iter()
            .find(|row| Self::matches(&self.conditions, row))
            .cloned()
    }
    pub fn count(&self) -> usize {
        self.collection
            .data
            .rows
            .iter()
            .filter(|row| Self::matches(&self.conditions, row))
            .count()
    }
    /// Merge `patch` into every matching row; returns the number of rows changed.
    pub fn update(self, patch: Document) -> Result<usize> {
        let mut changed = 0;
        for row in self.collection.data.rows.iter_mut() {
            if Self::matches(&self.conditions, row) {
                for (key, value) in &patch {
                    if key != ID_FIELD {
                        row.insert(key.clone(), value.clone());
                    }
                }
                changed += 1;
            }
        }
        if changed > 0 {
            self.collection.written()?;
        }
        Ok(changed)
    }
    pub fn delete(self) -> Result<usize> {
        let before = self.collection.data.rows.len();
        let conditions = &self.conditions;
        self.collection.data.rows.retain(|row| !Self::matches(conditions, row));
        let removed = before - self.collection.data.rows.len();
        if removed > 0 {
            self.collection.written()?;
        }
        Ok(removed)
    }
}

// Numbers compare by value so that 1 and 1.0 match; everything else compares exactly.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
