//! The relational store handle.
//!
//! [`Database`] owns the SQLite connection together with everything that used to
//! be process-wide state: the tenant context (active site and table prefixes),
//! the last result set and the list of saved statements. Every operation goes
//! through a handle, so two sites can be served side by side by two handles.

use std::path::Path;

use rusqlite::{Connection, params_from_iter};
use rusqlite::types::Value;
use tracing::{debug, error};

use crate::binder::{Binder, Bound, Dialect, Params};
use crate::config::Settings;
use crate::error::{QubusError, Result};
use crate::materialize::{Output, OutputShape, RowOutput, RowSet};
use crate::prefix::{TableRegistry, TenantContext};

pub struct Database {
    connection: Connection,
    pub binder: Binder,
    pub tenant: TenantContext,
    /// Keep every executed statement in `saved_queries`.
    pub log_prepared_statements: bool,
    /// Propagate failures out of [`Database::transaction_or`] instead of
    /// returning the default.
    pub throw_transaction_exceptions: bool,
    last_result: Option<RowSet>,
    saved_queries: Vec<String>,
    num_queries: usize,
    in_transaction: bool,
}

impl Database {
    pub fn new(connection: Connection, tenant: TenantContext) -> Self {
        Self {
            connection,
            binder: Binder::new(Dialect::Sqlite),
            tenant,
            log_prepared_statements: false,
            throw_transaction_exceptions: true,
            last_result: None,
            saved_queries: Vec::new(),
            num_queries: 0,
            in_transaction: false,
        }
    }
    pub fn open_in_memory(base_prefix: &str) -> Result<Self> {
        let tenant = TenantContext::new(base_prefix, TableRegistry::default())?;
        Ok(Self::new(Connection::open_in_memory()?, tenant))
    }
    pub fn open(path: &Path, base_prefix: &str) -> Result<Self> {
        let tenant = TenantContext::new(base_prefix, TableRegistry::default())?;
        Ok(Self::new(Connection::open(path)?, tenant))
    }
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut database = Self::open(&settings.database_path, &settings.base_prefix)?;
        database.tenant.set_site_id(settings.site_id);
        database.log_prepared_statements = settings.log_prepared_statements;
        database.throw_transaction_exceptions = settings.throw_transaction_exceptions;
        Ok(database)
    }
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Resolved name of a logical table for the active site.
    pub fn table(&self, key: &str) -> Result<String> {
        self.tenant
            .table(key)
            .map(str::to_string)
            .ok_or_else(|| QubusError::InvalidQuery(format!("unknown table '{key}'")))
    }

    // ------------- Binding -------------
    /// Bind parameters into a template. A missing template yields `None`.
    pub fn prepare(&mut self, template: Option<&str>, params: impl Into<Params>) -> Result<Option<Bound>> {
        let bound = self.binder.bind(template, params)?;
        if let Some(bound) = &bound {
            if self.log_prepared_statements {
                debug!(target: "qubus::prepared", sql = %bound.inlined, "prepared statement");
                self.saved_queries.push(bound.inlined.clone());
            }
        }
        Ok(bound)
    }
    /// Bind and return the inlined statement only.
    pub fn prepare_inline(&mut self, template: Option<&str>, params: impl Into<Params>) -> Result<Option<String>> {
        Ok(self.prepare(template, params)?.map(|bound| bound.inlined))
    }
    pub fn saved_queries(&self) -> &[String] {
        &self.saved_queries
    }
    /// Number of statements sent to SQLite through this handle.
    pub fn num_queries(&self) -> usize {
        self.num_queries
    }

    // ------------- Execution -------------
    /// Execute a statement that returns no rows; yields the number of rows changed.
    pub fn query(&mut self, query: &Bound) -> Result<usize> {
        self.num_queries += 1;
        let mut statement = self.connection.prepare(&query.native)?;
        Ok(statement.execute(params_from_iter(query.values.iter()))?)
    }
    pub fn insert_id(&self) -> i64 {
        self.connection.last_insert_rowid()
    }
    fn fetch(&mut self, query: &Bound) -> Result<&RowSet> {
        self.num_queries += 1;
        let mut statement = self.connection.prepare(&query.native)?;
        let columns: Vec<String> = statement.column_names().into_iter().map(String::from).collect();
        let mut rows = statement.query(params_from_iter(query.values.iter()))?;
        let mut fetched = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(row.get::<_, Value>(i)?);
            }
            fetched.push(values);
        }
        Ok(&*self.last_result.insert(RowSet::new(columns, fetched)))
    }
    // Run `query` when given, otherwise fall back on the last result.
    fn fetch_or_last(&mut self, query: Option<&Bound>) -> Result<Option<&RowSet>> {
        match query {
            Some(query) if !query.native.trim().is_empty() => self.fetch(query).map(Some),
            _ => Ok(self.last_result.as_ref()),
        }
    }
    pub fn last_result(&self) -> Option<&RowSet> {
        self.last_result.as_ref()
    }

    // ------------- Materializing -------------
    /// Execute `query` and render every row. Never reuses the last result.
    pub fn get_results(&mut self, query: Option<&Bound>, shape: OutputShape) -> Result<Option<Output>> {
        match query {
            Some(query) if !query.native.trim().is_empty() => {
                let set = self.fetch(query)?;
                set.render(shape).map(Some)
            }
            _ => Ok(None),
        }
    }
    /// One cell, by column and row index. NULL and missing cells read as `None`.
    pub fn get_var(&mut self, query: Option<&Bound>, x: usize, y: usize) -> Result<Option<Value>> {
        Ok(self.fetch_or_last(query)?.and_then(|set| set.var(x, y)))
    }
    pub fn get_col(&mut self, query: Option<&Bound>, x: usize) -> Result<Vec<Value>> {
        Ok(self.fetch_or_last(query)?.map(|set| set.col(x)).unwrap_or_default())
    }
    pub fn get_row(&mut self, query: Option<&Bound>, shape: OutputShape, y: usize) -> Result<Option<RowOutput>> {
        match self.fetch_or_last(query)? {
            Some(set) => set.row(shape, y),
            None => Ok(None),
        }
    }

    // ------------- Transactions -------------
    /// Run `unit` inside a transaction, committing when it returns `Ok`.
    ///
    /// On failure the transaction is rolled back. The error is returned when
    /// `throw_transaction_exceptions` is set, otherwise it is logged and
    /// `default` is returned. Calling this from inside `unit` fails with
    /// [`QubusError::NestedTransaction`] regardless of that setting.
    pub fn transaction_or<T, F>(&mut self, unit: F, default: T) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T>,
    {
        if self.in_transaction || !self.connection.is_autocommit() {
            return Err(QubusError::NestedTransaction);
        }
        self.connection.execute_batch("BEGIN")?;
        self.in_transaction = true;
        let outcome = unit(self);
        self.in_transaction = false;
        let outcome = match outcome {
            Ok(value) => self.connection.execute_batch("COMMIT").map(|_| value).map_err(QubusError::from),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(value) => Ok(value),
            Err(e) => {
                if !self.connection.is_autocommit() {
                    if let Err(rollback) = self.connection.execute_batch("ROLLBACK") {
                        error!(target: "qubus::error", error = %rollback, "rollback failed");
                    }
                }
                if matches!(e, QubusError::NestedTransaction) || self.throw_transaction_exceptions {
                    Err(e)
                } else {
                    error!(target: "qubus::error", error = %e, "transaction failed");
                    Ok(default)
                }
            }
        }
    }
    /// [`Database::transaction_or`] with `None` as the default.
    pub fn transaction<T, F>(&mut self, unit: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Database) -> Result<T>,
    {
        self.transaction_or(|db| unit(db).map(Some), None)
    }
}
