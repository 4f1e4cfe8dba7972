//! Qubus – the data access and cron queue core of the Qubus CMS.
//!
//! Two independent halves live in this crate.
//!
//! The relational half wraps a SQLite connection in a [`database::Database`]
//! handle:
//! * [`binder`] turns a template with `?` and `:name` placeholders into a
//!   statement with driver bind variables (and an inlined copy for logs). String
//!   literals in the template are respected, including `\'` escapes.
//! * [`materialize`] renders result sets as objects, associative maps,
//!   positional lists or JSON, and slices the last result by cell, column or row.
//! * [`prefix`] resolves logical table keys to per-site table names.
//! * [`post`] reads posts as typed structs, with metadata through `get_meta`.
//! * [`database::Database::transaction_or`] brackets a unit of work in a
//!   transaction.
//!
//! The queue half is driven by cron:
//! * [`store`] is a file-per-table JSON document store with begin/commit/rollback.
//! * [`queue`] keeps job records and queue items in that store.
//! * [`schedule`] decides whether a job is due.
//! * [`worker`] runs one cron tick: due check, lock check, run, record.
//! * [`server`] exposes the tick (and a multisite fan-out) over HTTP.
//!
//! ## Quick Start
//! ```
//! use qubus::binder::Param;
//! use qubus::database::Database;
//! use qubus::materialize::OutputShape;
//! let mut db = Database::open_in_memory("qub_").unwrap();
//! db.tenant.set_site_id(1);
//! db.connection().execute_batch("create table qub_post (post_id integer, post_title text)").unwrap();
//! let insert = db.prepare(Some("insert into qub_post values (?, ?)"), vec![Param::from(1), Param::from("O'Brien")]).unwrap().unwrap();
//! db.query(&insert).unwrap();
//! let select = db.prepare(Some("select post_title from qub_post where post_id = ?"), vec![Param::from(1)]).unwrap();
//! db.get_results(select.as_ref(), OutputShape::Object).unwrap();
//! assert_eq!(db.get_var(None, 0, 0).unwrap(), Some(rusqlite::types::Value::Text("O'Brien".into())));
//! ```

pub mod binder;
pub mod config;
pub mod database;
pub mod error;
pub mod materialize;
pub mod post;
pub mod prefix;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod server;
pub mod store;
pub mod worker;

pub use error::{QubusError, Result};
