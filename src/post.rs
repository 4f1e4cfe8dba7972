//! Posts with typed columns and explicit metadata lookup.
//!
//! Known `post` columns are fields of [`Post`]. Anything else a plugin stores
//! about a post lives in `postmeta` and is read with [`Post::get_meta`].

use std::collections::BTreeMap;

use rusqlite::types::Value;

use crate::binder::Param;
use crate::database::Database;
use crate::error::{QubusError, Result};
use crate::materialize::{Output, OutputShape, Row};

const COLUMNS: &str = "post_id, post_title, post_slug, post_content, post_author, post_posttype, post_status, post_created";

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub author: i64,
    pub posttype: String,
    pub status: String,
    pub created: Option<String>,
}

fn text(row: &Row, column: &str) -> Result<Option<String>> {
    match row.get(column) {
        Some(Value::Text(s)) => Ok(Some(s.clone())),
        Some(Value::Null) => Ok(None),
        Some(Value::Integer(i)) => Ok(Some(i.to_string())),
        Some(Value::Real(f)) => Ok(Some(f.to_string())),
        Some(Value::Blob(_)) => Err(QubusError::InvalidQuery(format!("column {column} holds a blob"))),
        None => Err(QubusError::InvalidQuery(format!("post row without {column}"))),
    }
}

fn integer(row: &Row, column: &str) -> Result<i64> {
    match row.get(column) {
        Some(Value::Integer(i)) => Ok(*i),
        Some(Value::Null) => Ok(0),
        _ => Err(QubusError::InvalidQuery(format!("column {column} is not an integer"))),
    }
}

impl Post {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: integer(row, "post_id")?,
            title: text(row, "post_title")?.unwrap_or_default(),
            slug: text(row, "post_slug")?.unwrap_or_default(),
            content: text(row, "post_content")?.unwrap_or_default(),
            author: integer(row, "post_author")?,
            posttype: text(row, "post_posttype")?.unwrap_or_default(),
            status: text(row, "post_status")?.unwrap_or_default(),
            created: text(row, "post_created")?,
        })
    }

    pub fn find(database: &mut Database, id: i64) -> Result<Option<Self>> {
        let template = format!("select {COLUMNS} from {} where post_id = ?", database.table("post")?);
        let query = database.prepare(Some(&template), vec![Param::from(id)])?;
        match database.get_results(query.as_ref(), OutputShape::Object)? {
            Some(Output::Objects(rows)) => rows.first().map(Self::from_row).transpose(),
            _ => Ok(None),
        }
    }

    /// Posts of one post type, newest id first.
    pub fn of_type(database: &mut Database, posttype: &str) -> Result<Vec<Self>> {
        let template = format!(
            "select {COLUMNS} from {} where post_posttype = ? order by post_id desc",
            database.table("post")?
        );
        let query = database.prepare(Some(&template), vec![Param::from(posttype)])?;
        match database.get_results(query.as_ref(), OutputShape::Object)? {
            Some(Output::Objects(rows)) => rows.iter().map(Self::from_row).collect(),
            _ => Ok(Vec::new()),
        }
    }

    /// A metadata value of this post; the first one when the key repeats.
    pub fn get_meta(&self, database: &mut Database, key: &str) -> Result<Option<String>> {
        let template = format!(
            "select meta_value from {} where post_id = ? and meta_key = ? order by meta_id limit 1",
            database.table("postmeta")?
        );
        let query = database.prepare(Some(&template), vec![Param::from(self.id), Param::from(key)])?;
        match database.get_var(query.as_ref(), 0, 0)? {
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(Value::Integer(i)) => Ok(Some(i.to_string())),
            Some(Value::Real(f)) => Ok(Some(f.to_string())),
            _ => Ok(None),
        }
    }

    /// Every metadata pair of this post.
    pub fn meta(&self, database: &mut Database) -> Result<BTreeMap<String, String>> {
        let template = format!(
            "select meta_key, meta_value from {} where post_id = ? order by meta_id",
            database.table("postmeta")?
        );
        let query = database.prepare(Some(&template), vec![Param::from(self.id)])?;
        let mut meta = BTreeMap::new();
        if let Some(Output::Objects(rows)) = database.get_results(query.as_ref(), OutputShape::Object)? {
            for row in &rows {
                if let (Some(key), Some(value)) = (text(row, "meta_key")?, text(row, "meta_value")?) {
                    meta.entry(key).or_insert(value);
                }
            }
        }
        Ok(meta)
    }
}
