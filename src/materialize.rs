//! Row sets and the shapes they can be rendered in.
//!
//! A [`RowSet`] is what one query execution produced. It is kept on the
//! database handle as the last result so that [`RowSet::var`], [`RowSet::col`]
//! and [`RowSet::row`] can slice it repeatedly without going back to SQLite.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::types::Value;
use serde_json::{Map, Number, Value as Json};

use crate::error::{QubusError, Result};

// ------------- OutputShape -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputShape {
    /// Rows as [`Row`] objects with column-name access.
    #[default]
    Object,
    /// Rows as column-name to value maps, in select-list order.
    ArrayA,
    /// Rows as positional value lists.
    ArrayN,
    /// The whole result as a JSON array of objects.
    Json,
}

impl FromStr for OutputShape {
    type Err = QubusError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OBJECT" => Ok(OutputShape::Object),
            "ARRAY_A" => Ok(OutputShape::ArrayA),
            "ARRAY_N" => Ok(OutputShape::ArrayN),
            "JSON" => Ok(OutputShape::Json),
            other => Err(QubusError::InvalidOutputShape(other.to_string())),
        }
    }
}

impl fmt::Display for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            OutputShape::Object => "OBJECT",
            OutputShape::ArrayA => "ARRAY_A",
            OutputShape::ArrayN => "ARRAY_N",
            OutputShape::Json => "JSON",
        };
        write!(f, "{name}")
    }
}

// ------------- Row -------------
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index)
    }
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn to_map(&self) -> Map<String, Json> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().map(value_to_json))
            .collect()
    }
}

/// A result rendered in one of the [`OutputShape`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Objects(Vec<Row>),
    Assoc(Vec<Map<String, Json>>),
    Numeric(Vec<Vec<Value>>),
    Json(String),
}

impl Output {
    pub fn len(&self) -> usize {
        match self {
            Output::Objects(rows) => rows.len(),
            Output::Assoc(rows) => rows.len(),
            Output::Numeric(rows) => rows.len(),
            Output::Json(text) => serde_json::from_str::<Vec<Json>>(text).map(|v| v.len()).unwrap_or(0),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single row rendered in one of the [`OutputShape`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutput {
    Object(Row),
    Assoc(Map<String, Json>),
    Numeric(Vec<Value>),
    Json(String),
}

pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Integer(i) => Json::Number((*i).into()),
        Value::Real(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::Text(s) => Json::String(s.clone()),
        Value::Blob(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
    }
}

// ------------- RowSet -------------
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns: columns.into(), rows }
    }
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    fn object(&self, y: usize) -> Option<Row> {
        self.rows.get(y).map(|values| Row {
            columns: Arc::clone(&self.columns),
            values: values.clone(),
        })
    }
    pub fn render(&self, shape: OutputShape) -> Result<Output> {
        Ok(match shape {
            OutputShape::Object => Output::Objects((0..self.len()).filter_map(|y| self.object(y)).collect()),
            OutputShape::ArrayA => Output::Assoc(
                (0..self.len())
                    .filter_map(|y| self.object(y))
                    .map(|row| row.to_map())
                    .collect(),
            ),
            OutputShape::ArrayN => Output::Numeric(self.rows.clone()),
            OutputShape::Json => {
                let rows: Vec<Json> = (0..self.len())
                    .filter_map(|y| self.object(y))
                    .map(|row| Json::Object(row.to_map()))
                    .collect();
                Output::Json(serde_json::to_string(&rows)?)
            }
        })
    }
    /// The cell at column `x` of row `y`. SQL NULL reads as `None`.
    pub fn var(&self, x: usize, y: usize) -> Option<Value> {
        match self.rows.get(y)?.get(x)? {
            Value::Null => None,
            value => Some(value.clone()),
        }
    }
    /// Column `x` across every row.
    pub fn col(&self, x: usize) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| row.get(x).cloned().unwrap_or(Value::Null))
            .collect()
    }
    pub fn row(&self, shape: OutputShape, y: usize) -> Result<Option<RowOutput>> {
        let Some(row) = self.object(y) else {
            return Ok(None);
        };
        Ok(Some(match shape {
            OutputShape::Object => RowOutput::Object(row),
            OutputShape::ArrayA => RowOutput::Assoc(row.to_map()),
            OutputShape::ArrayN => RowOutput::Numeric(row.values),
            OutputShape::Json => RowOutput::Json(serde_json::to_string(&Json::Object(row.to_map()))?),
        }))
    }
    pub fn cursor(&self) -> RowCursor<'_> {
        RowCursor { set: self, position: None }
    }
}

// ------------- RowCursor -------------
/// Walks a row set one row at a time. A fresh cursor sits before the first row.
pub struct RowCursor<'r> {
    set: &'r RowSet,
    position: Option<usize>,
}

impl<'r> RowCursor<'r> {
    pub fn reset(&mut self) {
        self.position = None;
    }
    /// Move to the next row; false once the rows are exhausted.
    pub fn advance(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.set.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.set.len());
            false
        }
    }
    pub fn current(&self) -> Option<Row> {
        self.set.object(self.position?)
    }
    pub fn position(&self) -> Option<usize> {
        self.position.filter(|p| *p < self.set.len())
    }
}
