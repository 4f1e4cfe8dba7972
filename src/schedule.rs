//! When is a job due?
//!
//! A schedule is one of
//! * a predicate closure,
//! * a literal `YYYY-MM-DD HH:MM:SS` timestamp, due during that minute, or
//! * a five field cron expression (`minute hour day-of-month month day-of-week`).
//!
//! Cron fields accept `*`, single values, ranges `a-b`, steps `*/n` and `a-b/n`,
//! and comma separated lists of those. Months and weekdays may be written as
//! three letter names, and weekday `7` is Sunday like `0`. When both day fields
//! are restricted a day matches if either one does, as in classic cron.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Datelike, NaiveDateTime, Timelike};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{QubusError, Result};

lazy_static! {
    static ref TIMESTAMP: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$").unwrap();
}

const MONTHS: [&str; 12] = ["JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC"];
const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

// ------------- Field -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    any: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1u64 << value) != 0
    }
}

fn parse_value(token: &str, min: u32, max: u32, names: &[&str], offset: u32) -> Result<u32> {
    let upper = token.to_ascii_uppercase();
    if let Some(index) = names.iter().position(|name| *name == upper) {
        return Ok(index as u32 + offset);
    }
    let value: u32 = token
        .parse()
        .map_err(|_| QubusError::Schedule(format!("invalid cron value '{token}'")))?;
    if value < min || value > max {
        return Err(QubusError::Schedule(format!("cron value {value} outside {min}-{max}")));
    }
    Ok(value)
}

fn parse_field(text: &str, min: u32, max: u32, names: &[&str], offset: u32) -> Result<Field> {
    let mut bits = 0u64;
    let any = text == "*" || text == "?";
    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| QubusError::Schedule(format!("invalid cron step '{step}'")))?;
                if step == 0 {
                    return Err(QubusError::Schedule(String::from("cron step must be positive")));
                }
                (range, step)
            }
            None => (part, 1),
        };
        let (start, end) = if range == "*" || range == "?" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, min, max, names, offset)?, parse_value(b, min, max, names, offset)?)
        } else {
            let start = parse_value(range, min, max, names, offset)?;
            // `5/15` runs from 5 to the end of the field
            (start, if part.contains('/') { max } else { start })
        };
        if start > end {
            return Err(QubusError::Schedule(format!("descending cron range '{range}'")));
        }
        for value in (start..=end).step_by(step as usize) {
            bits |= 1u64 << value;
        }
    }
    Ok(Field { bits, any })
}

// ------------- CronExpression -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl FromStr for CronExpression {
    type Err = QubusError;
    fn from_str(expression: &str) -> Result<Self> {
        let expanded = match expression.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(QubusError::Schedule(format!(
                "cron expression '{expression}' must have five fields"
            )));
        }
        let mut day_of_week = parse_field(fields[4], 0, 7, &WEEKDAYS, 0)?;
        if day_of_week.contains(7) {
            day_of_week.bits = (day_of_week.bits & !(1u64 << 7)) | 1;
        }
        Ok(Self {
            source: expression.trim().to_string(),
            minute: parse_field(fields[0], 0, 59, &[], 0)?,
            hour: parse_field(fields[1], 0, 23, &[], 0)?,
            day_of_month: parse_field(fields[2], 1, 31, &[], 0)?,
            month: parse_field(fields[3], 1, 12, &MONTHS, 1)?,
            day_of_week,
        })
    }
}

impl CronExpression {
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        let dom = self.day_of_month.contains(now.day());
        let dow = self.day_of_week.contains(now.weekday().num_days_from_sunday());
        let day = if self.day_of_month.any || self.day_of_week.any {
            dom && dow
        } else {
            dom || dow
        };
        self.minute.contains(now.minute())
            && self.hour.contains(now.hour())
            && self.month.contains(now.month())
            && day
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

// ------------- Schedule -------------
pub type DuePredicate = Arc<dyn Fn(NaiveDateTime) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Schedule {
    Predicate(DuePredicate),
    At(NaiveDateTime),
    Cron(CronExpression),
}

impl Schedule {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(NaiveDateTime) -> bool + Send + Sync + 'static,
    {
        Schedule::Predicate(Arc::new(f))
    }
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        match self {
            Schedule::Predicate(predicate) => predicate(now),
            Schedule::At(at) => {
                at.format("%Y-%m-%d %H:%M").to_string() == now.format("%Y-%m-%d %H:%M").to_string()
            }
            Schedule::Cron(cron) => cron.is_due(now),
        }
    }
}

impl FromStr for Schedule {
    type Err = QubusError;
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if TIMESTAMP.is_match(s) {
            let at = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map_err(|e| QubusError::Schedule(format!("invalid timestamp '{s}': {e}")))?;
            return Ok(Schedule::At(at));
        }
        Ok(Schedule::Cron(s.parse()?))
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Schedule::Predicate(_) => write!(f, "Schedule::Predicate(..)"),
            Schedule::At(at) => write!(f, "Schedule::At({at})"),
            Schedule::Cron(cron) => write!(f, "Schedule::Cron({cron})"),
        }
    }
}
