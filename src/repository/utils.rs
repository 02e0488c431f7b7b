//! Helpers for `handle_options` implementations: search, date and
//! relation filters built from request params.

use super::SortSpec;
use crate::arrays::id_text;
use crate::error::AppError;
use crate::sql::{Condition, Direction, Op, Select};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

const DATE: &str = "%Y-%m-%d";
const DATETIME: &str = "%Y-%m-%d %H:%M:%S";
const RANGE_SEPARATOR: &str = " - ";

/// A date param in one of the accepted shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateFilter {
    Date(NaiveDate),
    DateRange(NaiveDate, NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeRange(NaiveDateTime, NaiveDateTime),
}

/// Parses `Y-m-d`, `Y-m-d - Y-m-d`, `Y-m-d H:i:s` and
/// `Y-m-d H:i:s - Y-m-d H:i:s`. Ranges with equal ends collapse to a single value.
pub fn parse_date_filter(raw: &str) -> Option<DateFilter> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, DATE) {
        return Some(DateFilter::Date(d));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, DATETIME) {
        return Some(DateFilter::DateTime(dt));
    }
    let (start, end) = raw.split_once(RANGE_SEPARATOR)?;
    let (start, end) = (start.trim(), end.trim());
    if let (Ok(a), Ok(b)) = (
        NaiveDate::parse_from_str(start, DATE),
        NaiveDate::parse_from_str(end, DATE),
    ) {
        return Some(if a == b {
            DateFilter::Date(a)
        } else {
            DateFilter::DateRange(a, b)
        });
    }
    if let (Ok(a), Ok(b)) = (
        NaiveDateTime::parse_from_str(start, DATETIME),
        NaiveDateTime::parse_from_str(end, DATETIME),
    ) {
        return Some(if a == b {
            DateFilter::DateTime(a)
        } else {
            DateFilter::DateTimeRange(a, b)
        });
    }
    None
}

/// Renders a datetime for binding. With a timezone the value is read as
/// local time there and converted to UTC.
pub fn datetime_param(dt: NaiveDateTime, tz: Option<Tz>) -> Value {
    match tz.and_then(|tz| tz.from_local_datetime(&dt).earliest()) {
        Some(local) => Value::String(
            local
                .with_timezone(&Utc)
                .format("%Y-%m-%d %H:%M:%S+00")
                .to_string(),
        ),
        None => Value::String(dt.format(DATETIME).to_string()),
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::Bool(b) => Some(b.to_string()),
        other => id_text(other),
    }
}

/// `column ILIKE %value%`, OR-ed across `columns`. Missing values are ignored.
pub fn handle_search_input(query: &mut Select, value: Option<&Value>, columns: &[&str]) {
    let Some(text) = value.and_then(scalar_text) else {
        return;
    };
    let pattern = Value::String(format!("%{}%", text));
    match columns {
        [] => {}
        [column] => {
            query.where_op(column, Op::ILike, pattern);
        }
        many => {
            let conds: Vec<Condition> = many
                .iter()
                .map(|c| Condition::new(*c, Op::ILike, pattern.clone()))
                .collect();
            query.where_any(&conds);
        }
    }
}

/// Filters `column` by a date param. Datetimes are converted from `tz`
/// when `use_timezone` is set; unparseable values are ignored.
pub fn handle_date_input(
    query: &mut Select,
    column: &str,
    value: Option<&Value>,
    use_timezone: bool,
    tz: Option<Tz>,
) {
    let Some(raw) = value.and_then(Value::as_str) else {
        return;
    };
    let tz = tz.filter(|_| use_timezone);
    match parse_date_filter(raw) {
        Some(DateFilter::Date(d)) => {
            query.where_date(column, Value::String(d.format(DATE).to_string()));
        }
        Some(DateFilter::DateRange(a, b)) => {
            // Half-open so the whole last day matches, fractional seconds included.
            let from = a.and_hms_opt(0, 0, 0);
            let until = b.succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0));
            if let (Some(from), Some(until)) = (from, until) {
                query
                    .where_op(column, Op::Ge, Value::String(from.format(DATETIME).to_string()))
                    .where_op(column, Op::Lt, Value::String(until.format(DATETIME).to_string()));
            }
        }
        Some(DateFilter::DateTime(dt)) => {
            query.where_eq(column, datetime_param(dt, tz));
        }
        Some(DateFilter::DateTimeRange(a, b)) => {
            query.where_between(column, datetime_param(a, tz), datetime_param(b, tz));
        }
        None => tracing::debug!(column, value = raw, "ignoring unparseable date filter"),
    }
}

/// Keeps rows whose `relation` has a row with `column = value`.
pub fn handle_where_has(
    query: &mut Select,
    relation: &str,
    value: Option<&Value>,
    column: &str,
) -> Result<(), AppError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(());
    };
    query.where_has(relation, &[Condition::eq(column, value.clone())])?;
    Ok(())
}

/// Hands each sort entry with a valid direction to `handler`.
pub fn handle_sort<F>(sort: Option<&[SortSpec]>, mut handler: F)
where
    F: FnMut(&str, Direction),
{
    for s in sort.unwrap_or_default() {
        if let Some(direction) = s.direction() {
            handler(&s.column, direction);
        }
    }
}
