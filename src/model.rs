use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A scalar cell value as returned by a data source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Null and NaN both count as a missing value.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d),
            Value::DateTime(dt) => write!(f, "{}", dt),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One extracted row: column name to scalar value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for fixtures.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// True when the column is absent or holds a missing value.
    pub fn is_missing(&self, column: &str) -> bool {
        self.get(column).map_or(true, Value::is_missing)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row(iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect())
    }
}

/// Unprocessed extraction result. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawRecordSet {
    pub rows: Vec<Row>,
}

impl RawRecordSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One aggregated group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub group: String,
    pub count: usize,
    pub metric_sum: f64,
    pub metric_mean: f64,
    pub quantity_sum: f64,
    /// Mean per declared ratio, `None` when no row in the group had a defined ratio.
    pub ratio_means: Vec<Option<f64>>,
    pub flag_rate: f64,
}

impl SummaryRow {
    /// Cells in the same order as [`SummaryRecordSet::columns`].
    pub fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.group.clone(),
            self.count.to_string(),
            format_number(self.metric_sum),
            format_number(self.metric_mean),
            format_number(self.quantity_sum),
        ];
        cells.extend(
            self.ratio_means
                .iter()
                .map(|r| r.map(format_number).unwrap_or_default()),
        );
        cells.push(format_number(self.flag_rate));
        cells
    }
}

/// Grouped output of the transformation, one row per distinct group key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryRecordSet {
    pub columns: Vec<String>,
    pub rows: Vec<SummaryRow>,
}

impl SummaryRecordSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, group: &str) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.group == group)
    }

    pub fn group_keys(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.group.as_str()).collect()
    }
}

fn format_number(x: f64) -> String {
    format!("{}", x)
}
