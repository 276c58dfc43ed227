//! Parameterized read queries against the canonical table.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use thiserror::Error;

use crate::etl::schema::{is_identifier, Schema};
use crate::model::{Row, Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Column '{column}' is not part of the '{table}' schema")]
    UnknownColumn { column: String, table: String },

    #[error("Query targets table '{found}', expected '{expected}'")]
    TableMismatch { expected: String, found: String },

    #[error("Query selects no columns")]
    EmptyProjection,

    #[error("Cannot parse filter '{0}': expected <column><op><value> with op one of = != < <= > >=")]
    InvalidFilter(String),
}

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn accepts(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// `column op value` restriction on extracted rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: CmpOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluates the filter against an in-memory row. Null never matches.
    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(v) => compare(v, &self.value).is_some_and(|ord| self.op.accepts(ord)),
            None => false,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.column, self.op.as_sql(), self.value)
    }
}

impl FromStr for Filter {
    type Err = QueryError;

    /// Parses `region=North`, `quantity>=5`, `order_date<2024-02-01`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QueryError::InvalidFilter(s.to_string());
        let start = s.find(['!', '<', '>', '=']).ok_or_else(invalid)?;
        let (column, rest) = s.split_at(start);
        let (op, value) = if let Some(v) = rest.strip_prefix("!=") {
            (CmpOp::Ne, v)
        } else if let Some(v) = rest.strip_prefix("<=") {
            (CmpOp::Le, v)
        } else if let Some(v) = rest.strip_prefix(">=") {
            (CmpOp::Ge, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (CmpOp::Eq, v)
        } else if let Some(v) = rest.strip_prefix('<') {
            (CmpOp::Lt, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (CmpOp::Gt, v)
        } else {
            return Err(invalid());
        };

        let column = column.trim();
        if !is_identifier(column) {
            return Err(invalid());
        }
        Ok(Filter::new(column, op, parse_literal(value.trim())))
    }
}

fn parse_literal(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() {
            return Value::Float(f);
        }
    }
    match s.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Text(s.to_string()),
    }
}

/// Orders two scalars of compatible type. Dates compare with ISO-8601 text.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    use Value::*;
    match (a, b) {
        (Int(x), Int(y)) => Some(x.cmp(y)),
        (Int(x), Float(y)) => (*x as f64).partial_cmp(y),
        (Float(x), Int(y)) => x.partial_cmp(&(*y as f64)),
        (Float(x), Float(y)) => x.partial_cmp(y),
        (Text(x), Text(y)) => Some(x.cmp(y)),
        (Bool(x), Bool(y)) => Some(x.cmp(y)),
        (Date(x), Date(y)) => Some(x.cmp(y)),
        (DateTime(x), DateTime(y)) => Some(x.cmp(y)),
        (Date(x), DateTime(y)) => x.and_hms_opt(0, 0, 0).map(|x| x.cmp(y)),
        (DateTime(x), Date(y)) => y.and_hms_opt(0, 0, 0).map(|y| x.cmp(&y)),
        (Date(x), Text(y)) => NaiveDate::from_str(y).ok().map(|y| x.cmp(&y)),
        (Text(x), Date(y)) => NaiveDate::from_str(x).ok().map(|x| x.cmp(y)),
        _ => None,
    }
}

/// A read against one table: projection, conjunctive filters and a row limit.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub limit: Option<u64>,
}

impl SelectQuery {
    /// All canonical columns of the canonical table, unfiltered.
    pub fn all(schema: &Schema) -> Self {
        Self {
            table: schema.table.clone(),
            columns: schema
                .canonical_columns()
                .into_iter()
                .map(str::to_string)
                .collect(),
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Rejects any reference outside the canonical schema.
    pub fn validate(&self, schema: &Schema) -> Result<(), QueryError> {
        if self.table != schema.table {
            return Err(QueryError::TableMismatch {
                expected: schema.table.clone(),
                found: self.table.clone(),
            });
        }
        if self.columns.is_empty() {
            return Err(QueryError::EmptyProjection);
        }
        let referenced = self
            .columns
            .iter()
            .chain(self.filters.iter().map(|f| &f.column));
        for column in referenced {
            if !schema.has_column(column) {
                return Err(QueryError::UnknownColumn {
                    column: column.clone(),
                    table: schema.table.clone(),
                });
            }
        }
        Ok(())
    }

    /// Renders the statement with `?` placeholders and the values to bind.
    ///
    /// Identifiers are quoted; callers validate them first via [`Self::validate`].
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let projection = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {} FROM {}", projection, quote_ident(&self.table));

        let mut params = Vec::with_capacity(self.filters.len());
        if !self.filters.is_empty() {
            let predicates = self
                .filters
                .iter()
                .map(|f| {
                    params.push(f.value.clone());
                    format!("{} {} ?", quote_ident(&f.column), f.op.as_sql())
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(" WHERE ");
            sql.push_str(&predicates);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        (sql, params)
    }

    /// Applies filters, projection and limit to in-memory rows.
    pub fn apply(&self, rows: &[Row]) -> Vec<Row> {
        let limit = self.limit.map_or(usize::MAX, |l| l as usize);
        rows.iter()
            .filter(|row| self.filters.iter().all(|f| f.matches(row)))
            .take(limit)
            .map(|row| {
                self.columns
                    .iter()
                    .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                    .collect()
            })
            .collect()
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
