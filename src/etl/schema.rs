//! Column schema for the canonical source table.
//!
//! The raw record set is expected to carry a fixed set of named fields. The
//! [`Schema`] names them, says which are required, and declares the per-row
//! ratios the transformer derives.

use serde::{Deserialize, Serialize};

use crate::etl::traits::SchemaError;
use crate::etl::transform::summary_columns;

/// A per-row ratio derived from two numeric fields.
///
/// Operands may name the quantity column, the unit price column, the primary
/// metric (`Schema::metric_name`), or any of `Schema::extra_numeric_columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioSpec {
    pub name: String,
    pub numerator: String,
    pub denominator: String,
}

impl RatioSpec {
    pub fn new(
        name: impl Into<String>,
        numerator: impl Into<String>,
        denominator: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            numerator: numerator.into(),
            denominator: denominator.into(),
        }
    }
}

/// Named fields of the canonical table and the derived metrics built on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    /// Canonical table read by the default query
    pub table: String,

    /// Record identifier (optional per row)
    pub id_column: String,

    /// Date-like field, normalized to a date/time (optional per row)
    pub date_column: String,

    /// Grouping key (required)
    pub group_column: String,

    /// Quantity field (required)
    pub quantity_column: String,

    /// Unit price field (required)
    pub price_column: String,

    /// Boolean/status flag (required)
    pub flag_column: String,

    /// Additional nullable numeric columns usable as ratio operands
    pub extra_numeric_columns: Vec<String>,

    /// Per-row ratios, aggregated as group means
    pub ratios: Vec<RatioSpec>,

    /// Name of the primary metric, `quantity * unit_price`
    pub metric_name: String,

    /// Noun used for the row count column (`<label>_count`)
    pub record_label: String,

    /// Noun used for the flag rate column (`<label>_rate`)
    pub flag_label: String,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            table: "orders".to_string(),
            id_column: "order_id".to_string(),
            date_column: "order_date".to_string(),
            group_column: "region".to_string(),
            quantity_column: "quantity".to_string(),
            price_column: "unit_price".to_string(),
            flag_column: "is_active".to_string(),
            extra_numeric_columns: Vec::new(),
            ratios: vec![RatioSpec::new("revenue_per_unit", "sales", "quantity")],
            metric_name: "sales".to_string(),
            record_label: "order".to_string(),
            flag_label: "activation".to_string(),
        }
    }
}

impl Schema {
    /// All source columns, in select order.
    pub fn canonical_columns(&self) -> Vec<&str> {
        let mut columns = vec![
            self.id_column.as_str(),
            self.date_column.as_str(),
            self.group_column.as_str(),
            self.quantity_column.as_str(),
            self.price_column.as_str(),
            self.flag_column.as_str(),
        ];
        columns.extend(self.extra_numeric_columns.iter().map(String::as_str));
        columns
    }

    /// Columns a row must carry to survive cleaning.
    pub fn required_columns(&self) -> [&str; 4] {
        [
            self.group_column.as_str(),
            self.flag_column.as_str(),
            self.quantity_column.as_str(),
            self.price_column.as_str(),
        ]
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.canonical_columns().contains(&column)
    }

    /// Fields a ratio may reference.
    pub fn numeric_fields(&self) -> Vec<&str> {
        let mut fields = vec![
            self.quantity_column.as_str(),
            self.price_column.as_str(),
            self.metric_name.as_str(),
        ];
        fields.extend(self.extra_numeric_columns.iter().map(String::as_str));
        fields
    }

    /// Checks identifiers, uniqueness of column names and ratio operands.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !is_identifier(&self.table) {
            return Err(SchemaError::InvalidIdentifier(self.table.clone()));
        }
        let columns = self.canonical_columns();
        for (i, column) in columns.iter().enumerate() {
            if !is_identifier(column) {
                return Err(SchemaError::InvalidIdentifier(column.to_string()));
            }
            if columns[..i].contains(column) {
                return Err(SchemaError::DuplicateColumn(column.to_string()));
            }
        }
        if columns.contains(&self.metric_name.as_str()) {
            return Err(SchemaError::DuplicateColumn(self.metric_name.clone()));
        }

        let fields = self.numeric_fields();
        for ratio in &self.ratios {
            if !is_identifier(&ratio.name) {
                return Err(SchemaError::InvalidIdentifier(ratio.name.clone()));
            }
            for operand in [&ratio.numerator, &ratio.denominator] {
                if !fields.contains(&operand.as_str()) {
                    return Err(SchemaError::UnknownRatioOperand {
                        ratio: ratio.name.clone(),
                        operand: operand.clone(),
                    });
                }
            }
        }

        let summary = summary_columns(self);
        for (i, column) in summary.iter().enumerate() {
            if summary[..i].contains(column) {
                return Err(SchemaError::DuplicateColumn(column.clone()));
            }
        }
        Ok(())
    }
}

/// SQL-safe identifier: ASCII letter or underscore, then letters, digits, underscores.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
