use async_trait::async_trait;

use crate::etl::query::SelectQuery;
use crate::model::Row;
use crate::traits::{DataSource, SourceError};

/// Serves a fixed set of rows, evaluating queries in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: Vec<Row>,
}

impl MemorySource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn source_id(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Row>, SourceError> {
        Ok(query.apply(&self.rows))
    }
}
