use tracing::{info, instrument, warn};

use crate::etl::query::SelectQuery;
use crate::etl::schema::Schema;
use crate::etl::traits::ExtractError;
use crate::model::RawRecordSet;
use crate::traits::DataSource;

/// Issues one validated read against a [`DataSource`].
pub struct Extractor<S> {
    source: S,
    schema: Schema,
}

impl<S: DataSource> Extractor<S> {
    pub fn new(source: S, schema: Schema) -> Self {
        Self { source, schema }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Runs `query`, or the default select-all when `None`.
    ///
    /// Zero rows is a valid outcome. Source failures come back as
    /// [`ExtractError::Source`] and never escape as a panic.
    #[instrument(skip(self, query), fields(source = %self.source.source_id(), table = %self.schema.table))]
    pub async fn extract(&self, query: Option<&SelectQuery>) -> Result<RawRecordSet, ExtractError> {
        let default_query;
        let query = match query {
            Some(q) => q,
            None => {
                default_query = SelectQuery::all(&self.schema);
                &default_query
            }
        };
        query.validate(&self.schema)?;

        let rows = self.source.fetch(query).await.map_err(|e| {
            warn!(error = %e, "Extraction failed");
            e
        })?;

        info!(rows = rows.len(), filters = query.filters.len(), "Extraction completed");
        Ok(RawRecordSet::new(rows))
    }
}
