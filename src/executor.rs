use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

use crate::etl::pipeline::{EtlPipeline, PipelineRunResult, RunRequest};
use crate::etl::traits::EtlJob;

/// Errors raised by the executor itself, never by a pipeline stage.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Executor is closed: {0}")]
    Closed(String),

    #[error("Run task aborted: {0}")]
    Join(String),
}

/// Bounds how many pipeline runs may be in flight at once.
///
/// Each run stays strictly sequential inside; the executor only limits how
/// many independent runs overlap.
#[derive(Clone)]
pub struct RunExecutor {
    semaphore: Arc<Semaphore>,
}

impl RunExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    #[instrument(skip(self, pipeline, request), fields(pipeline = %pipeline.name()))]
    pub async fn execute<J>(
        &self,
        pipeline: Arc<EtlPipeline<J>>,
        request: RunRequest,
    ) -> Result<PipelineRunResult, ExecutorError>
    where
        J: EtlJob + 'static,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ExecutorError::Closed(e.to_string()))?;

        info!("Starting run");
        let result = pipeline.run(request).await;
        info!(all_ok = result.all_ok(), "Finished run");
        Ok(result)
    }

    /// Spawns every run and returns the results in input order.
    pub async fn execute_all<J>(
        &self,
        runs: Vec<(Arc<EtlPipeline<J>>, RunRequest)>,
    ) -> Vec<Result<PipelineRunResult, ExecutorError>>
    where
        J: EtlJob + 'static,
    {
        let handles: Vec<_> = runs
            .into_iter()
            .map(|(pipeline, request)| {
                let executor = self.clone();
                tokio::spawn(async move { executor.execute(pipeline, request).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(ExecutorError::Join(e.to_string())),
            });
        }
        results
    }

    /// Refuses any further runs. Runs already holding a permit finish normally.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
