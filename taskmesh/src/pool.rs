//! Bounded concurrent execution wrapper for tasks.
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt;
use tokio::sync::Semaphore;

use taskmesh_context::Context;

use crate::conf::AsyncConf;
use crate::error::TaskPanic;
use crate::Event;
use crate::ResponseWriter;
use crate::Task;

/// Handler observing errors and recovered panics from pooled executions.
pub type RecoverHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Decouple event receipt from execution with a bounded worker pool.
///
/// `execute` hands the event to the pool and returns immediately; the wrapped
/// task runs on a worker with panic recovery. Execution errors never reach the
/// dispatching mux; they are signalled to the recover handler on the worker
/// result path instead.
pub struct AsyncTask {
    task: Arc<dyn Task>,
    workers: Arc<Semaphore>,
    concurrency: usize,
    recover: Option<RecoverHandler>,
}

impl AsyncTask {
    /// Wrap a task in a pool bounded by the conf.
    pub fn wrap<T>(task: T, conf: AsyncConf) -> AsyncTask
    where
        T: Task + 'static,
    {
        let concurrency = conf.concurrency();
        AsyncTask {
            task: Arc::new(task),
            workers: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            recover: None,
        }
    }

    /// Install the handler invoked with worker errors and recovered panics.
    pub fn recover_handler<F>(mut self, handler: F) -> AsyncTask
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        self.recover = Some(Arc::new(handler));
        self
    }
}

#[async_trait::async_trait]
impl Task for AsyncTask {
    /// Enqueue the event and return without waiting for execution.
    ///
    /// The only wait is for a worker slot when the pool is saturated; the
    /// writer is released once the pooled execution finishes.
    async fn execute(
        &self,
        context: &Context,
        event: Event,
        writer: ResponseWriter,
    ) -> Result<()> {
        let permit = Arc::clone(&self.workers).acquire_owned().await?;
        let task = Arc::clone(&self.task);
        let recover = self.recover.clone();
        let context = context.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(task.execute(&context, event, writer.clone()))
                .catch_unwind()
                .await;
            let result = match result {
                Ok(result) => result,
                Err(payload) => {
                    let info = match payload.downcast_ref::<&str>() {
                        Some(message) => (*message).to_string(),
                        None => payload
                            .downcast_ref::<String>()
                            .cloned()
                            .unwrap_or_else(|| "opaque panic payload".to_string()),
                    };
                    Err(TaskPanic::new(info).into())
                }
            };
            if let Err(error) = result {
                match &recover {
                    Some(handler) => handler(&error),
                    None => slog::warn!(
                        context.logger, "Pooled task execution failed";
                        "error" => %error,
                    ),
                }
            }
            if let Err(error) = writer.release() {
                slog::warn!(context.logger, "Failed to release response writer"; "error" => %error);
            }
            drop(permit);
        });
        Ok(())
    }

    /// Wait for in-flight executions to drain, then stop accepting work.
    async fn close(&self) -> Result<()> {
        let drained = self.workers.acquire_many(self.concurrency as u32).await?;
        drained.forget();
        self.workers.close();
        Ok(())
    }
}
