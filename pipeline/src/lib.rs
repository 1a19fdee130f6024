//! Run a sequence of task stages inside a single dispatch.
//!
//! A [`Pipeline`] executes its stages in order against every event produced by
//! the previous stage, double-buffering intermediate events in memory instead
//! of routing them through a transport. The last stage writes to the outer
//! response writer, so the pipeline composes with the mux like any other task:
//! fan-out, transform and fan-in happen within one dispatch.
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use once_cell::sync::Lazy;

use taskmesh::Event;
use taskmesh::ResponseWriter;
use taskmesh::Task;
use taskmesh_context::Context;

/// A stage name is already used in the pipeline.
#[derive(Debug, thiserror::Error)]
#[error("a stage named '{0}' is already registered")]
pub struct StageRegistered(String);

impl StageRegistered {
    /// Report the given stage name is already used.
    pub fn new<S: Into<String>>(name: S) -> StageRegistered {
        StageRegistered(name.into())
    }
}

/// The requested stage is not part of the pipeline.
#[derive(Debug, thiserror::Error)]
#[error("undefined pipeline stage")]
pub struct UndefinedStage;

struct Stage {
    name: String,
    task: Arc<dyn Task>,
}

/// Sequence of named stages executed inside one dispatch.
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Start collecting stages.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder { stages: Vec::new() }
    }

    /// Stored stage task by name.
    pub fn task_by_name(&self, name: &str) -> Result<Arc<dyn Task>> {
        self.stages
            .iter()
            .find(|stage| stage.name == name)
            .map(|stage| Arc::clone(&stage.task))
            .ok_or_else(|| UndefinedStage.into())
    }

    /// Stored stage task by position.
    pub fn task_by_index(&self, index: usize) -> Result<Arc<dyn Task>> {
        self.stages
            .get(index)
            .map(|stage| Arc::clone(&stage.task))
            .ok_or_else(|| UndefinedStage.into())
    }
}

#[async_trait::async_trait]
impl Task for Pipeline {
    /// Drain each stage into the next using two swapped event buffers.
    ///
    /// A stage error does not fail the pipeline: the failing event is written
    /// to the outer writer with the error attached and processing continues.
    async fn execute(
        &self,
        context: &Context,
        event: Event,
        writer: ResponseWriter,
    ) -> Result<()> {
        let mut reader = EventBuffer::acquire();
        let mut buffer = EventBuffer::acquire();
        reader.push(event.clone());

        for (index, stage) in self.stages.iter().enumerate() {
            let last = index == self.stages.len() - 1;
            let stage_writer = if last {
                writer.clone()
            } else {
                buffer.writer(&event)
            };
            while let Some(stage_event) = reader.pop() {
                let run = stage
                    .task
                    .execute(context, stage_event.clone(), stage_writer.clone())
                    .await;
                if let Err(error) = run {
                    writer.write_event(stage_event.with_error(&error)).await?;
                }
            }
            std::mem::swap(&mut reader, &mut buffer);
            buffer.reset();
        }

        reader.release();
        buffer.release();
        Ok(())
    }
}

/// Incrementally build a [`Pipeline`].
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    /// Append a stage; an empty name auto-generates `task{N}`.
    pub fn stage<T>(mut self, name: &str, task: T) -> Result<Self>
    where
        T: Task + 'static,
    {
        let name = if name.is_empty() {
            format!("task{}", self.stages.len() + 1)
        } else {
            name.to_string()
        };
        if self.stages.iter().any(|stage| stage.name == name) {
            anyhow::bail!(StageRegistered::new(name));
        }
        self.stages.push(Stage {
            name,
            task: Arc::new(task),
        });
        Ok(self)
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

/// Pool of event vectors shared by pipeline executions.
static BUFFER_POOL: Lazy<Mutex<Vec<Vec<Event>>>> = Lazy::new(|| Mutex::new(Vec::new()));

const BUFFER_POOL_LIMIT: usize = 32;

/// Double-buffered in-memory event queue between stages.
struct EventBuffer {
    events: Arc<Mutex<Vec<Event>>>,
    cursor: usize,
}

impl EventBuffer {
    fn acquire() -> EventBuffer {
        let events = BUFFER_POOL
            .lock()
            .expect("event buffer pool lock poisoned")
            .pop()
            .unwrap_or_default();
        EventBuffer {
            events: Arc::new(Mutex::new(events)),
            cursor: 0,
        }
    }

    /// Writer collecting stage outputs into this buffer.
    ///
    /// Repeats are rejected: within a pipeline there is no stream to resubmit
    /// into, only the forward path to the next stage.
    fn writer(&self, base: &Event) -> ResponseWriter {
        let events = Arc::clone(&self.events);
        ResponseWriter::collector(base.clone(), move |event| {
            events
                .lock()
                .expect("event buffer lock poisoned")
                .push(event);
            Ok(())
        })
    }

    fn push(&mut self, event: Event) {
        self.events
            .lock()
            .expect("event buffer lock poisoned")
            .push(event);
    }

    fn pop(&mut self) -> Option<Event> {
        let events = self.events.lock().expect("event buffer lock poisoned");
        let event = events.get(self.cursor).cloned();
        if event.is_some() {
            self.cursor += 1;
        }
        event
    }

    fn reset(&mut self) {
        self.events
            .lock()
            .expect("event buffer lock poisoned")
            .clear();
        self.cursor = 0;
    }

    fn release(self) {
        let mut events = match Arc::try_unwrap(self.events) {
            Ok(events) => events.into_inner().expect("event buffer lock poisoned"),
            Err(_) => return,
        };
        events.clear();
        let mut pool = BUFFER_POOL
            .lock()
            .expect("event buffer pool lock poisoned");
        if pool.len() < BUFFER_POOL_LIMIT {
            pool.push(events);
        }
    }
}
