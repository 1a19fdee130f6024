//! The central dispatcher: a name to task registry with chaining semantics.
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Instant;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;

use taskmesh_context::Context;
use taskmesh_monitor::kvstorage::FAILOVER_TASK_NAME;

use crate::cluster::Cluster;
use crate::error::combine_errors;
use crate::error::ChannelTaken;
use crate::error::TaskPanic;
use crate::error::VirtualPromise;
use crate::response::ProxyResponseFactory;
use crate::response::ResponseWriterFactory;
use crate::response::StreamResponseFactory;
use crate::telemetry;
use crate::Event;
use crate::EventAllocator;
use crate::Message;
use crate::Promise;
use crate::Publisher;
use crate::Receiver;
use crate::ReceiverBackend;
use crate::ResponseWriter;
use crate::Task;

/// Handler invoked when a task panics while executing an event.
pub type PanicHandler = Arc<dyn Fn(&Arc<dyn Task>, &Event, &str) + Send + Sync>;

/// Handler absorbing task execution errors.
pub type ErrorHandler = Arc<dyn Fn(&Arc<dyn Task>, &Event, &anyhow::Error) + Send + Sync>;

/// Transform applied to the dispatch context before a task executes.
pub type ContextWrapper = Arc<dyn Fn(&Context) -> Context + Send + Sync>;

struct PromiseSpec {
    targets: Vec<String>,
    parent: Option<String>,
    anonymous: bool,
    task: Option<Arc<dyn Task>>,
}

impl PromiseSpec {
    fn placeholder() -> PromiseSpec {
        PromiseSpec {
            targets: Vec::new(),
            parent: None,
            anonymous: false,
            task: None,
        }
    }
}

/// Collect task registrations and options, then freeze them into a [`TaskMux`].
///
/// Registration is single-threaded by construction; the built mux is immutable
/// and safe to share across receive threads without synchronisation.
#[derive(Default)]
pub struct TaskMuxBuilder {
    specs: HashMap<String, PromiseSpec>,
    hidden: HashMap<String, Vec<String>>,
    chain_tails: HashMap<String, String>,
    failover: Option<Arc<dyn Task>>,
    panic_handler: Option<PanicHandler>,
    error_handler: Option<ErrorHandler>,
    context_wrapper: Option<ContextWrapper>,
    response_factory: Option<Arc<dyn ResponseWriterFactory>>,
    cluster: Option<Cluster>,
}

impl TaskMuxBuilder {
    /// Register a task for an event name.
    ///
    /// The `"parent>child"` syntax declares that `child` executes after events
    /// named `parent`, possibly produced by another process. A local parent
    /// chains the new node onto the tail of its chain; an unknown parent is
    /// recorded as a virtual placeholder with an external `"@parent"` edge.
    pub fn handle<T>(&mut self, name: &str, task: T) -> Result<PromiseHandle<'_>>
    where
        T: Task + 'static,
    {
        let registered = self.register(name, Arc::new(task), false)?;
        Ok(PromiseHandle {
            builder: self,
            name: registered,
        })
    }

    /// Install the task executed when an event name matches no promise.
    pub fn failover<T>(&mut self, task: T) -> &mut Self
    where
        T: Task + 'static,
    {
        self.failover = Some(Arc::new(task));
        self
    }

    /// Install the handler observing recovered task panics.
    pub fn panic_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<dyn Task>, &Event, &str) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(handler));
        self
    }

    /// Install the handler absorbing task execution errors.
    ///
    /// With a handler installed errors no longer propagate to `receive`
    /// callers, so messages are acknowledged.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<dyn Task>, &Event, &anyhow::Error) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Transform the dispatch context before each execution.
    pub fn context_wrapper<F>(mut self, wrapper: F) -> Self
    where
        F: Fn(&Context) -> Context + Send + Sync + 'static,
    {
        self.context_wrapper = Some(Arc::new(wrapper));
        self
    }

    /// Route task outputs through writers borrowed from this factory.
    ///
    /// Without a factory outputs are dispatched back into the mux in-process.
    pub fn response_factory<F>(mut self, factory: F) -> Self
    where
        F: ResponseWriterFactory + 'static,
    {
        self.response_factory = Some(Arc::new(factory));
        self
    }

    /// Route every task output to a single transport publisher.
    pub fn stream_response_publisher(self, publisher: Publisher) -> Self {
        self.response_factory(StreamResponseFactory::new(publisher))
    }

    /// Synchronise this process task graph with the given cluster.
    pub fn cluster(mut self, cluster: Cluster) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Freeze the registry, register with the cluster and start its sync loop.
    pub async fn build(self, context: Context) -> Result<Arc<TaskMux>> {
        let mut tasks = HashMap::new();
        for (name, spec) in self.specs {
            let promise = Promise::new(
                name.clone(),
                dedup(spec.targets),
                spec.parent,
                spec.anonymous,
                spec.task,
            );
            tasks.insert(name, Arc::new(promise));
        }
        let failover = self.failover.map(|task| {
            Arc::new(Promise::new(
                String::new(),
                Vec::new(),
                None,
                false,
                Some(task),
            ))
        });
        let mut hidden = self.hidden;
        for targets in hidden.values_mut() {
            let deduped = dedup(std::mem::take(targets));
            *targets = deduped;
        }
        let mux = Arc::new_cyclic(|weak| TaskMux {
            weak: weak.clone(),
            context,
            tasks,
            hidden,
            failover,
            panic_handler: self.panic_handler,
            error_handler: self.error_handler,
            context_wrapper: self.context_wrapper,
            response_factory: self.response_factory,
            allocator: EventAllocator::new(),
            cluster: self.cluster,
        });
        if let Some(cluster) = &mux.cluster {
            cluster
                .register_application(&mux.context, mux.task_map())
                .await?;
        }
        Ok(mux)
    }

    fn register(&mut self, name: &str, task: Arc<dyn Task>, anonymous: bool) -> Result<String> {
        let (parent, child) = match name.split_once('>') {
            Some((parent, child)) => (Some(parent.to_string()), child.to_string()),
            None => (None, name.to_string()),
        };
        if let Some(existing) = self.specs.get(&child) {
            if existing.task.is_some() {
                anyhow::bail!(ChannelTaken::new(child));
            }
        }

        let mut parent_link = None;
        if let Some(parent) = parent.filter(|parent| !parent.is_empty()) {
            let parent_is_local = self
                .specs
                .get(&parent)
                .map(|spec| spec.task.is_some())
                .unwrap_or(false);
            if parent_is_local {
                // Chain onto the tail of the parent's chain and record the edge
                // on the tail promise. The parent may name a mid-chain node, so
                // the tail is tracked against the chain origin.
                let origin = self.chain_origin(&parent);
                let tail = self.chain_tail(&origin);
                let spec = self.specs.get_mut(&tail).expect("chain tail spec exists");
                spec.targets.push(child.clone());
                parent_link = Some(tail);
            } else {
                // External parent: virtual placeholder plus an "@parent" edge
                // the cluster projects as an external incoming link.
                let spec = self
                    .specs
                    .entry(parent.clone())
                    .or_insert_with(PromiseSpec::placeholder);
                spec.targets.push(child.clone());
                self.hidden
                    .entry(format!("@{}", parent))
                    .or_default()
                    .push(child.clone());
                parent_link = Some(parent);
            }
        }

        // A virtual placeholder for this name keeps its collected targets.
        let targets = self
            .specs
            .remove(&child)
            .map(|spec| spec.targets)
            .unwrap_or_default();
        self.specs.insert(
            child.clone(),
            PromiseSpec {
                targets,
                parent: parent_link,
                anonymous,
                task: Some(task),
            },
        );
        let origin = self.chain_origin(&child);
        self.chain_tails.insert(origin, child.clone());
        Ok(child)
    }

    fn chain_tail(&self, origin: &str) -> String {
        self.chain_tails
            .get(origin)
            .cloned()
            .unwrap_or_else(|| origin.to_string())
    }

    fn chain_origin(&self, name: &str) -> String {
        let mut current = name;
        while let Some(parent) = self
            .specs
            .get(current)
            .and_then(|spec| spec.parent.as_deref())
        {
            if parent == current {
                break;
            }
            current = parent;
        }
        current.to_string()
    }

    fn origin_of(&self, name: &str) -> (Option<String>, usize) {
        let mut depth = 0;
        let mut current = self
            .specs
            .get(name)
            .and_then(|spec| spec.parent.clone());
        while let Some(parent) = current {
            depth += 1;
            let spec = match self.specs.get(&parent) {
                Some(spec) => spec,
                None => return (None, depth),
            };
            if spec.parent.is_none() {
                return (Some(parent), depth + 1);
            }
            current = spec.parent.clone();
        }
        (None, depth)
    }

    fn generated_child_name(&self, name: &str) -> String {
        if let Some(target) = self
            .specs
            .get(name)
            .and_then(|spec| spec.targets.first())
        {
            return target.clone();
        }
        match self.origin_of(name) {
            (Some(origin), depth) if depth > 1 => format!("{}.{}", origin, depth),
            _ => format!("{}.1", name),
        }
    }
}

/// Handle over a registered promise, used to extend its chain.
pub struct PromiseHandle<'a> {
    builder: &'a mut TaskMuxBuilder,
    name: String,
}

impl<'a> PromiseHandle<'a> {
    /// Event name of the underlying promise.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Chain a task to execute on the outputs of this promise.
    ///
    /// The child consumes an auto-generated event name (`{origin}.{depth}`)
    /// recorded as this promise's target.
    pub fn then<T>(self, task: T) -> Result<PromiseHandle<'a>>
    where
        T: Task + 'static,
    {
        let spec = self
            .builder
            .specs
            .get(&self.name)
            .expect("handles reference registered specs");
        if spec.task.is_none() {
            anyhow::bail!(VirtualPromise::new(self.name));
        }
        let child = self.builder.generated_child_name(&self.name);
        let registration = format!("{}>{}", self.name, child);
        let registered = self.builder.register(&registration, Arc::new(task), true)?;
        Ok(PromiseHandle {
            builder: self.builder,
            name: registered,
        })
    }

    /// Declare an explicit target event name for this promise's outputs.
    pub fn then_event(self, name: &str) -> PromiseHandle<'a> {
        let spec = self
            .builder
            .specs
            .get_mut(&self.name)
            .expect("handles reference registered specs");
        spec.targets.push(name.to_string());
        self
    }
}

/// Dispatcher routing received events to the tasks registered for their name.
pub struct TaskMux {
    weak: Weak<TaskMux>,
    context: Context,
    tasks: HashMap<String, Arc<Promise>>,
    hidden: HashMap<String, Vec<String>>,
    failover: Option<Arc<Promise>>,
    panic_handler: Option<PanicHandler>,
    error_handler: Option<ErrorHandler>,
    context_wrapper: Option<ContextWrapper>,
    response_factory: Option<Arc<dyn ResponseWriterFactory>>,
    allocator: EventAllocator,
    cluster: Option<Cluster>,
}

impl TaskMux {
    /// Start collecting registrations for a new mux.
    pub fn builder() -> TaskMuxBuilder {
        TaskMuxBuilder::default()
    }

    /// The root context the mux was built with.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The cluster this mux synchronises with, when configured.
    pub fn cluster(&self) -> Option<&Cluster> {
        self.cluster.as_ref()
    }

    /// Registered promise for an event name.
    pub fn promise(&self, name: &str) -> Option<&Promise> {
        self.tasks.get(name).map(|promise| promise.as_ref())
    }

    /// Receiver dispatching transport messages into this mux.
    pub fn receiver(&self) -> Receiver {
        let mux = self.weak.upgrade().expect("receiver of a live mux");
        Receiver::from(MuxReceiver { mux })
    }

    /// Decode a message, dispatch its event and acknowledge on success.
    ///
    /// Undecodable bodies are reported to the cluster as synthetic error
    /// events and returned without acknowledging the message. Task errors
    /// propagate (leaving the message unacknowledged) unless an error handler
    /// absorbs them.
    pub async fn receive(&self, message: &dyn Message) -> Result<()> {
        telemetry::RECEIVE_COUNT.inc();
        let event = match self.allocator.decode(message) {
            Ok(event) => event,
            Err(error) => {
                telemetry::RECEIVE_ERR.inc();
                self.report_receive(None, Some(&error)).await;
                return Err(error);
            }
        };
        self.report_receive(Some(&event), None).await;
        let result = self.execute_event(event.clone()).await;
        self.allocator.release(event);
        result?;
        message.ack().await
    }

    /// Dispatch one event to the promise registered for its name.
    ///
    /// Unmapped events fall back to the failover task, or are silently
    /// dropped when none is installed. Panics are recovered, forwarded to the
    /// panic handler and reported to the cluster as errors.
    pub fn execute_event(&self, event: Event) -> BoxFuture<'static, Result<()>> {
        let mux = self.weak.upgrade().expect("dispatch on a live mux");
        Box::pin(async move { mux.execute_event_inner(event).await })
    }

    async fn execute_event_inner(self: Arc<TaskMux>, event: Event) -> Result<()> {
        let lookup = self
            .tasks
            .get(event.name())
            .filter(|promise| !promise.is_virtual());
        let (promise, is_failover) = match lookup {
            Some(promise) => (Arc::clone(promise), false),
            None => match &self.failover {
                Some(promise) => (Arc::clone(promise), true),
                None => return Ok(()),
            },
        };
        let task = Arc::clone(promise.task().expect("non-virtual promises carry a task"));
        let label = if is_failover {
            FAILOVER_TASK_NAME
        } else {
            event.name()
        };
        telemetry::EXEC_COUNT.with_label_values(&[label]).inc();

        let context = self.exec_context(&event);
        let writer = self.borrow_writer(&context, &promise, &event);
        let start = Instant::now();
        let result = AssertUnwindSafe(task.execute(&context, event.clone(), writer.clone()))
            .catch_unwind()
            .await;
        let elapsed = start.elapsed();
        let mut panicked = false;
        let result = match result {
            Ok(result) => result,
            Err(payload) => {
                panicked = true;
                let info = panic_message(payload);
                slog::error!(
                    context.logger, "Task panicked while executing event";
                    "panic" => &info,
                );
                if let Some(handler) = &self.panic_handler {
                    handler(&task, &event, &info);
                }
                Err(TaskPanic::new(info).into())
            }
        };
        if result.is_err() {
            telemetry::EXEC_ERR.with_label_values(&[label]).inc();
        }
        telemetry::EXEC_DURATION
            .with_label_values(&[label])
            .observe(elapsed.as_secs_f64());

        if let Some(cluster) = &self.cluster {
            let report = cluster
                .exec_event(
                    &context,
                    is_failover,
                    Some(&event),
                    elapsed,
                    result.as_ref().err(),
                )
                .await;
            if let Err(error) = report {
                slog::warn!(
                    context.logger, "Failed to update cluster execution metrics";
                    "error" => %error,
                );
            }
        }
        if let Err(error) = writer.release() {
            slog::warn!(context.logger, "Failed to release response writer"; "error" => %error);
        }

        match result {
            Ok(()) => Ok(()),
            // Recovered panics already went to the panic handler.
            Err(error) if panicked => Err(error),
            Err(error) => match &self.error_handler {
                Some(handler) => {
                    handler(&task, &event, &error);
                    Ok(())
                }
                None => Err(error),
            },
        }
    }

    /// Projection of the task graph published to the cluster.
    ///
    /// Local promises map to their explicit targets; external `"@parent"`
    /// edges are included verbatim.
    pub fn task_map(&self) -> HashMap<String, Vec<String>> {
        let mut map = HashMap::new();
        for (name, promise) in &self.tasks {
            if promise.is_virtual() {
                continue;
            }
            map.insert(name.clone(), promise.explicit_targets().to_vec());
        }
        for (name, targets) in &self.hidden {
            let entry: &mut Vec<String> = map.entry(name.clone()).or_default();
            for target in targets {
                if !entry.contains(target) {
                    entry.push(target.clone());
                }
            }
        }
        map
    }

    /// Tasks reachable from the event's traversed chain, and the subset the
    /// chain already completed.
    pub fn complete_tasks(&self, event: &Event) -> (Vec<String>, Vec<String>) {
        let map = self.task_map();
        let mut stack: Vec<String> = event.done_tasks().to_vec();
        stack.push(event.name().to_string());
        let mut seen = HashSet::new();
        let mut total = BTreeSet::new();
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if map.contains_key(&name) {
                total.insert(name.clone());
            }
            for key in [name.clone(), format!("@{}", name)] {
                if let Some(targets) = map.get(&key) {
                    stack.extend(targets.iter().cloned());
                }
            }
        }
        let done: Vec<String> = total
            .iter()
            .filter(|name| event.done_tasks().contains(*name))
            .cloned()
            .collect();
        (total.into_iter().collect(), done)
    }

    /// Deregister from the cluster and close every registered task.
    pub async fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Some(cluster) = &self.cluster {
            if let Err(error) = cluster.unregister_application(&self.context).await {
                errors.push(error);
            }
        }
        let failover = self.failover.iter();
        for promise in self.tasks.values().chain(failover) {
            if let Some(task) = promise.task() {
                if let Err(error) = task.close().await {
                    errors.push(error);
                }
            }
        }
        combine_errors(errors)
    }

    pub(crate) fn hidden_targets(&self, key: &str) -> Option<&[String]> {
        self.hidden.get(key).map(Vec::as_slice)
    }

    pub(crate) fn cluster_targets(&self, name: &str) -> Vec<String> {
        self.cluster
            .as_ref()
            .map(|cluster| cluster.target_events_after(name))
            .unwrap_or_default()
    }

    fn exec_context(&self, event: &Event) -> Context {
        let context = self.context.for_event(event.id().to_string(), event.name());
        match &self.context_wrapper {
            Some(wrapper) => wrapper(&context),
            None => context,
        }
    }

    fn borrow_writer(
        &self,
        context: &Context,
        promise: &Arc<Promise>,
        event: &Event,
    ) -> ResponseWriter {
        let mux = self.weak.upgrade().expect("dispatch on a live mux");
        match &self.response_factory {
            Some(factory) => factory.borrow(context, &mux, promise, event),
            None => ProxyResponseFactory::new().borrow(context, &mux, promise, event),
        }
    }

    async fn report_receive(&self, event: Option<&Event>, error: Option<&anyhow::Error>) {
        let cluster = match &self.cluster {
            Some(cluster) => cluster,
            None => return,
        };
        if let Err(report) = cluster.receive_event(&self.context, event, error).await {
            slog::warn!(
                self.context.logger, "Failed to update cluster receive metrics";
                "error" => %report,
            );
        }
    }
}

struct MuxReceiver {
    mux: Arc<TaskMux>,
}

#[async_trait::async_trait]
impl ReceiverBackend for MuxReceiver {
    async fn receive(&self, message: &dyn Message) -> Result<()> {
        self.mux.receive(message).await
    }
}

fn dedup(targets: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
