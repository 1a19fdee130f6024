//! Nodes of the task graph owned by a mux.
use std::sync::Arc;

use crate::Task;
use crate::TaskMux;

/// One node of the task graph: an event name bound to a task, plus edges to
/// the successor events its outputs are published under.
///
/// Promises are frozen when the mux is built; the graph is owned by the mux
/// and edges are looked up by name, so nodes hold no references back into it.
pub struct Promise {
    event_name: String,
    target_event_names: Vec<String>,
    parent: Option<String>,
    anonymous: bool,
    virtual_promise: bool,
    task: Option<Arc<dyn Task>>,
}

impl Promise {
    pub(crate) fn new(
        event_name: String,
        target_event_names: Vec<String>,
        parent: Option<String>,
        anonymous: bool,
        task: Option<Arc<dyn Task>>,
    ) -> Promise {
        Promise {
            event_name,
            target_event_names,
            parent,
            anonymous,
            virtual_promise: task.is_none(),
            task,
        }
    }

    /// Event name this node consumes.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Explicitly declared successor event names.
    pub fn explicit_targets(&self) -> &[String] {
        &self.target_event_names
    }

    /// Name of the parent node for chained registrations.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// True for auto-named nodes created by chaining.
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// True for placeholders of events produced outside this process.
    ///
    /// Virtual promises carry targets but cannot be executed.
    pub fn is_virtual(&self) -> bool {
        self.virtual_promise
    }

    pub(crate) fn task(&self) -> Option<&Arc<dyn Task>> {
        self.task.as_ref()
    }

    /// Successor event names outputs of this node are published under.
    ///
    /// Resolution is deterministic given the mux graph and the cluster map:
    /// explicit targets win; otherwise external subscribers recorded against
    /// the chain origin (`"@origin"` edges, local or cluster-wide) apply;
    /// otherwise the cluster-known successors of this event name.
    pub fn resolve_targets(&self, mux: &TaskMux) -> Vec<String> {
        if !self.target_event_names.is_empty() {
            return self.target_event_names.clone();
        }

        // Walk up the chain to the origin: the first ancestor that is neither
        // anonymous nor virtual.
        let mut origin = self;
        while origin.anonymous || origin.virtual_promise {
            match origin.parent().and_then(|parent| mux.promise(parent)) {
                Some(parent) => origin = parent,
                None => break,
            }
        }
        if !origin.virtual_promise {
            let external = format!("@{}", origin.event_name);
            if let Some(targets) = mux.hidden_targets(&external) {
                return targets.to_vec();
            }
            let targets = mux.cluster_targets(&external);
            if !targets.is_empty() {
                return targets;
            }
        }

        mux.cluster_targets(&self.event_name)
    }
}
