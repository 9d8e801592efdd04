//! # RouteDEM TaskGraph
//!
//! Dependency-ordered execution of named tasks. A model run registers its
//! work as closures with explicit dependencies, closes the graph, and joins:
//!
//! ```
//! use routedem_taskgraph::TaskGraph;
//!
//! let mut graph = TaskGraph::new(-1);
//! let fill = graph.add_task("fill", &[], || Ok(())).unwrap();
//! graph.add_task("flow dir", &[fill], || Ok(())).unwrap();
//! graph.close();
//! graph.join().unwrap();
//! ```
//!
//! With `n_workers <= 0` every task runs on the joining thread in
//! topological order, which keeps runs deterministic. With `n_workers >= 1`
//! ready tasks are handed to that many worker threads over channels; the
//! first failure stops dispatch of not-yet-started tasks while running ones
//! drain.

use crossbeam_channel::unbounded;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of one task closure
pub type TaskResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type TaskFn = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

/// Handle to a registered task, used to declare dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(NodeIndex);

/// Errors from graph construction and execution
#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot add task '{0}': the graph is closed")]
    GraphClosed(String),

    #[error("Task '{name}' names a dependency that is not in the graph")]
    UnknownDependency { name: String },

    #[error("Task '{name}' failed: {source}")]
    TaskFailed {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

struct TaskNode {
    name: String,
    work: Option<TaskFn>,
}

/// A DAG of named tasks with a fixed worker budget.
///
/// Tasks only ever depend on previously added tasks, so the graph is
/// acyclic by construction.
pub struct TaskGraph {
    graph: StableDiGraph<TaskNode, ()>,
    n_workers: i32,
    closed: bool,
}

impl TaskGraph {
    /// Create a graph that will execute with `n_workers` threads.
    ///
    /// Any value below 1 (conventionally -1) selects synchronous execution
    /// on the thread that calls [`join`](TaskGraph::join).
    pub fn new(n_workers: i32) -> Self {
        Self {
            graph: StableDiGraph::new(),
            n_workers,
            closed: false,
        }
    }

    /// Register a task that runs after all of `dependencies`.
    pub fn add_task<F>(
        &mut self,
        name: impl Into<String>,
        dependencies: &[TaskId],
        work: F,
    ) -> Result<TaskId>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let name = name.into();
        if self.closed {
            return Err(Error::GraphClosed(name));
        }
        for dep in dependencies {
            if !self.graph.contains_node(dep.0) {
                return Err(Error::UnknownDependency { name });
            }
        }

        let idx = self.graph.add_node(TaskNode {
            name,
            work: Some(Box::new(work)),
        });
        for dep in dependencies {
            self.graph.add_edge(dep.0, idx, ());
        }
        Ok(TaskId(idx))
    }

    /// Stop accepting tasks
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Execute every task and wait for completion.
    ///
    /// Returns the first failure, annotated with the task's name. Tasks
    /// whose dependencies did not complete never start.
    pub fn join(mut self) -> Result<()> {
        self.closed = true;

        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                let degree = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count();
                (idx, degree)
            })
            .collect();

        let mut ready: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx] == 0)
            .collect();

        if self.n_workers < 1 {
            self.join_synchronous(&mut in_degree, &mut ready)
        } else {
            self.join_parallel(&mut in_degree, &mut ready)
        }
    }

    fn join_synchronous(
        &mut self,
        in_degree: &mut HashMap<NodeIndex, usize>,
        ready: &mut VecDeque<NodeIndex>,
    ) -> Result<()> {
        while let Some(idx) = ready.pop_front() {
            let (name, work) = match self.graph.node_weight_mut(idx) {
                Some(node) => (node.name.clone(), node.work.take()),
                None => continue,
            };
            if let Some(work) = work {
                debug!(task = %name, "task started");
                work().map_err(|e| Error::TaskFailed {
                    name: name.clone(),
                    source: e,
                })?;
                debug!(task = %name, "task finished");
            }
            // Neighbor lists run newest edge first; reverse so tasks
            // become ready in insertion order
            let successors: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .collect();
            for succ in successors.into_iter().rev() {
                if let Some(degree) = in_degree.get_mut(&succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(succ);
                    }
                }
            }
        }
        Ok(())
    }

    fn join_parallel(
        &mut self,
        in_degree: &mut HashMap<NodeIndex, usize>,
        ready: &mut VecDeque<NodeIndex>,
    ) -> Result<()> {
        let workers = self.n_workers as usize;
        let (task_tx, task_rx) = unbounded::<(NodeIndex, String, TaskFn)>();
        let (done_tx, done_rx) = unbounded::<(NodeIndex, TaskResult)>();

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let done_tx = done_tx.clone();
            handles.push(std::thread::spawn(move || {
                while let Ok((idx, name, work)) = task_rx.recv() {
                    debug!(task = %name, "task started");
                    let result = catch_unwind(AssertUnwindSafe(work))
                        .unwrap_or_else(|_| Err(format!("task '{}' panicked", name).into()));
                    let _ = done_tx.send((idx, result));
                }
            }));
        }
        drop(task_rx);
        drop(done_tx);

        let mut in_flight = 0usize;
        let mut aborted = false;
        let mut first_failure: Option<Error> = None;

        loop {
            if aborted {
                ready.clear();
            }
            while let Some(idx) = ready.pop_front() {
                if let Some(node) = self.graph.node_weight_mut(idx) {
                    if let Some(work) = node.work.take() {
                        if task_tx.send((idx, node.name.clone(), work)).is_ok() {
                            in_flight += 1;
                        }
                    }
                }
            }

            if in_flight == 0 {
                break;
            }

            match done_rx.recv() {
                Ok((idx, result)) => {
                    in_flight -= 1;
                    match result {
                        Ok(()) => {
                            let successors: Vec<NodeIndex> = self
                                .graph
                                .neighbors_directed(idx, Direction::Outgoing)
                                .collect();
                            for succ in successors.into_iter().rev() {
                                if let Some(degree) = in_degree.get_mut(&succ) {
                                    *degree -= 1;
                                    if *degree == 0 {
                                        ready.push_back(succ);
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            if first_failure.is_none() {
                                let name = self
                                    .graph
                                    .node_weight(idx)
                                    .map(|n| n.name.clone())
                                    .unwrap_or_default();
                                warn!(task = %name, error = %e, "task failed, stopping dispatch");
                                first_failure = Some(Error::TaskFailed { name, source: e });
                            }
                            aborted = true;
                        }
                    }
                }
                Err(_) => break,
            }
        }

        drop(task_tx);
        for handle in handles {
            let _ = handle.join();
        }

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}
