//! Backend execution scheduler.
//!
//! Owns the registered backends and a pre-sized arena. A decode call goes
//! through [`BackendScheduler::allocate`], which hands back an [`Allocation`]
//! guard; inputs are bound and the graph executed through that guard, and
//! dropping it (on success, on error, or without executing) returns the
//! scheduler to [`SchedulerState::Idle`].

pub mod alloc;
mod outputs;

use std::time::Instant;

use thiserror::Error;

use crate::backend::{
    Backend, BackendCapabilities, BackendError, NodeTask, Operand, OutputBuf,
};
use crate::graph::{Graph, GraphError, OpKind};
use crate::tensor::{DType, Storage, TensorError, TensorId};

pub use alloc::{AllocationPlan, TENSOR_ALIGNMENT};
pub use outputs::{GraphOutputs, OutputReader};

const WORD: usize = std::mem::size_of::<u32>();

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Cannot {op} while the scheduler is {state:?}")]
    InvalidState {
        op: &'static str,
        state: SchedulerState,
    },
    #[error("Graph generation {graph} does not match allocated generation {allocated}")]
    GenerationMismatch { allocated: u32, graph: u32 },
    #[error("Arena too small: graph needs {needed} bytes, arena holds {capacity}")]
    ArenaExhausted { needed: usize, capacity: usize },
    #[error("Graph has no input named '{0}'")]
    UnknownInput(String),
    #[error("Input '{name}' expects {expected} bytes, got {actual}")]
    InputSize {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Input '{0}' was never bound")]
    InputNotBound(String),
    #[error("Tensor '{0}' has no storage")]
    Unallocated(String),
    #[error("Node {node} reads '{tensor}' from memory overlapping its output")]
    Aliasing { node: usize, tensor: String },
    #[error("No backends registered")]
    NoBackends,
    #[error("No backend claims node {node} ({op:?})")]
    NoBackend { node: usize, op: OpKind },
    #[error("Node {node} failed: {source}")]
    Backend {
        node: usize,
        #[source]
        source: BackendError,
    },
    #[error("Tensor '{0}' is not a graph output")]
    NotAnOutput(String),
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Allocated,
    Bound,
}

pub struct BackendScheduler {
    backends: Vec<Box<dyn Backend>>,
    arena: Vec<u32>,
    state: SchedulerState,
    plan: Option<AllocationPlan>,
    bound: Vec<TensorId>,
}

impl Drop for BackendScheduler {
    fn drop(&mut self) {
        log::debug!(
            "Dropping backend scheduler with {} byte arena",
            self.arena_bytes()
        );
    }
}

impl BackendScheduler {
    /// `backends` are in preference order: the first backend that claims a
    /// node runs it, and the first backend's capabilities steer graph
    /// construction.
    pub fn new(backends: Vec<Box<dyn Backend>>, arena_bytes: usize) -> Result<Self, SchedulerError> {
        if backends.is_empty() {
            return Err(SchedulerError::NoBackends);
        }

        log::info!(
            "Backend scheduler initialized: backends=[{}], arena={} bytes",
            backends
                .iter()
                .map(|b| format!("{} ({:?})", b.name(), b.kind()))
                .collect::<Vec<_>>()
                .join(", "),
            arena_bytes
        );

        Ok(Self {
            backends,
            arena: vec![0; arena_bytes.div_ceil(WORD)],
            state: SchedulerState::Idle,
            plan: None,
            bound: Vec::new(),
        })
    }

    pub fn n_backends(&self) -> usize {
        self.backends.len()
    }

    pub fn backend(&self, index: usize) -> Option<&dyn Backend> {
        self.backends.get(index).map(|b| b.as_ref())
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.backends
            .first()
            .map(|b| b.capabilities())
            .unwrap_or_default()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn arena_bytes(&self) -> usize {
        self.arena.len() * WORD
    }

    /// Grows the arena to fit `graph` without running it. Called once with
    /// the worst-case graph so later allocations never need to grow.
    pub fn reserve(&mut self, graph: &Graph<'_>) -> Result<usize, SchedulerError> {
        self.expect_idle("reserve")?;
        let plan = alloc::plan(graph)?;
        if plan.peak() > self.arena_bytes() {
            self.arena.resize(plan.peak().div_ceil(WORD), 0);
        }
        log::info!(
            "Reserved scheduler arena: {} bytes (graph peak {} bytes, {} nodes)",
            self.arena_bytes(),
            plan.peak(),
            graph.n_nodes()
        );
        Ok(self.arena_bytes())
    }

    /// Assigns arena storage to every tensor of `graph`. Fails without
    /// touching the arena when the plan does not fit.
    pub fn allocate<'s, 'g, 'a>(
        &'s mut self,
        graph: &'g Graph<'a>,
    ) -> Result<Allocation<'s, 'g, 'a>, SchedulerError> {
        self.expect_idle("allocate")?;
        let plan = alloc::plan(graph)?;
        let capacity = self.arena_bytes();
        if plan.peak() > capacity {
            return Err(SchedulerError::ArenaExhausted {
                needed: plan.peak(),
                capacity,
            });
        }
        log::debug!(
            "Allocated graph generation {}: peak {} of {} bytes",
            graph.generation(),
            plan.peak(),
            capacity
        );

        self.plan = Some(plan);
        self.bound.clear();
        self.state = if graph.inputs().is_empty() {
            SchedulerState::Bound
        } else {
            SchedulerState::Allocated
        };
        Ok(Allocation { sched: self, graph })
    }

    /// Drops allocation bookkeeping. [`Allocation`] does this on drop; this is
    /// only needed to recover after an allocation guard was leaked.
    pub fn reset(&mut self) {
        self.plan = None;
        self.bound.clear();
        self.state = SchedulerState::Idle;
    }

    fn expect_idle(&self, op: &'static str) -> Result<(), SchedulerError> {
        if self.state != SchedulerState::Idle {
            return Err(SchedulerError::InvalidState {
                op,
                state: self.state,
            });
        }
        Ok(())
    }

    fn set_parallelism(&mut self, n_threads: usize) {
        for backend in &mut self.backends {
            let caps = backend.capabilities();
            if caps.cpu_threads || caps.parallel_dispatch {
                backend.set_parallelism(n_threads);
            }
        }
    }

    fn compute(&mut self, graph: &Graph<'_>) -> Result<(), SchedulerError> {
        let plan = self.plan.as_ref().ok_or(SchedulerError::InvalidState {
            op: "execute",
            state: self.state,
        })?;
        if plan.generation() != graph.generation() {
            return Err(SchedulerError::GenerationMismatch {
                allocated: plan.generation(),
                graph: graph.generation(),
            });
        }

        for (i, node) in graph.nodes().iter().enumerate() {
            let out_desc = graph.tensor(node.out)?;
            let offset = plan
                .offset(node.out.index())
                .ok_or_else(|| SchedulerError::Unallocated(out_desc.name.clone()))?;
            let start = offset / WORD;
            let len = out_desc.n_elements();
            if start + len > self.arena.len() {
                return Err(SchedulerError::ArenaExhausted {
                    needed: (start + len) * WORD,
                    capacity: self.arena.len() * WORD,
                });
            }

            let (head, rest) = self.arena.split_at_mut(start);
            let (out_words, tail) = rest.split_at_mut(len);
            let regions = Regions {
                head,
                tail,
                tail_start: start + len,
            };

            let src = [
                resolve(graph, plan, &regions, node.src[0], i)?,
                resolve(graph, plan, &regions, node.src[1], i)?,
            ];
            let out = match out_desc.dtype {
                DType::F32 => OutputBuf::F32(bytemuck::cast_slice_mut(out_words)),
                DType::I32 => OutputBuf::I32(bytemuck::cast_slice_mut(out_words)),
            };
            let task = NodeTask {
                op: node.op,
                src,
                out_ne: out_desc.ne,
                out,
            };

            let backend = self
                .backends
                .iter()
                .find(|b| b.supports(&task))
                .ok_or(SchedulerError::NoBackend { node: i, op: node.op })?;
            log::trace!("node {} {} -> {}", i, node.op.name(), backend.name());
            backend
                .compute(task)
                .map_err(|source| SchedulerError::Backend { node: i, source })?;
        }
        Ok(())
    }
}

/// Arena words on either side of the node output being written.
struct Regions<'r> {
    head: &'r [u32],
    tail: &'r [u32],
    tail_start: usize,
}

impl<'r> Regions<'r> {
    fn get(&self, start: usize, len: usize) -> Option<&'r [u32]> {
        if start + len <= self.head.len() {
            return self.head.get(start..start + len);
        }
        let local = start.checked_sub(self.tail_start)?;
        self.tail.get(local..local + len)
    }
}

fn resolve<'r>(
    graph: &Graph<'r>,
    plan: &AllocationPlan,
    regions: &Regions<'r>,
    id: Option<TensorId>,
    node: usize,
) -> Result<Option<Operand<'r>>, SchedulerError> {
    let Some(id) = id else {
        return Ok(None);
    };
    let desc = graph.tensor(id)?;
    let (root, offset) = graph.storage_root(id)?;

    let data: &'r [f32] = match root.storage {
        Storage::Param(index) => graph
            .param(index)
            .ok_or_else(|| SchedulerError::Unallocated(root.name.clone()))?,
        Storage::Arena => {
            let start = plan
                .offset(root.id.index())
                .ok_or_else(|| SchedulerError::Unallocated(root.name.clone()))?
                / WORD;
            let words = regions
                .get(start, root.byte_size().div_ceil(WORD))
                .ok_or_else(|| SchedulerError::Aliasing {
                    node,
                    tensor: root.name.clone(),
                })?;
            bytemuck::cast_slice(words)
        }
        Storage::View { .. } => return Err(SchedulerError::Unallocated(root.name.clone())),
    };

    Ok(Some(Operand {
        data,
        offset: offset / WORD,
        ne: desc.ne,
        nb: desc.nb,
    }))
}

/// Scoped allocation of one graph.
///
/// Lives between [`BackendScheduler::allocate`] and the end of the call;
/// dropping it resets the scheduler whatever happened in between.
pub struct Allocation<'s, 'g, 'a> {
    sched: &'s mut BackendScheduler,
    graph: &'g Graph<'a>,
}

impl Drop for Allocation<'_, '_, '_> {
    fn drop(&mut self) {
        self.sched.reset();
    }
}

impl Allocation<'_, '_, '_> {
    pub fn state(&self) -> SchedulerState {
        self.sched.state
    }

    pub fn peak_bytes(&self) -> usize {
        self.sched.plan.as_ref().map_or(0, AllocationPlan::peak)
    }

    /// Copies raw bytes into the named graph input.
    pub fn bind_input(&mut self, name: &str, data: &[u8]) -> Result<(), SchedulerError> {
        let graph = self.graph;
        let id = graph
            .inputs()
            .iter()
            .copied()
            .find(|&id| graph.tensor(id).is_ok_and(|t| t.name == name))
            .ok_or_else(|| SchedulerError::UnknownInput(name.to_string()))?;
        let desc = graph.tensor(id)?;

        let expected = desc.byte_size();
        if data.len() != expected {
            return Err(SchedulerError::InputSize {
                name: name.to_string(),
                expected,
                actual: data.len(),
            });
        }

        let offset = self
            .sched
            .plan
            .as_ref()
            .and_then(|plan| plan.offset(id.index()))
            .ok_or_else(|| SchedulerError::Unallocated(name.to_string()))?;
        let start = offset / WORD;
        let capacity = self.sched.arena_bytes();
        let words = self
            .sched
            .arena
            .get_mut(start..start + expected.div_ceil(WORD))
            .ok_or(SchedulerError::ArenaExhausted {
                needed: offset + expected,
                capacity,
            })?;
        bytemuck::cast_slice_mut::<u32, u8>(words)[..expected].copy_from_slice(data);

        if !self.sched.bound.contains(&id) {
            self.sched.bound.push(id);
        }
        if graph.inputs().iter().all(|i| self.sched.bound.contains(i)) {
            self.sched.state = SchedulerState::Bound;
        }
        Ok(())
    }

    pub fn bind_input_f32(&mut self, name: &str, values: &[f32]) -> Result<(), SchedulerError> {
        self.bind_input(name, bytemuck::cast_slice(values))
    }

    /// Runs every node in construction order and copies the graph outputs
    /// out. The scheduler is back to idle when this returns, success or not.
    pub fn execute(self, n_threads: usize) -> Result<GraphOutputs, SchedulerError> {
        self.execute_with(n_threads, |outputs| outputs.collect())
    }

    /// Runs the graph and hands `read` a view of the outputs still sitting in
    /// the arena, so callers copy only what they need. The arena is released
    /// once `read` returns.
    pub fn execute_with<R, F>(mut self, n_threads: usize, read: F) -> Result<R, SchedulerError>
    where
        F: FnOnce(&OutputReader<'_>) -> Result<R, SchedulerError>,
    {
        if self.sched.state != SchedulerState::Bound {
            let missing = self
                .graph
                .inputs()
                .iter()
                .find(|id| !self.sched.bound.contains(id))
                .and_then(|&id| self.graph.tensor(id).ok())
                .map(|t| t.name.clone())
                .unwrap_or_default();
            return Err(SchedulerError::InputNotBound(missing));
        }

        let started = Instant::now();
        self.sched.set_parallelism(n_threads);
        self.sched.compute(self.graph)?;
        log::debug!(
            "Executed {} nodes with {} threads in {:?}",
            self.graph.n_nodes(),
            n_threads,
            started.elapsed()
        );

        let plan = self.sched.plan.as_ref().ok_or(SchedulerError::InvalidState {
            op: "read outputs",
            state: self.sched.state,
        })?;
        let reader = OutputReader::new(self.graph, plan, &self.sched.arena);
        read(&reader)
    }
}
