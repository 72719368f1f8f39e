//! Compute backends.
//!
//! A backend claims graph nodes it can run and executes them on operands the
//! scheduler has already resolved to memory. Backends are registered with the
//! scheduler in preference order; the first one that claims a node runs it.

mod aligned;
mod cpu;
pub(crate) mod kernels;

use thiserror::Error;

use crate::graph::OpKind;
use crate::tensor::MAX_DIMS;

pub use aligned::AlignedBackend;
pub use cpu::CpuBackend;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{backend} cannot run {op:?}")]
    Unsupported { backend: String, op: OpKind },
    #[error("{backend} {op:?} kernel failed: {reason}")]
    Kernel {
        backend: String,
        op: OpKind,
        reason: String,
    },
    #[error("Worker thread panicked in {0}")]
    WorkerPanic(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Cpu,
    Accelerator,
}

/// What a backend wants from graph construction and execution setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Multiply kernel is fastest on contraction lengths aligned to the pad,
    /// so the graph should use the split form.
    pub prefers_padded_matmul: bool,
    /// Honors a worker thread count.
    pub cpu_threads: bool,
    /// Honors a parallel dispatch width (command buffers in flight).
    pub parallel_dispatch: bool,
}

/// Read-only strided operand. `data` starts at the owning storage; rows are
/// `nb[1]` bytes apart and hold `ne[0]` contiguous values.
#[derive(Debug, Clone, Copy)]
pub struct Operand<'a> {
    pub data: &'a [f32],
    pub offset: usize,
    pub ne: [usize; MAX_DIMS],
    pub nb: [usize; MAX_DIMS],
}

impl<'a> Operand<'a> {
    pub fn n_rows(&self) -> usize {
        self.ne[1]
    }

    pub fn row(&self, r: usize) -> &'a [f32] {
        let start = self.offset + r * self.nb[1] / std::mem::size_of::<f32>();
        &self.data[start..start + self.ne[0]]
    }

    pub fn has_contiguous_rows(&self) -> bool {
        self.nb[0] == std::mem::size_of::<f32>()
    }
}

pub enum OutputBuf<'a> {
    F32(&'a mut [f32]),
    I32(&'a mut [i32]),
}

impl OutputBuf<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::F32(out) => out.len(),
            Self::I32(out) => out.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One node ready to run: resolved operands and the destination buffer.
pub struct NodeTask<'a> {
    pub op: OpKind,
    pub src: [Option<Operand<'a>>; 2],
    pub out_ne: [usize; MAX_DIMS],
    pub out: OutputBuf<'a>,
}

pub trait Backend: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities;

    /// Whether this backend runs the node. Nodes it declines fall through to
    /// the next registered backend.
    fn supports(&self, task: &NodeTask<'_>) -> bool;

    /// Worker threads on CPU backends, dispatch width on accelerators.
    fn set_parallelism(&mut self, n: usize);

    fn compute(&self, task: NodeTask<'_>) -> Result<(), BackendError>;
}
