//! Per-call computation graphs.
//!
//! Graphs are rebuilt for every decode call inside a reusable [`MetaArena`].
//! Only descriptors live here; numeric storage is assigned by the scheduler.

mod arena;
mod builder;
pub mod decode;
pub mod padded;

use thiserror::Error;

use crate::tensor::{DType, Storage, TensorDesc, TensorId, MAX_DIMS};

pub use arena::MetaArena;
pub use builder::GraphBuilder;
pub use decode::{build_decode_graph, ENCODER_OUT, LOGITS_ARGMAX, LOGITS_PROBS};
pub use padded::{mul_mat_pad, MatmulPlan, MATMUL_PAD};

/// The decode path is shallow; six nodes at most with the padded multiply.
pub const MAX_NODES: usize = 8;
pub const MAX_TENSORS: usize = 16;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph node capacity of {max} exceeded")]
    NodeCapacity { max: usize },
    #[error("Graph tensor capacity of {max} exceeded")]
    TensorCapacity { max: usize },
    #[error("Tensor {0:?} belongs to an earlier graph build")]
    StaleTensor(TensorId),
    #[error("Tensor index {0} does not exist yet")]
    UnknownTensor(usize),
    #[error("Shape mismatch in {op}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: [usize; MAX_DIMS],
        rhs: [usize; MAX_DIMS],
    },
    #[error("Operand of {op} must be {expected:?}, got {actual:?}")]
    DType {
        op: &'static str,
        expected: DType,
        actual: DType,
    },
    #[error("View of '{name}' ends at byte {end}, past its {size} bytes")]
    ViewOutOfBounds {
        name: String,
        end: usize,
        size: usize,
    },
    #[error("Parameter '{name}' has {actual} values, its shape requires {expected}")]
    ParamLength {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Terminal tensor {0:?} is not the output of the last node")]
    Terminal(TensorId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    MulMat,
    Add,
    SoftMax,
    Argmax,
}

impl OpKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::MulMat => "mul_mat",
            Self::Add => "add",
            Self::SoftMax => "soft_max",
            Self::Argmax => "argmax",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub op: OpKind,
    pub src: [Option<TensorId>; 2],
    pub out: TensorId,
}

impl Node {
    pub fn inputs(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.src.iter().flatten().copied()
    }
}

/// Immutable graph description produced by [`GraphBuilder::finish`].
///
/// Borrows the descriptor arena and the parameter slices for the duration of
/// one decode call; nodes are stored in construction order, which is also a
/// valid execution order.
pub struct Graph<'a> {
    meta: &'a MetaArena,
    params: Vec<&'a [f32]>,
    terminal: TensorId,
}

impl<'a> Graph<'a> {
    pub fn generation(&self) -> u32 {
        self.meta.generation()
    }

    pub fn nodes(&self) -> &'a [Node] {
        &self.meta.nodes
    }

    pub fn n_nodes(&self) -> usize {
        self.meta.nodes.len()
    }

    pub fn tensors(&self) -> &'a [TensorDesc] {
        &self.meta.tensors
    }

    pub fn tensor(&self, id: TensorId) -> Result<&'a TensorDesc, GraphError> {
        self.meta.lookup(id)
    }

    pub fn get_tensor(&self, name: &str) -> Option<&'a TensorDesc> {
        self.meta.tensors.iter().find(|t| t.name == name)
    }

    pub fn inputs(&self) -> &'a [TensorId] {
        &self.meta.inputs
    }

    pub fn outputs(&self) -> &'a [TensorId] {
        &self.meta.outputs
    }

    /// Output of the last node, read by the caller after execution.
    pub fn terminal(&self) -> TensorId {
        self.terminal
    }

    pub fn param(&self, index: usize) -> Option<&'a [f32]> {
        self.params.get(index).copied()
    }

    /// Follows views down to the tensor that owns storage, accumulating the
    /// byte offset along the way.
    pub fn storage_root(&self, id: TensorId) -> Result<(&'a TensorDesc, usize), GraphError> {
        let mut desc = self.tensor(id)?;
        let mut offset = 0;
        while let Storage::View { base, offset: view_offset } = desc.storage {
            offset += view_offset;
            desc = self.tensor(base)?;
        }
        Ok((desc, offset))
    }
}
