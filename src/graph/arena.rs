use crate::tensor::{TensorDesc, TensorId};

use super::{GraphError, Node};

/// Descriptor storage reused across graph builds.
///
/// Capacity is reserved once; every build clears the vectors and bumps the
/// generation so ids minted by the previous build stop resolving.
#[derive(Debug)]
pub struct MetaArena {
    pub(super) tensors: Vec<TensorDesc>,
    pub(super) nodes: Vec<Node>,
    pub(super) inputs: Vec<TensorId>,
    pub(super) outputs: Vec<TensorId>,
    max_nodes: usize,
    max_tensors: usize,
    generation: u32,
}

impl Default for MetaArena {
    fn default() -> Self {
        Self::new(super::MAX_NODES, super::MAX_TENSORS)
    }
}

impl MetaArena {
    pub fn new(max_nodes: usize, max_tensors: usize) -> Self {
        Self {
            tensors: Vec::with_capacity(max_tensors),
            nodes: Vec::with_capacity(max_nodes),
            inputs: Vec::new(),
            outputs: Vec::new(),
            max_nodes,
            max_tensors,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn max_tensors(&self) -> usize {
        self.max_tensors
    }

    pub(super) fn reset(&mut self) {
        self.tensors.clear();
        self.nodes.clear();
        self.inputs.clear();
        self.outputs.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    pub(super) fn next_id(&self) -> Result<TensorId, GraphError> {
        if self.tensors.len() >= self.max_tensors {
            return Err(GraphError::TensorCapacity {
                max: self.max_tensors,
            });
        }
        Ok(TensorId {
            index: self.tensors.len() as u32,
            generation: self.generation,
        })
    }

    pub(super) fn push_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.len() >= self.max_nodes {
            return Err(GraphError::NodeCapacity {
                max: self.max_nodes,
            });
        }
        self.nodes.push(node);
        Ok(())
    }

    pub(super) fn lookup(&self, id: TensorId) -> Result<&TensorDesc, GraphError> {
        if id.generation != self.generation {
            return Err(GraphError::StaleTensor(id));
        }
        self.tensors
            .get(id.index())
            .ok_or(GraphError::UnknownTensor(id.index()))
    }

    pub(super) fn lookup_mut(&mut self, id: TensorId) -> Result<&mut TensorDesc, GraphError> {
        if id.generation != self.generation {
            return Err(GraphError::StaleTensor(id));
        }
        self.tensors
            .get_mut(id.index())
            .ok_or(GraphError::UnknownTensor(id.index()))
    }
}
