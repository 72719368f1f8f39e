use crate::graph::Graph;
use crate::tensor::{DType, TensorData, TensorDesc, TensorError, TensorId};

use super::{AllocationPlan, SchedulerError, WORD};

/// Graph outputs copied out of the arena before it is handed back.
#[derive(Debug, Clone, Default)]
pub struct GraphOutputs {
    tensors: Vec<(TensorId, TensorData)>,
}

impl GraphOutputs {
    pub(crate) fn new(tensors: Vec<(TensorId, TensorData)>) -> Self {
        Self { tensors }
    }

    pub fn get(&self, id: TensorId) -> Option<&TensorData> {
        self.tensors
            .iter()
            .find(|(tid, _)| *tid == id)
            .map(|(_, data)| data)
    }

    pub fn by_name(&self, name: &str) -> Option<&TensorData> {
        self.tensors
            .iter()
            .find(|(_, data)| data.name() == name)
            .map(|(_, data)| data)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TensorData> {
        self.tensors.iter().map(|(_, data)| data)
    }
}

/// Borrowed view of graph outputs while they are still in the arena.
pub struct OutputReader<'r> {
    graph: &'r Graph<'r>,
    plan: &'r AllocationPlan,
    arena: &'r [u32],
}

impl<'r> OutputReader<'r> {
    pub(super) fn new(graph: &'r Graph<'r>, plan: &'r AllocationPlan, arena: &'r [u32]) -> Self {
        Self { graph, plan, arena }
    }

    /// Id of the output named `name`.
    pub fn output(&self, name: &str) -> Option<TensorId> {
        self.graph
            .outputs()
            .iter()
            .copied()
            .find(|&id| self.graph.tensor(id).is_ok_and(|t| t.name == name))
    }

    /// Descriptor of an output. Intermediates are rejected since the arena
    /// may already have reused their storage.
    pub fn desc(&self, id: TensorId) -> Result<&'r TensorDesc, SchedulerError> {
        let desc = self.graph.tensor(id)?;
        if !self.graph.outputs().contains(&id) {
            return Err(SchedulerError::NotAnOutput(desc.name.clone()));
        }
        Ok(desc)
    }

    pub fn f32(&self, id: TensorId) -> Result<&'r [f32], SchedulerError> {
        Ok(bytemuck::cast_slice(self.typed(id, DType::F32)?))
    }

    pub fn i32(&self, id: TensorId) -> Result<&'r [i32], SchedulerError> {
        Ok(bytemuck::cast_slice(self.typed(id, DType::I32)?))
    }

    /// Copies every output out of the arena.
    pub fn collect(&self) -> Result<GraphOutputs, SchedulerError> {
        let mut tensors = Vec::with_capacity(self.graph.outputs().len());
        for &id in self.graph.outputs() {
            let (desc, words) = self.words(id)?;
            tensors.push((
                id,
                TensorData::new(desc.name.clone(), desc.dtype, desc.ne, words.to_vec()),
            ));
        }
        Ok(GraphOutputs::new(tensors))
    }

    fn typed(&self, id: TensorId, requested: DType) -> Result<&'r [u32], SchedulerError> {
        let (desc, words) = self.words(id)?;
        if desc.dtype != requested {
            return Err(TensorError::DType {
                name: desc.name.clone(),
                requested,
                actual: desc.dtype,
            }
            .into());
        }
        Ok(words)
    }

    fn words(&self, id: TensorId) -> Result<(&'r TensorDesc, &'r [u32]), SchedulerError> {
        let desc = self.desc(id)?;
        let start = self
            .plan
            .offset(id.index())
            .ok_or_else(|| SchedulerError::Unallocated(desc.name.clone()))?
            / WORD;
        let len = desc.n_elements();
        let words = self
            .arena
            .get(start..start + len)
            .ok_or(SchedulerError::ArenaExhausted {
                needed: (start + len) * WORD,
                capacity: self.arena.len() * WORD,
            })?;
        Ok((desc, words))
    }
}
