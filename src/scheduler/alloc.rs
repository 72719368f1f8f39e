//! Liveness-based placement of graph tensors in the scheduler arena.

use crate::graph::{Graph, GraphError};
use crate::tensor::Storage;

pub const TENSOR_ALIGNMENT: usize = 32;

fn aligned(size: usize) -> usize {
    size.max(1).div_ceil(TENSOR_ALIGNMENT) * TENSOR_ALIGNMENT
}

/// Byte offsets for every arena-backed tensor of one graph.
#[derive(Debug, Clone)]
pub struct AllocationPlan {
    offsets: Vec<Option<usize>>,
    peak: usize,
    generation: u32,
}

impl AllocationPlan {
    /// Build generation of the graph this plan was made for.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn offset(&self, index: usize) -> Option<usize> {
        self.offsets.get(index).copied().flatten()
    }

    /// Highest byte the plan touches; the arena must be at least this large.
    pub fn peak(&self) -> usize {
        self.peak
    }
}

/// First-fit free list over a growing address range.
#[derive(Debug, Default)]
struct FreeList {
    blocks: Vec<(usize, usize)>,
    end: usize,
}

impl FreeList {
    fn alloc(&mut self, size: usize) -> usize {
        let size = aligned(size);
        if let Some(pos) = self.blocks.iter().position(|&(_, len)| len >= size) {
            let (offset, len) = self.blocks[pos];
            if len == size {
                self.blocks.remove(pos);
            } else {
                self.blocks[pos] = (offset + size, len - size);
            }
            return offset;
        }
        let offset = self.end;
        self.end += size;
        offset
    }

    fn free(&mut self, offset: usize, size: usize) {
        let size = aligned(size);
        let pos = self.blocks.partition_point(|&(o, _)| o < offset);
        self.blocks.insert(pos, (offset, size));

        if pos + 1 < self.blocks.len() && offset + size == self.blocks[pos + 1].0 {
            self.blocks[pos].1 += self.blocks[pos + 1].1;
            self.blocks.remove(pos + 1);
        }
        if pos > 0 {
            let (prev_offset, prev_size) = self.blocks[pos - 1];
            if prev_offset + prev_size == offset {
                self.blocks[pos - 1].1 += self.blocks[pos].1;
                self.blocks.remove(pos);
            }
        }
    }
}

/// Places inputs first, then each node output right before its node runs.
/// A tensor is released after the last node reading it, directly or through
/// a view; graph outputs and unread inputs are never released.
pub fn plan(graph: &Graph<'_>) -> Result<AllocationPlan, GraphError> {
    let tensors = graph.tensors();
    let n = tensors.len();

    let mut last_use: Vec<Option<usize>> = vec![None; n];
    let mut pinned = vec![false; n];
    for id in graph.outputs() {
        pinned[id.index()] = true;
    }
    for (i, node) in graph.nodes().iter().enumerate() {
        for src in node.inputs() {
            let (root, _) = graph.storage_root(src)?;
            last_use[root.id.index()] = Some(i);
        }
        last_use[node.out.index()].get_or_insert(i);
    }

    let mut offsets = vec![None; n];
    let mut released = vec![false; n];
    let mut free = FreeList::default();

    for &id in graph.inputs() {
        let desc = graph.tensor(id)?;
        if desc.storage == Storage::Arena {
            offsets[id.index()] = Some(free.alloc(desc.byte_size()));
            if last_use[id.index()].is_none() {
                pinned[id.index()] = true;
            }
        }
    }

    for (i, node) in graph.nodes().iter().enumerate() {
        let out = graph.tensor(node.out)?;
        if out.storage == Storage::Arena && offsets[node.out.index()].is_none() {
            offsets[node.out.index()] = Some(free.alloc(out.byte_size()));
        }

        let mut candidates = Vec::with_capacity(3);
        for src in node.inputs() {
            candidates.push(graph.storage_root(src)?.0);
        }
        candidates.push(out);

        for desc in candidates {
            let idx = desc.id.index();
            if pinned[idx] || released[idx] || last_use[idx] != Some(i) {
                continue;
            }
            if let Some(offset) = offsets[idx] {
                free.free(offset, desc.byte_size());
                released[idx] = true;
            }
        }
    }

    Ok(AllocationPlan {
        offsets,
        peak: free.end,
        generation: graph.generation(),
    })
}
