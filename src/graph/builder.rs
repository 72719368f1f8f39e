use crate::tensor::{DType, Storage, TensorDesc, TensorId, MAX_DIMS};

use super::{Graph, GraphError, MetaArena, Node, OpKind};

/// Records tensors and operations for one graph build.
///
/// Every operation only accepts ids already minted by this builder, so nodes
/// can never reference a tensor created after them.
pub struct GraphBuilder<'a> {
    meta: &'a mut MetaArena,
    params: Vec<&'a [f32]>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(meta: &'a mut MetaArena) -> Self {
        meta.reset();
        Self {
            meta,
            params: Vec::new(),
        }
    }

    pub fn tensor(&self, id: TensorId) -> Result<&TensorDesc, GraphError> {
        self.meta.lookup(id)
    }

    pub fn n_nodes(&self) -> usize {
        self.meta.nodes.len()
    }

    /// New 2D tensor whose storage the scheduler assigns later.
    pub fn new_tensor_2d(
        &mut self,
        name: &str,
        dtype: DType,
        ne0: usize,
        ne1: usize,
    ) -> Result<TensorId, GraphError> {
        self.push_tensor(name, dtype, [ne0, ne1, 1, 1], Storage::Arena)
    }

    /// Registers a read-only parameter laid out as `ne1` rows of `ne0` values.
    pub fn param_2d(
        &mut self,
        name: &str,
        data: &'a [f32],
        ne0: usize,
        ne1: usize,
    ) -> Result<TensorId, GraphError> {
        let expected = ne0 * ne1;
        if data.len() != expected {
            return Err(GraphError::ParamLength {
                name: name.to_string(),
                expected,
                actual: data.len(),
            });
        }
        let id = self.push_tensor(
            name,
            DType::F32,
            [ne0, ne1, 1, 1],
            Storage::Param(self.params.len()),
        )?;
        self.params.push(data);
        Ok(id)
    }

    pub fn param_1d(&mut self, name: &str, data: &'a [f32]) -> Result<TensorId, GraphError> {
        self.param_2d(name, data, data.len(), 1)
    }

    pub fn set_name(&mut self, id: TensorId, name: &str) -> Result<(), GraphError> {
        self.meta.lookup_mut(id)?.name = name.to_string();
        Ok(())
    }

    pub fn set_input(&mut self, id: TensorId) -> Result<(), GraphError> {
        let desc = self.meta.lookup_mut(id)?;
        if !desc.is_input {
            desc.is_input = true;
            self.meta.inputs.push(id);
        }
        Ok(())
    }

    pub fn set_output(&mut self, id: TensorId) -> Result<(), GraphError> {
        let desc = self.meta.lookup_mut(id)?;
        if !desc.is_output {
            desc.is_output = true;
            self.meta.outputs.push(id);
        }
        Ok(())
    }

    /// Strided 2D view into `src` starting `offset` bytes in. Rows keep their
    /// element stride; `nb1` is the byte distance between rows.
    pub fn view_2d(
        &mut self,
        src: TensorId,
        ne0: usize,
        ne1: usize,
        nb1: usize,
        offset: usize,
    ) -> Result<TensorId, GraphError> {
        let base = self.meta.lookup(src)?.clone();
        let mut view = TensorDesc::contiguous(
            base.id,
            format!("{} (view)", base.name),
            base.dtype,
            [ne0, ne1, 1, 1],
            Storage::View { base: src, offset },
        );
        view.nb[1] = nb1;
        view.nb[2] = nb1 * ne1;
        view.nb[3] = view.nb[2];

        let end = offset + view.byte_size();
        let size = base.byte_size();
        if end > size {
            return Err(GraphError::ViewOutOfBounds {
                name: base.name,
                end,
                size,
            });
        }

        let id = self.meta.next_id()?;
        view.id = id;
        self.meta.tensors.push(view);
        Ok(id)
    }

    /// `out[n][m] = sum_k a[m][k] * b[n][k]`; both operands share `ne[0]`.
    pub fn mul_mat(&mut self, a: TensorId, b: TensorId) -> Result<TensorId, GraphError> {
        let (a_ne, b_ne) = (
            self.f32_operand(OpKind::MulMat, a)?,
            self.f32_operand(OpKind::MulMat, b)?,
        );
        if a_ne[0] != b_ne[0] {
            return Err(shape_mismatch(OpKind::MulMat, a_ne, b_ne));
        }
        self.push_op(OpKind::MulMat, [Some(a), Some(b)], DType::F32, [a_ne[1], b_ne[1], 1, 1])
    }

    /// Elementwise add, broadcasting a single row of `b` over every row of `a`.
    pub fn add(&mut self, a: TensorId, b: TensorId) -> Result<TensorId, GraphError> {
        let (a_ne, b_ne) = (
            self.f32_operand(OpKind::Add, a)?,
            self.f32_operand(OpKind::Add, b)?,
        );
        if a_ne[0] != b_ne[0] || (b_ne[1] != 1 && b_ne[1] != a_ne[1]) {
            return Err(shape_mismatch(OpKind::Add, a_ne, b_ne));
        }
        self.push_op(OpKind::Add, [Some(a), Some(b)], DType::F32, a_ne)
    }

    pub fn soft_max(&mut self, a: TensorId) -> Result<TensorId, GraphError> {
        let ne = self.f32_operand(OpKind::SoftMax, a)?;
        self.push_op(OpKind::SoftMax, [Some(a), None], DType::F32, ne)
    }

    /// Index of the largest value in every row, lowest index on ties.
    pub fn argmax(&mut self, a: TensorId) -> Result<TensorId, GraphError> {
        let ne = self.f32_operand(OpKind::Argmax, a)?;
        self.push_op(OpKind::Argmax, [Some(a), None], DType::I32, [ne[1], 1, 1, 1])
    }

    pub fn finish(self, terminal: TensorId) -> Result<Graph<'a>, GraphError> {
        self.meta.lookup(terminal)?;
        match self.meta.nodes.last() {
            Some(last) if last.out == terminal => {}
            _ => return Err(GraphError::Terminal(terminal)),
        }
        Ok(Graph {
            meta: self.meta,
            params: self.params,
            terminal,
        })
    }

    fn f32_operand(&self, op: OpKind, id: TensorId) -> Result<[usize; MAX_DIMS], GraphError> {
        let desc = self.meta.lookup(id)?;
        if desc.dtype != DType::F32 {
            return Err(GraphError::DType {
                op: op.name(),
                expected: DType::F32,
                actual: desc.dtype,
            });
        }
        Ok(desc.ne)
    }

    fn push_tensor(
        &mut self,
        name: &str,
        dtype: DType,
        ne: [usize; MAX_DIMS],
        storage: Storage,
    ) -> Result<TensorId, GraphError> {
        let id = self.meta.next_id()?;
        self.meta
            .tensors
            .push(TensorDesc::contiguous(id, name, dtype, ne, storage));
        Ok(id)
    }

    fn push_op(
        &mut self,
        op: OpKind,
        src: [Option<TensorId>; 2],
        dtype: DType,
        ne: [usize; MAX_DIMS],
    ) -> Result<TensorId, GraphError> {
        if self.meta.nodes.len() >= self.meta.max_nodes() {
            return Err(GraphError::NodeCapacity {
                max: self.meta.max_nodes(),
            });
        }
        let name = format!("{}-{}", op.name(), self.meta.nodes.len());
        let out = self.push_tensor(&name, dtype, ne, Storage::Arena)?;
        self.meta.push_node(Node { op, src, out })?;
        Ok(out)
    }
}

fn shape_mismatch(op: OpKind, lhs: [usize; MAX_DIMS], rhs: [usize; MAX_DIMS]) -> GraphError {
    GraphError::ShapeMismatch {
        op: op.name(),
        lhs,
        rhs,
    }
}
