//! Aligned-plus-remainder matrix multiply.
//!
//! `Z = X @ Y` is rewritten as `Z = (X_0 @ Y_0) + (X_1 @ Y_1)` where `X_0` and
//! `Y_0` are views covering the longest prefix of the contraction axis that is
//! a multiple of the pad, and `X_1`/`Y_1` cover the leftover columns. Backends
//! whose multiply kernel only runs fast on aligned shapes take the large part;
//! the small remainder goes to a general kernel.

use crate::tensor::TensorId;

use super::{GraphBuilder, GraphError};

pub const MATMUL_PAD: usize = 32;

/// Below this many aligned blocks the split costs more than it saves.
const MIN_PAD_BLOCKS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatmulPlan {
    Direct,
    Split { aligned: usize, remainder: usize },
}

impl MatmulPlan {
    pub fn for_contraction(k: usize, pad: usize) -> Self {
        if pad == 0 || k % pad == 0 || k / pad < MIN_PAD_BLOCKS {
            return Self::Direct;
        }
        Self::Split {
            aligned: (k / pad) * pad,
            remainder: k % pad,
        }
    }

    pub fn is_split(self) -> bool {
        matches!(self, Self::Split { .. })
    }
}

/// Emits `x @ y` using the split form when [`MatmulPlan`] allows it.
pub fn mul_mat_pad(
    builder: &mut GraphBuilder<'_>,
    x: TensorId,
    y: TensorId,
    pad: usize,
) -> Result<TensorId, GraphError> {
    let x_desc = builder.tensor(x)?.clone();
    let y_desc = builder.tensor(y)?.clone();
    if x_desc.ne[0] != y_desc.ne[0] {
        return Err(GraphError::ShapeMismatch {
            op: "mul_mat_pad",
            lhs: x_desc.ne,
            rhs: y_desc.ne,
        });
    }

    let (aligned, remainder) = match MatmulPlan::for_contraction(x_desc.ne[0], pad) {
        MatmulPlan::Direct => return builder.mul_mat(x, y),
        MatmulPlan::Split { aligned, remainder } => (aligned, remainder),
    };

    let x_0 = builder.view_2d(x, aligned, x_desc.ne[1], x_desc.nb[1], 0)?;
    let x_1 = builder.view_2d(
        x,
        remainder,
        x_desc.ne[1],
        x_desc.nb[1],
        aligned * x_desc.nb[0],
    )?;

    let y_0 = builder.view_2d(y, aligned, y_desc.ne[1], y_desc.nb[1], 0)?;
    let y_1 = builder.view_2d(
        y,
        remainder,
        y_desc.ne[1],
        y_desc.nb[1],
        aligned * y_desc.nb[0],
    )?;

    let z_0 = builder.mul_mat(x_0, y_0)?;
    let z_1 = builder.mul_mat(x_1, y_1)?;
    builder.add(z_0, z_1)
}
