use crate::graph::{OpKind, MATMUL_PAD};

use super::kernels;
use super::{Backend, BackendCapabilities, BackendError, BackendKind, NodeTask};

/// Accelerator-style backend with a blocked multiply kernel.
///
/// The kernel walks the contraction axis in fixed blocks of [`MATMUL_PAD`]
/// lanes, so it only claims multiplies whose contraction length is a multiple
/// of the block and whose rows are contiguous. Everything else falls through
/// to the next backend. It asks graph construction for the padded multiply so
/// the bulk of an unaligned product still lands here.
#[derive(Debug)]
pub struct AlignedBackend {
    n_cb: usize,
}

impl Default for AlignedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AlignedBackend {
    pub fn new() -> Self {
        Self { n_cb: 1 }
    }

    /// Parallel dispatch width.
    pub fn n_cb(&self) -> usize {
        self.n_cb
    }
}

impl Backend for AlignedBackend {
    fn name(&self) -> &str {
        "Aligned"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Accelerator
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            prefers_padded_matmul: true,
            parallel_dispatch: true,
            ..Default::default()
        }
    }

    fn supports(&self, task: &NodeTask<'_>) -> bool {
        if task.op != OpKind::MulMat {
            return false;
        }
        task.src.iter().all(|src| {
            src.is_some_and(|s| s.ne[0] % MATMUL_PAD == 0 && s.has_contiguous_rows())
        })
    }

    fn set_parallelism(&mut self, n: usize) {
        self.n_cb = n.max(1);
    }

    fn compute(&self, task: NodeTask<'_>) -> Result<(), BackendError> {
        if !self.supports(&task) {
            return Err(BackendError::Unsupported {
                backend: self.name().to_string(),
                op: task.op,
            });
        }
        kernels::run(self.name(), task, self.n_cb, dot_blocked)
    }
}

fn dot_blocked(x: &[f32], y: &[f32]) -> f32 {
    let mut acc = [0.0f32; MATMUL_PAD];
    for (xb, yb) in x.chunks_exact(MATMUL_PAD).zip(y.chunks_exact(MATMUL_PAD)) {
        for ((a, &xv), &yv) in acc.iter_mut().zip(xb).zip(yb) {
            *a += xv * yv;
        }
    }
    acc.iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_dot_matches_plain_dot() {
        let x: Vec<f32> = (0..64).map(|i| i as f32 * 0.5).collect();
        let y: Vec<f32> = (0..64).map(|i| 1.0 - i as f32 * 0.01).collect();
        let expected = kernels::dot(&x, &y);
        let actual = dot_blocked(&x, &y);
        assert!((expected - actual).abs() <= expected.abs() * 1e-5);
    }

    #[test]
    fn command_buffer_count_follows_parallelism() {
        let mut backend = AlignedBackend::new();
        assert_eq!(backend.n_cb(), 1);
        backend.set_parallelism(3);
        assert_eq!(backend.n_cb(), 3);
        backend.set_parallelism(0);
        assert_eq!(backend.n_cb(), 1);
    }
}
