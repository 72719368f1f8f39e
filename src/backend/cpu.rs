use super::kernels;
use super::{Backend, BackendCapabilities, BackendError, BackendKind, NodeTask};

/// Host backend that runs every op, fanning rows out over worker threads.
#[derive(Debug)]
pub struct CpuBackend {
    n_threads: usize,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self { n_threads: 1 }
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        "CPU"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            cpu_threads: true,
            ..Default::default()
        }
    }

    fn supports(&self, _task: &NodeTask<'_>) -> bool {
        true
    }

    fn set_parallelism(&mut self, n: usize) {
        self.n_threads = n.max(1);
    }

    fn compute(&self, task: NodeTask<'_>) -> Result<(), BackendError> {
        kernels::run(self.name(), task, self.n_threads, kernels::dot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallelism_is_clamped_to_one_thread() {
        let mut backend = CpuBackend::new();
        assert_eq!(backend.n_threads(), 1);
        backend.set_parallelism(4);
        assert_eq!(backend.n_threads(), 4);
        backend.set_parallelism(0);
        assert_eq!(backend.n_threads(), 1);
    }
}
