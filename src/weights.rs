use ndarray::{Array1, Array2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeightsError {
    #[error("CTC bias has {actual} values, the projection has {expected} output rows")]
    BiasLength { expected: usize, actual: usize },
    #[error("CTC projection is empty: {vocab} x {hidden}")]
    Empty { vocab: usize, hidden: usize },
}

/// Read-only CTC output projection.
///
/// The weight is stored the way linear layers ship it: one row of `hidden`
/// values per vocabulary entry, i.e. shape `(vocab, hidden)` row-major.
#[derive(Debug, Clone)]
pub struct CtcWeights {
    weight: Vec<f32>,
    bias: Vec<f32>,
    vocab_size: usize,
    hidden_dim: usize,
}

impl CtcWeights {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self, WeightsError> {
        let (vocab_size, hidden_dim) = weight.dim();
        if vocab_size == 0 || hidden_dim == 0 {
            return Err(WeightsError::Empty {
                vocab: vocab_size,
                hidden: hidden_dim,
            });
        }
        if bias.len() != vocab_size {
            return Err(WeightsError::BiasLength {
                expected: vocab_size,
                actual: bias.len(),
            });
        }

        log::debug!(
            "CTC projection loaded: vocab={}, hidden={}",
            vocab_size,
            hidden_dim
        );

        Ok(Self {
            weight: weight.iter().copied().collect(),
            bias: bias.to_vec(),
            vocab_size,
            hidden_dim,
        })
    }

    /// Takes the projection as `(hidden, vocab)`, one column per class, the
    /// way `encoder_out · W` reads it.
    pub fn from_projection(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self, WeightsError> {
        Self::new(weight.reversed_axes(), bias)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }
}
