use thiserror::Error;

use crate::decoder::ConfigError;
use crate::graph::GraphError;
use crate::scheduler::SchedulerError;
use crate::tensor::TensorError;
use crate::vocab::VocabError;
use crate::weights::WeightsError;

/// Errors surfaced by a decode call or by decoder construction.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Graph allocation failed: {0}")]
    AllocationFailed(#[source] SchedulerError),

    #[error("Graph execution failed: {0}")]
    ExecutionFailed(#[source] SchedulerError),

    #[error("Encoder output is {actual:?} (frames, hidden), decoder expects {expected:?}")]
    InputShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Encoder output has {frames} frames, decoder is sized for at most {max_frames}")]
    TooManyFrames { frames: usize, max_frames: usize },

    #[error("Encoder output has no frames")]
    EmptyInput,

    #[error("Encoder output could not be laid out row-major")]
    InputLayout,

    #[error("Graph output '{0}' is missing")]
    MissingOutput(String),

    #[error("Decoder lock poisoned by an earlier panic")]
    LockPoisoned,

    #[error("Graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Tensor: {0}")]
    Tensor(#[from] TensorError),

    #[error("Scheduler: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Weights: {0}")]
    Weights(#[from] WeightsError),

    #[error("Vocabulary: {0}")]
    Vocab(#[from] VocabError),

    #[error("Config: {0}")]
    Config(#[from] ConfigError),
}

impl DecodeError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AllocationFailed(_) | Self::TooManyFrames { .. } => {
                "The recording is too long for the configured decoder. Raise the frame limit and try again."
            }
            Self::ExecutionFailed(_) | Self::Graph(_) | Self::Tensor(_) | Self::Scheduler(_) => {
                "The speech engine failed to run. Try restarting the app."
            }
            Self::InputShapeMismatch { .. }
            | Self::EmptyInput
            | Self::InputLayout
            | Self::MissingOutput(_) => {
                "The encoder output could not be decoded. Please try recording again."
            }
            Self::LockPoisoned => "The speech engine is busy. Please try again.",
            Self::Weights(_) | Self::Vocab(_) => {
                "Speech model files are missing or corrupted. Download the model again."
            }
            Self::Config(_) => "The decoder configuration could not be read. Check the settings file.",
        }
    }
}
