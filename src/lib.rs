pub mod backend;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod graph;
pub mod scheduler;
pub mod tensor;
pub mod vocab;
pub mod weights;

pub use decoder::{CtcDecoder, DecodeTimings, DecoderConfig, Transcript};
pub use engine::SharedDecoder;
pub use error::DecodeError;
pub use vocab::{TokenTable, Vocabulary, BLANK_ID};
pub use weights::CtcWeights;
