//! Thread-safe decoder facade.

use std::sync::Mutex;
use std::time::Instant;

use ndarray::ArrayView2;

use crate::decoder::{CtcDecoder, DecodeTimings, Transcript};
use crate::error::DecodeError;

/// Serializes whole decode calls so concurrent callers never interleave on
/// one scheduler arena.
pub struct SharedDecoder {
    decoder: Mutex<CtcDecoder>,
}

impl SharedDecoder {
    pub fn new(decoder: CtcDecoder) -> Self {
        Self {
            decoder: Mutex::new(decoder),
        }
    }

    pub fn decode(
        &self,
        encoder_out: ArrayView2<'_, f32>,
        n_threads: usize,
    ) -> Result<Transcript, DecodeError> {
        let mut guard = self.decoder.lock().map_err(|_| DecodeError::LockPoisoned)?;

        let start = Instant::now();
        let result = guard.decode(encoder_out, n_threads);
        match &result {
            Ok(transcript) => log::info!(
                "Decoded {} tokens in {:?}",
                transcript.token_ids.len(),
                start.elapsed()
            ),
            Err(err) => log::error!("Decode failed: {err}"),
        }
        result
    }

    pub fn transcribe(&self, encoder_out: ArrayView2<'_, f32>) -> Result<Transcript, DecodeError> {
        let n_threads = self
            .decoder
            .lock()
            .map_err(|_| DecodeError::LockPoisoned)?
            .config()
            .n_threads;
        self.decode(encoder_out, n_threads)
    }

    pub fn timings(&self) -> Result<DecodeTimings, DecodeError> {
        self.decoder
            .lock()
            .map(|guard| guard.timings())
            .map_err(|_| DecodeError::LockPoisoned)
    }

    pub fn into_inner(self) -> Result<CtcDecoder, DecodeError> {
        self.decoder
            .into_inner()
            .map_err(|_| DecodeError::LockPoisoned)
    }
}
