//! Greedy CTC decode over an encoder output.
//!
//! Every call builds a fresh decode graph in the decoder's descriptor arena,
//! runs it on the scheduler and maps the per-frame argmax ids to tokens,
//! skipping the blank id. Repeated ids are not collapsed.

mod config;
mod state;
mod transcript;

use std::time::Instant;

use ndarray::ArrayView2;

use crate::backend::{AlignedBackend, Backend, CpuBackend};
use crate::error::DecodeError;
use crate::graph::{build_decode_graph, MetaArena, ENCODER_OUT, LOGITS_ARGMAX, LOGITS_PROBS};
use crate::scheduler::{BackendScheduler, SchedulerError};
use crate::tensor::TensorError;
use crate::vocab::{render_text, Vocabulary, BLANK_ID};
use crate::weights::CtcWeights;

pub use config::{ConfigError, DecoderConfig};
pub use state::{DecodeTimings, DecoderState};
pub use transcript::Transcript;

/// Backends for `config`, in preference order.
pub fn default_backends(config: &DecoderConfig) -> Vec<Box<dyn Backend>> {
    let mut backends: Vec<Box<dyn Backend>> = Vec::with_capacity(2);
    if config.prefer_accelerator {
        backends.push(Box::new(AlignedBackend::new()));
    }
    backends.push(Box::new(CpuBackend::new()));
    backends
}

/// Winning class of every frame and its softmax probability.
struct FrameScores {
    ids: Vec<i32>,
    confidences: Vec<f32>,
}

pub struct CtcDecoder {
    weights: CtcWeights,
    vocab: Box<dyn Vocabulary>,
    config: DecoderConfig,
    meta: MetaArena,
    scheduler: BackendScheduler,
    state: DecoderState,
}

impl Drop for CtcDecoder {
    fn drop(&mut self) {
        let timings = self.state.timings();
        log::debug!(
            "Dropping CTC decoder after {} calls ({} us total, {} us avg)",
            timings.n_decode,
            timings.t_decode_us,
            timings.avg_decode_us()
        );
    }
}

impl CtcDecoder {
    pub fn new<V>(weights: CtcWeights, vocab: V, config: DecoderConfig) -> Result<Self, DecodeError>
    where
        V: Vocabulary + 'static,
    {
        let backends = default_backends(&config);
        Self::with_backends(weights, Box::new(vocab), config, backends)
    }

    /// Unless `config.arena_bytes` is set, the arena is reserved here for a
    /// `max_frames` graph so decode calls never grow it.
    pub fn with_backends(
        weights: CtcWeights,
        vocab: Box<dyn Vocabulary>,
        config: DecoderConfig,
        backends: Vec<Box<dyn Backend>>,
    ) -> Result<Self, DecodeError> {
        let start = Instant::now();
        let mut scheduler = BackendScheduler::new(backends, config.arena_bytes.unwrap_or(0))?;
        let mut meta = MetaArena::default();

        if config.arena_bytes.is_none() {
            let graph = build_decode_graph(
                &mut meta,
                (config.max_frames, weights.hidden_dim()),
                &weights,
                scheduler.capabilities(),
            )?;
            scheduler.reserve(&graph)?;
        }

        if vocab.len() < weights.vocab_size() {
            log::warn!(
                "Vocabulary has {} tokens but the projection emits {} classes",
                vocab.len(),
                weights.vocab_size()
            );
        }

        log::info!(
            "CTC decoder ready in {:?}: vocab={}, hidden={}, max_frames={}, arena={} bytes",
            start.elapsed(),
            weights.vocab_size(),
            weights.hidden_dim(),
            config.max_frames,
            scheduler.arena_bytes()
        );

        Ok(Self {
            weights,
            vocab,
            config,
            meta,
            scheduler,
            state: DecoderState::default(),
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn weights(&self) -> &CtcWeights {
        &self.weights
    }

    pub fn scheduler(&self) -> &BackendScheduler {
        &self.scheduler
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn timings(&self) -> DecodeTimings {
        self.state.timings()
    }

    /// Decodes with the configured thread count.
    pub fn transcribe(&mut self, encoder_out: ArrayView2<'_, f32>) -> Result<Transcript, DecodeError> {
        self.decode(encoder_out, self.config.n_threads)
    }

    /// Runs one greedy decode over a `(frames, hidden)` encoder output.
    ///
    /// On success the per-frame ids are stored in [`DecoderState::ids`] and
    /// the elapsed time is added to the session total. Failed calls leave the
    /// session state untouched.
    pub fn decode(
        &mut self,
        encoder_out: ArrayView2<'_, f32>,
        n_threads: usize,
    ) -> Result<Transcript, DecodeError> {
        let start = Instant::now();
        let (n_frames, n_hidden) = encoder_out.dim();
        self.check_input(n_frames, n_hidden)?;

        let input = encoder_out.as_standard_layout();
        let values = input.as_slice().ok_or(DecodeError::InputLayout)?;

        let FrameScores { ids, confidences } =
            self.run_graph(values, (n_frames, n_hidden), n_threads)?;
        if ids.len() != n_frames {
            return Err(TensorError::ElementCount {
                name: LOGITS_ARGMAX.to_string(),
                expected: n_frames,
                actual: ids.len(),
            }
            .into());
        }

        let mut transcript = Transcript::default();
        for (t, (&id, &confidence)) in ids.iter().zip(&confidences).enumerate() {
            if id == BLANK_ID {
                continue;
            }
            let Some(token) = self.vocab.token(id) else {
                log::warn!("Frame {t}: class id {id} has no vocabulary entry");
                continue;
            };

            transcript.tokens.push(token.to_string());
            transcript.token_ids.push(id);
            transcript
                .timestamps
                .push(t as f32 * self.config.frame_shift_sec);
            transcript.confidences.push(confidence);
        }
        transcript.text = render_text(&transcript.tokens);

        let elapsed = start.elapsed();
        self.state.record(
            ids,
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
        );
        log::debug!(
            "CTC decode: frames={}, tokens={}, threads={}, took {:?}",
            n_frames,
            transcript.token_ids.len(),
            n_threads,
            elapsed
        );
        Ok(transcript)
    }

    fn check_input(&self, n_frames: usize, n_hidden: usize) -> Result<(), DecodeError> {
        if n_frames == 0 {
            return Err(DecodeError::EmptyInput);
        }
        let hidden = self.weights.hidden_dim();
        if n_hidden != hidden {
            return Err(DecodeError::InputShapeMismatch {
                expected: (n_frames, hidden),
                actual: (n_frames, n_hidden),
            });
        }
        if n_frames > self.config.max_frames {
            return Err(DecodeError::TooManyFrames {
                frames: n_frames,
                max_frames: self.config.max_frames,
            });
        }
        Ok(())
    }

    /// Build, allocate, bind and execute. The allocation guard resets the
    /// scheduler on every return path.
    ///
    /// Only the argmax ids and one probability per frame leave the arena.
    fn run_graph(
        &mut self,
        values: &[f32],
        shape: (usize, usize),
        n_threads: usize,
    ) -> Result<FrameScores, DecodeError> {
        let caps = self.scheduler.capabilities();
        let graph = build_decode_graph(&mut self.meta, shape, &self.weights, caps)?;

        let mut allocation = self.scheduler.allocate(&graph).map_err(|err| {
            log::error!("CTC graph allocation failed: {err}");
            DecodeError::AllocationFailed(err)
        })?;
        allocation.bind_input_f32(ENCODER_OUT, values)?;

        let terminal = graph.terminal();
        allocation
            .execute_with(n_threads, |outputs| {
                let ids = outputs.i32(terminal)?;
                let probs_id = outputs
                    .output(LOGITS_PROBS)
                    .ok_or_else(|| SchedulerError::NotAnOutput(LOGITS_PROBS.to_string()))?;
                let n_classes = outputs.desc(probs_id)?.ne[0];
                let probs = outputs.f32(probs_id)?;

                let confidences = ids
                    .iter()
                    .enumerate()
                    .map(|(t, &id)| {
                        usize::try_from(id)
                            .ok()
                            .filter(|&class| class < n_classes)
                            .and_then(|class| probs.get(t * n_classes + class))
                            .copied()
                            .unwrap_or(0.0)
                    })
                    .collect();
                Ok(FrameScores {
                    ids: ids.to_vec(),
                    confidences,
                })
            })
            .map_err(|err| match err {
                SchedulerError::NotAnOutput(name) => DecodeError::MissingOutput(name),
                SchedulerError::Tensor(err) => DecodeError::Tensor(err),
                err => {
                    log::error!("CTC graph execution failed: {err}");
                    DecodeError::ExecutionFailed(err)
                }
            })
    }
}
