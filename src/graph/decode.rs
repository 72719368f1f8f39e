use crate::backend::BackendCapabilities;
use crate::tensor::DType;
use crate::weights::CtcWeights;

use super::{mul_mat_pad, Graph, GraphBuilder, GraphError, MetaArena, MATMUL_PAD};

pub const ENCODER_OUT: &str = "encoder_out";
pub const LOGITS_PROBS: &str = "ctc_probs";
pub const LOGITS_ARGMAX: &str = "ctc_argmax";

const CTC_WEIGHT: &str = "ctc.ctc_lo.weight";
const CTC_BIAS: &str = "ctc.ctc_lo.bias";

/// Builds `argmax(softmax(encoder_out @ W^T + b))` for a `(frames, hidden)`
/// encoder output.
///
/// Only descriptors are recorded; the weights are borrowed read-only and no
/// tensor storage is allocated.
pub fn build_decode_graph<'a>(
    meta: &'a mut MetaArena,
    (n_frames, n_hidden): (usize, usize),
    weights: &'a CtcWeights,
    caps: BackendCapabilities,
) -> Result<Graph<'a>, GraphError> {
    let mut b = GraphBuilder::new(meta);

    let encoder_out = b.new_tensor_2d(ENCODER_OUT, DType::F32, n_hidden, n_frames)?;
    b.set_input(encoder_out)?;

    let weight = b.param_2d(
        CTC_WEIGHT,
        weights.weight(),
        weights.hidden_dim(),
        weights.vocab_size(),
    )?;
    let bias = b.param_1d(CTC_BIAS, weights.bias())?;

    let cur = if caps.prefers_padded_matmul {
        mul_mat_pad(&mut b, weight, encoder_out, MATMUL_PAD)?
    } else {
        b.mul_mat(weight, encoder_out)?
    };
    let cur = b.add(cur, bias)?;

    let probs = b.soft_max(cur)?;
    let argmax = b.argmax(probs)?;
    b.set_output(probs)?;
    b.set_output(argmax)?;

    b.set_name(probs, LOGITS_PROBS)?;
    b.set_name(argmax, LOGITS_ARGMAX)?;

    log::debug!(
        "Built CTC decode graph: frames={}, hidden={}, vocab={}, nodes={}, padded={}",
        n_frames,
        n_hidden,
        weights.vocab_size(),
        b.n_nodes(),
        caps.prefers_padded_matmul
    );

    b.finish(argmax)
}
