//! Routing of rollout rows and hidden states to and from the packed layout.
//!
//! [`build_rnn_inputs`] and [`build_rnn_out_from_seq`] are exact inverses on the
//! data rows: running the packed data through a core that returns its input
//! unchanged gives back the original `(T * N, feature)` tensor.
use crate::util::{index_tensor, zero_unkept};
use abode_core::{
    seq::{invert_permutation, SequenceDescriptor},
    AbodeError,
};
use anyhow::Result;
use candle_core::Tensor;
use log::trace;

/// Rows of a rollout window in packed order.
///
/// `data` holds the first record of every sequence, then the second record of
/// every sequence that is at least two long, and so on. `batch_sizes[d]` is the
/// number of sequences still active at depth `d`.
#[derive(Debug, Clone)]
pub struct PackedSequence {
    /// Packed rows, `(T * N, feature)`.
    pub data: Tensor,

    /// Number of active sequences at each depth, non-increasing.
    pub batch_sizes: Vec<usize>,
}

fn check_rows(x: &Tensor, masks: &[bool], info: &SequenceDescriptor) -> Result<()> {
    let rows = x.dim(0)?;
    if rows != info.len() || masks.len() != info.len() {
        return Err(AbodeError::UsageError(format!(
            "Expected {} rows and masks, got {} rows and {} masks",
            info.len(),
            rows,
            masks.len()
        ))
        .into());
    }
    Ok(())
}

/// Packs the rows of `x` and selects the initial hidden state of every sequence.
///
/// * `x` - `(T * N, feature)` rows in `(t, n)` order.
/// * `rnn_states` - `(layers, N, hidden)` state carried from the previous window.
/// * `masks` - `false` for a record whose episode started at that record.
///
/// The returned state has shape `(layers, num_sequences, hidden)`. The state of a
/// sequence is zeroed when its episode starts within the window, either because
/// it is not the first segment of its environment or because its first record
/// is masked.
pub fn build_rnn_inputs(
    x: &Tensor,
    rnn_states: &Tensor,
    masks: &[bool],
    info: &SequenceDescriptor,
) -> Result<(PackedSequence, Tensor)> {
    check_rows(x, masks, info)?;
    let n_envs = rnn_states.dim(1)?;
    if n_envs != info.num_environments() {
        return Err(AbodeError::UsageError(format!(
            "Hidden state holds {} environments, the window has {}",
            n_envs,
            info.num_environments()
        ))
        .into());
    }

    let select = index_tensor(&info.select_inds, x.device())?;
    let data = x.index_select(&select, 0)?;

    let batch_inds = index_tensor(&info.rnn_state_batch_inds, rnn_states.device())?;
    let states = rnn_states.index_select(&batch_inds, 1)?;

    let keep = info
        .sequence_starts
        .iter()
        .zip(info.first_sequence_in_batch_mask.iter())
        .map(|(&start, &first)| masks[start] && first)
        .collect::<Vec<_>>();
    trace!("Sequence state keep mask: {:?}", keep);
    let states = zero_unkept(&states, &keep)?;

    let packed = PackedSequence {
        data,
        batch_sizes: info.num_seqs_at_step.clone(),
    };
    Ok((packed, states))
}

/// Restores the row order of the core output and collects the final hidden state
/// of every environment.
///
/// * `out` - Output of the core in packed order.
/// * `hidden_states` - `(layers, num_sequences, hidden)` final state of every
///   sequence.
///
/// Returns the `(T * N, feature)` output in `(t, n)` order and the
/// `(layers, N, hidden)` state, where row `n` comes from the last segment of the
/// environment with rank `n`.
pub fn build_rnn_out_from_seq(
    out: &PackedSequence,
    hidden_states: &Tensor,
    info: &SequenceDescriptor,
) -> Result<(Tensor, Tensor)> {
    let inverse = index_tensor(&info.inverse_select_inds(), out.data.device())?;
    let x = out.data.index_select(&inverse, 0)?;

    let last = &info.last_sequence_in_batch_inds;
    let ranks = last
        .iter()
        .map(|&s| info.rnn_state_batch_inds[s])
        .collect::<Vec<_>>();
    let gather = invert_permutation(&ranks)
        .into_iter()
        .map(|k| last[k])
        .collect::<Vec<_>>();
    let gather = index_tensor(&gather, hidden_states.device())?;
    let hidden = hidden_states.index_select(&gather, 1)?;

    Ok((x, hidden))
}

/// Zeroes the hidden state of every environment whose mask is `false`.
///
/// Used for a single step, where `hidden` is `(layers, N, hidden)` and `masks`
/// holds one flag per environment. Returns a new tensor.
pub fn mask_hidden_states(hidden: &Tensor, masks: &[bool]) -> Result<Tensor> {
    let n = hidden.dim(1)?;
    if masks.len() != n {
        return Err(AbodeError::UsageError(format!(
            "Expected {} masks, got {}",
            n,
            masks.len()
        ))
        .into());
    }
    zero_unkept(hidden, masks)
}
