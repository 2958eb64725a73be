//! Pausing slots while keeping caller-held per-slot data aligned.
use abode_candle_rnn::util::index_tensor;
use abode_core::{AbodeError, Env};
use abode_vec_env::VecEnv;
use anyhow::Result;
use candle_core::Tensor;
use log::debug;

/// Per-slot data held by a rollout loop, in the order of the running slots.
#[derive(Debug, Clone)]
pub struct RolloutState<O> {
    /// `(layers, N, hidden)` recurrent state.
    pub hidden: Tensor,

    /// Masks of the next step.
    pub masks: Vec<bool>,

    /// Return of the running episode of every slot.
    pub current_returns: Vec<f32>,

    /// Latest observation of every slot.
    pub observations: Vec<O>,
}

impl<O: Clone> RolloutState<O> {
    /// Number of slots.
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Keeps the slots at positions `keep`, in that order.
    pub fn select(&self, keep: &[usize]) -> Result<Self> {
        let hidden = match keep.is_empty() {
            true => self.hidden.narrow(1, 0, 0)?,
            false => self
                .hidden
                .index_select(&index_tensor(keep, self.hidden.device())?, 1)?,
        };
        Ok(Self {
            hidden,
            masks: keep.iter().map(|&i| self.masks[i]).collect(),
            current_returns: keep.iter().map(|&i| self.current_returns[i]).collect(),
            observations: keep.iter().map(|&i| self.observations[i].clone()).collect(),
        })
    }
}

/// Pauses the running slots at positions `envs_to_pause` and drops the same
/// positions from `state`.
///
/// Positions refer to the running slots before the call. They are paused in
/// descending order so that every position stays valid while the others are
/// removed.
pub fn pause_envs<E: Env + 'static>(
    envs: &mut VecEnv<E>,
    envs_to_pause: &[usize],
    state: RolloutState<E::Obs>,
) -> Result<RolloutState<E::Obs>> {
    if envs_to_pause.is_empty() {
        return Ok(state);
    }
    let n = envs.num_envs();
    if state.len() != n || state.hidden.dim(1)? != n {
        return Err(AbodeError::UsageError(format!(
            "Rollout state holds {} slots, {} are running",
            state.len(),
            n
        ))
        .into());
    }

    let mut to_pause = envs_to_pause.to_vec();
    to_pause.sort_unstable();
    to_pause.dedup();
    for &index in to_pause.iter().rev() {
        envs.pause_at(index)?;
    }
    debug!("Paused positions {:?}", to_pause);

    let keep = (0..n)
        .filter(|i| to_pause.binary_search(i).is_err())
        .collect::<Vec<_>>();
    state.select(&keep)
}
