use abode_core::{record::Record, Env, Step};

/// Messages that a slot receives.
pub(crate) enum SlotCommand<A> {
    /// Starts a new episode.
    Reset,

    /// Applies an action.
    Step(A),

    /// Stops the slot.
    Close,
}

/// Messages that the controller receives from a slot.
pub(crate) enum SlotResponse<O> {
    /// The environment was built.
    Ready,

    /// Initial observation of a new episode.
    Reset(O),

    /// Result of a step.
    Step(SlotStep<O>),

    /// The environment failed; the slot is no longer usable.
    Failed(String),
}

/// Result of a step of a single slot.
pub(crate) struct SlotStep<O> {
    pub obs: O,
    pub reward: f32,
    pub done: bool,
    pub info: Record,
    pub terminal_obs: Option<O>,
}

impl<O> SlotStep<O> {
    /// If the episode was reset after the step, the observation of the slot is the
    /// initial one of the new episode.
    pub fn from_step<E: Env<Obs = O>>(step: Step<E>) -> Self {
        let done = step.is_done();
        let (obs, terminal_obs) = match step.init_obs {
            Some(init_obs) => (init_obs, Some(step.obs)),
            None => (step.obs, None),
        };
        Self {
            obs,
            reward: step.reward,
            done,
            info: step.info,
            terminal_obs,
        }
    }
}

/// Batched result of [`VecEnv::wait_step`](crate::VecEnv::wait_step), in the
/// order of the running slots.
#[derive(Debug, Clone)]
pub struct VecStep<O> {
    /// Observations. For a slot reset after finishing its episode, this is the
    /// first observation of the new episode.
    pub observations: Vec<O>,

    /// Rewards.
    pub rewards: Vec<f32>,

    /// `true` where the step ended an episode.
    pub dones: Vec<bool>,

    /// Information returned by the environments.
    pub infos: Vec<Record>,

    /// Last observation of a finished episode, for slots reset after the step.
    pub terminal_observations: Vec<Option<O>>,
}

impl<O> VecStep<O> {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            observations: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            dones: Vec::with_capacity(n),
            infos: Vec::with_capacity(n),
            terminal_observations: Vec::with_capacity(n),
        }
    }

    pub(crate) fn push(&mut self, step: SlotStep<O>) {
        self.observations.push(step.obs);
        self.rewards.push(step.reward);
        self.dones.push(step.done);
        self.infos.push(step.info);
        self.terminal_observations.push(step.terminal_obs);
    }

    /// Number of slots in the batch.
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    /// Returns `true` for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}
