//! Episode identifiers derived from done flags.
use ndarray::ArrayView2;

/// Per-record identifiers of a `(T, N)` rollout window, flattened row-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeIndex {
    /// Globally unique id of the episode each record belongs to.
    pub episode_ids: Vec<i64>,

    /// Environment slot of each record.
    pub environment_ids: Vec<i64>,

    /// Window-relative timestep of each record.
    ///
    /// Not reset at episode boundaries; only the ordering within an episode
    /// matters to the packer.
    pub step_ids: Vec<i64>,
}

impl EpisodeIndex {
    /// Labels each record of a `(T, N)` done matrix.
    ///
    /// `dones[[t, n]]` means the record at `(t, n)` is the last one of its
    /// episode, so the episode counter of slot `n` increments at `t + 1`.
    /// Episode ids are `counter * N + n`, which is injective over the window.
    pub fn from_dones(dones: ArrayView2<bool>) -> Self {
        let (n_steps, n_envs) = dones.dim();
        let len = n_steps * n_envs;
        let mut episode_ids = Vec::with_capacity(len);
        let mut environment_ids = Vec::with_capacity(len);
        let mut step_ids = Vec::with_capacity(len);
        let mut counters = vec![0i64; n_envs];

        for t in 0..n_steps {
            for n in 0..n_envs {
                episode_ids.push(counters[n] * n_envs as i64 + n as i64);
                environment_ids.push(n as i64);
                step_ids.push(t as i64);
            }
            for n in 0..n_envs {
                if dones[[t, n]] {
                    counters[n] += 1;
                }
            }
        }

        Self {
            episode_ids,
            environment_ids,
            step_ids,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.episode_ids.len()
    }

    /// Returns `true` if the window has no record.
    pub fn is_empty(&self) -> bool {
        self.episode_ids.is_empty()
    }
}
