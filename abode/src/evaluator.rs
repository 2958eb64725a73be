//! Evaluation of a recurrent policy over a vectorized environment.
use crate::{pause_envs, RecurrentPolicy, RolloutState};
use abode_core::{
    record::{Record, RecordValue},
    AbodeError, Env,
};
use abode_vec_env::{VecEnv, VecEnvConfig};
use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`RecurrentEvaluator`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EvaluatorConfig {
    /// Number of episodes each slot runs before being paused.
    pub episodes_per_slot: usize,

    /// Maximum number of batched steps of an evaluation.
    pub max_steps: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            episodes_per_slot: 1,
            max_steps: 10_000,
        }
    }
}

impl EvaluatorConfig {
    /// Sets the number of episodes per slot.
    pub fn episodes_per_slot(mut self, v: usize) -> Self {
        self.episodes_per_slot = v;
        self
    }

    /// Sets the maximum number of steps.
    pub fn max_steps(mut self, v: usize) -> Self {
        self.max_steps = v;
        self
    }

    /// Constructs [`EvaluatorConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`EvaluatorConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Runs a [`RecurrentPolicy`] until every slot completed its episodes.
///
/// A slot that completed `episodes_per_slot` episodes is paused, so the batch
/// shrinks as slots finish. All slots are resumed when the evaluation ends.
///
/// ```mermaid
/// flowchart TD
///     A[resume_all, reset] --> B[policy.act]
///     B --> C[VecEnv::step]
///     C --> D{slot finished?}
///     D -->|yes| E[pause_envs]
///     D -->|no| F{running slots and steps left?}
///     E --> F
///     F -->|yes| B
///     F -->|no| G[resume_all]
/// ```
///
/// The returned [`Record`] has
/// * `"Episode return"` - mean return of the completed episodes,
/// * `"Episodes"` - number of completed episodes.
pub struct RecurrentEvaluator<E: Env + 'static> {
    config: EvaluatorConfig,
    envs: VecEnv<E>,
}

impl<E: Env + 'static> RecurrentEvaluator<E> {
    /// Builds the evaluator and its environments.
    pub fn build(
        config: &EvaluatorConfig,
        vec_env_config: &VecEnvConfig,
        env_config: &E::Config,
    ) -> Result<Self> {
        if config.episodes_per_slot == 0 {
            return Err(AbodeError::ConfigurationError(
                "episodes_per_slot must be positive".to_string(),
            )
            .into());
        }
        Ok(Self {
            config: config.clone(),
            envs: VecEnv::build(vec_env_config, env_config)?,
        })
    }

    /// The controller of the environments.
    pub fn envs(&self) -> &VecEnv<E> {
        &self.envs
    }

    /// Evaluates `policy`.
    pub fn evaluate<P: RecurrentPolicy<E>>(&mut self, policy: &mut P) -> Result<Record> {
        let envs = &mut self.envs;
        envs.resume_all()?;
        let observations = envs.reset()?;
        let n = envs.num_envs();
        let mut state = RolloutState {
            hidden: policy.initial_hidden(n)?,
            masks: vec![false; n],
            current_returns: vec![0.0; n],
            observations,
        };
        let mut finished = vec![0usize; envs.num_slots()];
        let mut returns = vec![];
        let mut n_steps = 0;

        while envs.num_envs() > 0 && n_steps < self.config.max_steps {
            let (acts, hidden) = policy.act(&state.observations, &state.hidden, &state.masks)?;
            let step = envs.step(acts)?;
            n_steps += 1;

            let mut to_pause = vec![];
            for (i, &slot) in envs.running_slots().iter().enumerate() {
                state.current_returns[i] += step.rewards[i];
                if step.dones[i] {
                    returns.push(state.current_returns[i]);
                    state.current_returns[i] = 0.0;
                    finished[slot] += 1;
                    if finished[slot] >= self.config.episodes_per_slot {
                        to_pause.push(i);
                    }
                }
            }
            state.hidden = hidden;
            state.masks = step.dones.iter().map(|d| !d).collect();
            state.observations = step.observations;

            if !to_pause.is_empty() {
                debug!("Slots finished at step {}: {:?}", n_steps, to_pause);
                state = pause_envs(envs, &to_pause, state)?;
            }
        }
        envs.resume_all()?;

        let n_episodes = returns.len();
        let mean_return = match n_episodes {
            0 => 0.0,
            _ => returns.iter().sum::<f32>() / n_episodes as f32,
        };
        info!(
            "Evaluated {} episodes in {} steps, mean return {}",
            n_episodes, n_steps, mean_return
        );

        Ok(Record::from_slice(&[
            ("Episode return", RecordValue::Scalar(mean_return)),
            ("Episodes", RecordValue::Scalar(n_episodes as f32)),
        ]))
    }

    /// Stops the environments.
    pub fn close(&mut self) {
        self.envs.close();
    }
}
