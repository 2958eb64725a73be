//! A deterministic environment used for tests and demos.
//!
//! [`CountdownEnv`] runs episodes of a fixed number of steps. The reward of a
//! step is the action itself, which makes it easy to check that actions reach
//! the right slot of a vectorized controller.
use crate::{
    record::{Record, RecordValue},
    sensor::{ObservationSpace, Observations, Sensor, SensorSuite},
    Env, Step,
};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Configuration of [`CountdownEnv`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountdownEnvConfig {
    /// Number of steps of an episode for seed 0.
    pub episode_length: usize,

    /// Extra steps per unit of seed, so slots built with different seeds
    /// finish their episodes at different times.
    pub length_per_seed: usize,

    /// If set, `step` fails once this many steps were taken over the lifetime
    /// of the environment built with seed `fail_seed`.
    pub fail_at_step: Option<usize>,

    /// Seed of the environment that fails, see `fail_at_step`.
    pub fail_seed: i64,

    /// Panic instead of returning an error when failing.
    pub panic_on_failure: bool,
}

impl Default for CountdownEnvConfig {
    fn default() -> Self {
        Self {
            episode_length: 3,
            length_per_seed: 0,
            fail_at_step: None,
            fail_seed: 0,
            panic_on_failure: false,
        }
    }
}

impl CountdownEnvConfig {
    /// Sets the episode length.
    pub fn episode_length(mut self, v: usize) -> Self {
        self.episode_length = v;
        self
    }

    /// Sets the extra length per unit of seed.
    pub fn length_per_seed(mut self, v: usize) -> Self {
        self.length_per_seed = v;
        self
    }

    /// Makes the environment with seed `seed` fail at its `step`-th step.
    pub fn fail_at(mut self, seed: i64, step: usize) -> Self {
        self.fail_seed = seed;
        self.fail_at_step = Some(step);
        self
    }

    /// Panic instead of returning an error when failing.
    pub fn panic_on_failure(mut self, v: bool) -> Self {
        self.panic_on_failure = v;
        self
    }
}

/// Simulator state read by the sensors of [`CountdownEnv`].
#[derive(Debug, Clone)]
pub struct CountdownState {
    /// Seed the environment was built with.
    pub seed: i64,

    /// Steps taken in the current episode.
    pub step: usize,

    /// Number of steps of an episode.
    pub episode_length: usize,

    /// Number of episodes started so far.
    pub episode: usize,
}

struct SeedSensor;

impl Sensor<CountdownState> for SeedSensor {
    fn uuid(&self) -> &str {
        "seed"
    }

    fn observation_space(&self) -> ObservationSpace {
        ObservationSpace {
            shape: vec![1],
            low: f32::MIN,
            high: f32::MAX,
        }
    }

    fn get_observation(&self, state: &CountdownState) -> Vec<f32> {
        vec![state.seed as f32]
    }
}

struct RemainingSensor;

impl Sensor<CountdownState> for RemainingSensor {
    fn uuid(&self) -> &str {
        "remaining"
    }

    fn observation_space(&self) -> ObservationSpace {
        ObservationSpace {
            shape: vec![1],
            low: 0.0,
            high: f32::MAX,
        }
    }

    fn get_observation(&self, state: &CountdownState) -> Vec<f32> {
        vec![(state.episode_length - state.step) as f32]
    }
}

/// An environment whose episodes last a fixed number of steps.
pub struct CountdownEnv {
    config: CountdownEnvConfig,
    state: CountdownState,
    sensors: SensorSuite<CountdownState>,
    total_steps: usize,
}

impl CountdownEnv {
    /// Returns the state of the environment.
    pub fn state(&self) -> &CountdownState {
        &self.state
    }
}

impl Env for CountdownEnv {
    type Config = CountdownEnvConfig;
    type Obs = Observations;
    type Act = i64;

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        if config.episode_length == 0 {
            bail!("episode_length must be positive");
        }
        let episode_length = config.episode_length + seed.max(0) as usize * config.length_per_seed;
        let sensors: Vec<Box<dyn Sensor<CountdownState>>> =
            vec![Box::new(SeedSensor), Box::new(RemainingSensor)];
        let sensors = SensorSuite::new(sensors)?;

        Ok(Self {
            config: config.clone(),
            state: CountdownState {
                seed,
                step: 0,
                episode_length,
                episode: 0,
            },
            sensors,
            total_steps: 0,
        })
    }

    fn reset(&mut self) -> Result<Self::Obs> {
        self.state.step = 0;
        self.state.episode += 1;
        Ok(self.sensors.get_observations(&self.state))
    }

    fn step(&mut self, a: &Self::Act) -> Result<Step<Self>> {
        self.total_steps += 1;
        if self.state.seed == self.config.fail_seed && self.config.fail_at_step == Some(self.total_steps) {
            if self.config.panic_on_failure {
                panic!("CountdownEnv {} crashed", self.state.seed);
            }
            bail!("CountdownEnv {} failed at step {}", self.state.seed, self.total_steps);
        }

        self.state.step = (self.state.step + 1).min(self.state.episode_length);
        let is_terminated = self.state.step == self.state.episode_length;
        let info = Record::from_slice(&[
            ("episode", RecordValue::Scalar(self.state.episode as f32)),
            ("step", RecordValue::Scalar(self.state.step as f32)),
        ]);
        let obs = self.sensors.get_observations(&self.state);

        Ok(Step::new(obs, *a, *a as f32, is_terminated, false, info))
    }
}
