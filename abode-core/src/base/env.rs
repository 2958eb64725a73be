//! Environment.
use super::{Act, Obs, Step};
use anyhow::Result;

/// Represents a simulation environment exposing a step/reset contract.
///
/// Physics, rendering and sensor computation live behind this trait; the
/// vectorized controller only relies on observations, rewards, done flags and
/// infos.
pub trait Env {
    /// Configurations.
    type Config: Clone + Send + 'static;

    /// Observation of the environment.
    type Obs: Obs;

    /// Action of the environment.
    type Act: Act;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Starts a new episode and returns its first observation.
    fn reset(&mut self) -> Result<Self::Obs>;

    /// Performes an environment step.
    fn step(&mut self, a: &Self::Act) -> Result<Step<Self>>
    where
        Self: Sized;

    /// Releases resources held by the environment.
    ///
    /// Called once by the controller when it shuts the slot down.
    fn close(&mut self) {}
}
