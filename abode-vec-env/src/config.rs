//! Configuration of [`VecEnv`](crate::VecEnv).
use abode_core::AbodeError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// How environment slots are executed.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum Backend {
    /// One thread per slot; slots step in parallel.
    Threaded,

    /// All slots step in lockstep in the thread owning the controller.
    InProcess,
}

/// Configuration of [`VecEnv`](crate::VecEnv).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct VecEnvConfig {
    /// Number of environment slots.
    pub num_envs: usize,

    /// Execution backend.
    pub backend: Backend,

    /// If `true`, a slot whose episode finished is reset before its step
    /// result is returned.
    pub auto_reset_done: bool,

    /// Seed of slot 0. Slot `i` is built with `seed + i`.
    pub seed: i64,
}

impl Default for VecEnvConfig {
    fn default() -> Self {
        Self {
            num_envs: 1,
            backend: Backend::Threaded,
            auto_reset_done: true,
            seed: 0,
        }
    }
}

impl VecEnvConfig {
    /// Sets the number of slots.
    pub fn num_envs(mut self, v: usize) -> Self {
        self.num_envs = v;
        self
    }

    /// Sets the backend.
    pub fn backend(mut self, v: Backend) -> Self {
        self.backend = v;
        self
    }

    /// Sets the auto reset flag.
    pub fn auto_reset_done(mut self, v: bool) -> Self {
        self.auto_reset_done = v;
        self
    }

    /// Sets the seed of slot 0.
    pub fn seed(mut self, v: i64) -> Self {
        self.seed = v;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<(), AbodeError> {
        if self.num_envs == 0 {
            return Err(AbodeError::ConfigurationError(
                "num_envs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Constructs [`VecEnvConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`VecEnvConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
