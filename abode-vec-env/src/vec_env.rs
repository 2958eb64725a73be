use crate::{
    backend::{InProcessExecutor, SlotExecutor, ThreadedExecutor},
    messages::{SlotCommand, SlotResponse},
    Backend, VecEnvConfig, VecStep,
};
use abode_core::{AbodeError, Env};
use log::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Failed,
    Closed,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// A pool of environment slots stepped as a batch.
///
/// Slot `i` runs an environment built with seed `config.seed + i`. Every slot is
/// either running or paused:
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Running: build
///     Running --> Paused: pause_at
///     Paused --> Running: resume_all
///     Running --> [*]: close
///     Paused --> [*]: close
/// ```
///
/// Batched calls ([`VecEnv::reset`], [`VecEnv::async_step`],
/// [`VecEnv::wait_step`]) only involve the running slots, in ascending slot order
/// unless slots were paused since the last [`VecEnv::resume_all`]. Pausing
/// removes a slot from the batch and keeps the relative order of the others, so
/// the caller re-indexes its per-slot data by dropping the same positions.
///
/// # Errors
///
/// * [`AbodeError::ConfigurationError`] - zero slots, or as many actions as
///   running slots were not given.
/// * [`AbodeError::UsageError`] - two [`VecEnv::async_step`] calls without
///   [`VecEnv::wait_step`] in between, [`VecEnv::wait_step`] without a pending
///   step, an invalid pause position, or any call after [`VecEnv::close`] or after
///   a worker failure.
/// * [`AbodeError::WorkerFailure`] - an environment returned an error or
///   panicked. Raised by [`VecEnv::wait_step`] and the reset methods; the
///   controller is unusable afterwards and only [`VecEnv::close`] is allowed.
pub struct VecEnv<E: Env + 'static> {
    executor: Box<dyn SlotExecutor<E>>,
    running: Vec<usize>,
    paused: Vec<usize>,
    pending_step: bool,
    state: State,
}

impl<E: Env + 'static> VecEnv<E> {
    /// Builds the environments of every slot.
    pub fn build(config: &VecEnvConfig, env_config: &E::Config) -> Result<Self, AbodeError> {
        config.validate()?;
        let executor: Box<dyn SlotExecutor<E>> = match config.backend {
            Backend::Threaded => Box::new(ThreadedExecutor::<E>::build(
                config.num_envs,
                env_config,
                config.seed,
                config.auto_reset_done,
            )?),
            Backend::InProcess => Box::new(InProcessExecutor::<E>::build(
                config.num_envs,
                env_config,
                config.seed,
                config.auto_reset_done,
            )?),
        };
        info!(
            "Built {} environments with {:?} backend",
            config.num_envs, config.backend
        );

        Ok(Self {
            executor,
            running: (0..config.num_envs).collect(),
            paused: vec![],
            pending_step: false,
            state: State::Open,
        })
    }

    fn check_open(&self) -> Result<(), AbodeError> {
        match self.state {
            State::Open => Ok(()),
            State::Failed => Err(AbodeError::UsageError(
                "The controller failed; close it and build a new one".to_string(),
            )),
            State::Closed => Err(AbodeError::UsageError(
                "The controller is closed".to_string(),
            )),
        }
    }

    fn check_idle(&self, op: &str) -> Result<(), AbodeError> {
        self.check_open()?;
        if self.pending_step {
            return Err(AbodeError::UsageError(format!(
                "{} called while a step is pending",
                op
            )));
        }
        Ok(())
    }

    /// Moves the controller to the terminal failed state.
    fn fail(&mut self, e: AbodeError) -> AbodeError {
        warn!("{}", e);
        self.state = State::Failed;
        e
    }

    /// Sends `Reset` to `slots` and collects the initial observations.
    fn reset_slots(&mut self, slots: &[usize]) -> Result<Vec<E::Obs>, AbodeError> {
        for &slot in slots.iter() {
            self.executor.send(slot, SlotCommand::Reset);
        }

        let mut observations = Vec::with_capacity(slots.len());
        let mut error = None;
        for &slot in slots.iter() {
            match self.executor.recv(slot) {
                Ok(SlotResponse::Reset(obs)) => observations.push(obs),
                Ok(_) => {
                    error.get_or_insert(AbodeError::WorkerFailure {
                        slot,
                        message: "unexpected response to reset".to_string(),
                    });
                }
                Err(e) => {
                    error.get_or_insert(e);
                }
            }
        }

        match error {
            Some(e) => Err(self.fail(e)),
            None => Ok(observations),
        }
    }

    /// Starts a new episode in every running slot and returns the initial
    /// observations.
    pub fn reset(&mut self) -> Result<Vec<E::Obs>, AbodeError> {
        self.check_idle("reset")?;
        let slots = self.running.clone();
        debug!("Reset slots {:?}", slots);
        self.reset_slots(&slots)
    }

    /// Starts a new episode in the running slot at position `index`.
    pub fn reset_at(&mut self, index: usize) -> Result<E::Obs, AbodeError> {
        self.check_idle("reset_at")?;
        let slot = self.running_slot(index)?;
        let mut obs = self.reset_slots(&[slot])?;
        obs.pop().ok_or_else(|| AbodeError::WorkerFailure {
            slot,
            message: "no observation".to_string(),
        })
    }

    fn running_slot(&self, index: usize) -> Result<usize, AbodeError> {
        self.running.get(index).copied().ok_or_else(|| {
            AbodeError::UsageError(format!(
                "Index {} out of range, {} slots are running",
                index,
                self.running.len()
            ))
        })
    }

    /// Dispatches one action to every running slot without waiting for the
    /// results.
    pub fn async_step(&mut self, actions: Vec<E::Act>) -> Result<(), AbodeError> {
        self.check_idle("async_step")?;
        if actions.len() != self.running.len() {
            return Err(AbodeError::ConfigurationError(format!(
                "Got {} actions for {} running slots",
                actions.len(),
                self.running.len()
            )));
        }

        for (&slot, act) in self.running.iter().zip(actions.into_iter()) {
            self.executor.send(slot, SlotCommand::Step(act));
        }
        self.pending_step = true;
        Ok(())
    }

    /// Waits for the step dispatched by [`VecEnv::async_step`].
    ///
    /// Results are in the order of the running slots.
    pub fn wait_step(&mut self) -> Result<VecStep<E::Obs>, AbodeError> {
        self.check_open()?;
        if !self.pending_step {
            return Err(AbodeError::UsageError(
                "wait_step called without async_step".to_string(),
            ));
        }
        self.pending_step = false;

        let mut batch = VecStep::with_capacity(self.running.len());
        let mut error = None;
        for &slot in self.running.iter() {
            match self.executor.recv(slot) {
                Ok(SlotResponse::Step(step)) => batch.push(step),
                Ok(_) => {
                    error.get_or_insert(AbodeError::WorkerFailure {
                        slot,
                        message: "unexpected response to step".to_string(),
                    });
                }
                Err(e) => {
                    error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = error {
            return Err(self.fail(e));
        }

        trace!("Step results: rewards {:?}, dones {:?}", batch.rewards, batch.dones);
        Ok(batch)
    }

    /// [`VecEnv::async_step`] followed by [`VecEnv::wait_step`].
    pub fn step(&mut self, actions: Vec<E::Act>) -> Result<VecStep<E::Obs>, AbodeError> {
        self.async_step(actions)?;
        self.wait_step()
    }

    /// Pauses the running slot at position `index`.
    ///
    /// `index` is a position among the currently running slots, so pausing
    /// positions `1` then `1` again pauses the second and third running slots.
    pub fn pause_at(&mut self, index: usize) -> Result<(), AbodeError> {
        self.check_idle("pause_at")?;
        self.running_slot(index)?;
        let slot = self.running.remove(index);
        self.paused.push(slot);
        debug!("Paused slot {}, running {:?}", slot, self.running);
        Ok(())
    }

    /// Resumes every paused slot. Running slots return to ascending slot order.
    pub fn resume_all(&mut self) -> Result<(), AbodeError> {
        self.check_idle("resume_all")?;
        self.running.append(&mut self.paused);
        self.running.sort_unstable();
        debug!("Resumed all slots");
        Ok(())
    }

    /// Number of running slots.
    pub fn num_envs(&self) -> usize {
        self.running.len()
    }

    /// Number of slots, running or paused.
    pub fn num_slots(&self) -> usize {
        self.executor.len()
    }

    /// Original indices of the running slots, in batch order.
    pub fn running_slots(&self) -> &[usize] {
        &self.running
    }

    /// Original indices of the paused slots, in the order they were paused.
    pub fn paused_slots(&self) -> &[usize] {
        &self.paused
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Stops every slot.
    ///
    /// Results of a step dispatched without [`VecEnv::wait_step`] are discarded.
    /// Calling this more than once, or after a worker failure, is allowed.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        if self.pending_step {
            debug!("Drain pending step before closing");
            for &slot in self.running.iter() {
                let _ = self.executor.recv(slot);
            }
            self.pending_step = false;
        }
        self.executor.close();
        self.state = State::Closed;
        info!("Closed {} environments", self.executor.len());
    }
}

impl<E: Env + 'static> Drop for VecEnv<E> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use abode_core::{
        dummy::{CountdownEnv, CountdownEnvConfig},
        sensor::Observations,
    };

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn build(n: usize, backend: Backend, env_config: &CountdownEnvConfig) -> VecEnv<CountdownEnv> {
        init_logger();
        let config = VecEnvConfig::default().num_envs(n).backend(backend);
        VecEnv::build(&config, env_config).unwrap()
    }

    fn seeds(obs: &[Observations]) -> Vec<f32> {
        obs.iter().map(|o| o.get("seed").unwrap()[0]).collect()
    }

    fn remaining(obs: &[Observations]) -> Vec<f32> {
        obs.iter().map(|o| o.get("remaining").unwrap()[0]).collect()
    }

    const BACKENDS: [Backend; 2] = [Backend::Threaded, Backend::InProcess];

    #[test]
    fn test_step_in_slot_order() -> Result<(), AbodeError> {
        for backend in BACKENDS {
            let mut envs = build(3, backend, &CountdownEnvConfig::default());
            let obs = envs.reset()?;
            assert_eq!(seeds(&obs), vec![0.0, 1.0, 2.0]);

            let step = envs.step(vec![10, 20, 30])?;
            assert_eq!(step.rewards, vec![10.0, 20.0, 30.0]);
            assert_eq!(seeds(&step.observations), vec![0.0, 1.0, 2.0]);
            assert_eq!(step.dones, vec![false; 3]);
            assert_eq!(step.infos[0].get_scalar("step").unwrap(), 1.0);
            envs.close();
        }
        Ok(())
    }

    #[test]
    fn test_pause_with_index_shift() -> Result<(), AbodeError> {
        for backend in BACKENDS {
            let mut envs = build(5, backend, &CountdownEnvConfig::default().episode_length(100));
            envs.reset()?;

            envs.pause_at(1)?;
            envs.pause_at(2)?;
            assert_eq!(envs.num_envs(), 3);
            assert_eq!(envs.running_slots(), &[0, 2, 4]);
            assert_eq!(envs.paused_slots(), &[1, 3]);

            let step = envs.step(vec![0, 2, 4])?;
            assert_eq!(step.len(), 3);
            assert_eq!(seeds(&step.observations), vec![0.0, 2.0, 4.0]);
            assert_eq!(step.rewards, vec![0.0, 2.0, 4.0]);
        }
        Ok(())
    }

    #[test]
    fn test_resume_restores_slot_order() -> Result<(), AbodeError> {
        for backend in BACKENDS {
            let mut envs = build(4, backend, &CountdownEnvConfig::default().episode_length(100));
            envs.reset()?;
            envs.pause_at(2)?;
            envs.pause_at(0)?;
            envs.step(vec![1, 3])?;

            envs.resume_all()?;
            assert_eq!(envs.running_slots(), &[0, 1, 2, 3]);
            assert!(envs.paused_slots().is_empty());

            // Paused slots did not advance.
            let step = envs.step(vec![0; 4])?;
            let steps = step
                .infos
                .iter()
                .map(|info| info.get_scalar("step").unwrap())
                .collect::<Vec<_>>();
            assert_eq!(steps, vec![1.0, 2.0, 1.0, 2.0]);
        }
        Ok(())
    }

    #[test]
    fn test_auto_reset() -> Result<(), AbodeError> {
        for backend in BACKENDS {
            let env_config = CountdownEnvConfig::default().episode_length(2).length_per_seed(1);
            let mut envs = build(2, backend, &env_config);
            envs.reset()?;
            envs.step(vec![0, 0])?;
            let step = envs.step(vec![0, 0])?;

            assert_eq!(step.dones, vec![true, false]);
            // Slot 0 starts a new episode of 2 steps, slot 1 has 1 step left.
            assert_eq!(remaining(&step.observations), vec![2.0, 1.0]);
            let terminal = step.terminal_observations[0].as_ref().unwrap();
            assert_eq!(terminal.get("remaining"), Some(&vec![0.0]));
            assert!(step.terminal_observations[1].is_none());
        }
        Ok(())
    }

    #[test]
    fn test_no_auto_reset() -> Result<(), AbodeError> {
        init_logger();
        let config = VecEnvConfig::default().num_envs(1).auto_reset_done(false);
        let env_config = CountdownEnvConfig::default().episode_length(1);
        let mut envs = VecEnv::<CountdownEnv>::build(&config, &env_config)?;
        envs.reset()?;
        let step = envs.step(vec![0])?;
        assert_eq!(step.dones, vec![true]);
        assert_eq!(remaining(&step.observations), vec![0.0]);
        assert!(step.terminal_observations[0].is_none());

        assert_eq!(remaining(&[envs.reset_at(0)?]), vec![1.0]);
        Ok(())
    }

    #[test]
    fn test_usage_errors() -> Result<(), AbodeError> {
        for backend in BACKENDS {
            let mut envs = build(2, backend, &CountdownEnvConfig::default());
            envs.reset()?;

            assert!(envs.wait_step().unwrap_err().is_usage());
            assert!(envs.async_step(vec![0]).unwrap_err().is_configuration());

            envs.async_step(vec![0, 0])?;
            assert!(envs.async_step(vec![0, 0]).unwrap_err().is_usage());
            assert!(envs.pause_at(0).unwrap_err().is_usage());
            assert!(envs.reset().unwrap_err().is_usage());
            envs.wait_step()?;

            assert!(envs.pause_at(2).unwrap_err().is_usage());
            assert_eq!(envs.num_envs(), 2);
        }
        Ok(())
    }

    #[test]
    fn test_zero_envs() {
        let config = VecEnvConfig::default().num_envs(0);
        let err = VecEnv::<CountdownEnv>::build(&config, &CountdownEnvConfig::default()).err();
        assert!(err.unwrap().is_configuration());
    }

    #[test]
    fn test_build_failure() {
        for backend in BACKENDS {
            let config = VecEnvConfig::default().num_envs(2).backend(backend);
            let env_config = CountdownEnvConfig::default().episode_length(0);
            let err = VecEnv::<CountdownEnv>::build(&config, &env_config).err();
            assert!(err.unwrap().is_worker_failure());
        }
    }

    #[test]
    fn test_worker_failure_is_fatal() -> Result<(), AbodeError> {
        for backend in BACKENDS {
            for panic_on_failure in [false, true] {
                let env_config = CountdownEnvConfig::default()
                    .episode_length(100)
                    .fail_at(1, 2)
                    .panic_on_failure(panic_on_failure);
                let mut envs = build(3, backend, &env_config);
                envs.reset()?;
                envs.step(vec![0; 3])?;

                // The failure surfaces in wait_step, not in async_step.
                envs.async_step(vec![0; 3])?;
                match envs.wait_step().unwrap_err() {
                    AbodeError::WorkerFailure { slot, .. } => assert_eq!(slot, 1),
                    e => panic!("unexpected error {:?}", e),
                }

                assert!(envs.step(vec![0; 3]).unwrap_err().is_usage());
                envs.close();
                envs.close();
                assert!(envs.is_closed());
            }
        }
        Ok(())
    }

    #[test]
    fn test_close() -> Result<(), AbodeError> {
        for backend in BACKENDS {
            let mut envs = build(2, backend, &CountdownEnvConfig::default());
            envs.reset()?;
            // A pending step is drained.
            envs.async_step(vec![0, 0])?;
            envs.close();
            assert!(envs.is_closed());
            envs.close();

            assert!(envs.reset().unwrap_err().is_usage());
            assert!(envs.step(vec![0, 0]).unwrap_err().is_usage());
            assert!(envs.pause_at(0).unwrap_err().is_usage());
        }
        Ok(())
    }
}
