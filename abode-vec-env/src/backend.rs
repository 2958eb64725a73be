//! Execution of environment slots.
//!
//! Both executors share [`SlotRunner`], which owns one environment and answers
//! [`SlotCommand`]s. [`ThreadedExecutor`] runs each slot in its own thread and
//! talks to it over channels; [`InProcessExecutor`] buffers commands and runs
//! them when their responses are collected.
use crate::messages::{SlotCommand, SlotResponse, SlotStep};
use abode_core::{AbodeError, Env};
use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    thread::JoinHandle,
};

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Runs `f`, turning both errors and panics into a failure message.
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(payload) => Err(panic_message(payload)),
    }
}

/// Owns the environment of a slot.
pub(crate) struct SlotRunner<E: Env> {
    env: E,
    auto_reset_done: bool,
}

impl<E: Env> SlotRunner<E> {
    pub fn build(config: &E::Config, seed: i64, auto_reset_done: bool) -> Result<Self, String> {
        let env = guarded(|| E::build(config, seed))?;
        Ok(Self {
            env,
            auto_reset_done,
        })
    }

    /// Answers a command. `Close` is answered with `Ready`.
    pub fn handle(&mut self, command: SlotCommand<E::Act>) -> SlotResponse<E::Obs> {
        let env = &mut self.env;
        let auto_reset_done = self.auto_reset_done;
        let result = match command {
            SlotCommand::Reset => guarded(|| env.reset()).map(SlotResponse::Reset),
            SlotCommand::Step(act) => guarded(|| {
                let mut step = env.step(&act)?;
                if step.is_done() && auto_reset_done {
                    step.init_obs = Some(env.reset()?);
                }
                Ok(SlotStep::from_step(step))
            })
            .map(SlotResponse::Step),
            SlotCommand::Close => {
                let _ = guarded(|| {
                    env.close();
                    Ok(())
                });
                Ok(SlotResponse::Ready)
            }
        };
        result.unwrap_or_else(SlotResponse::Failed)
    }
}

/// Sends commands to slots and collects their responses.
///
/// Every `send` is followed by exactly one `recv` for the same slot before the
/// next `send` to that slot.
pub(crate) trait SlotExecutor<E: Env> {
    /// Number of slots.
    fn len(&self) -> usize;

    /// Dispatches a command. Never blocks and never fails; a dead slot is
    /// reported by the following `recv`.
    fn send(&mut self, slot: usize, command: SlotCommand<E::Act>);

    /// Waits for the response to the last command sent to `slot`.
    fn recv(&mut self, slot: usize) -> Result<SlotResponse<E::Obs>, AbodeError>;

    /// Stops every slot. Never fails.
    fn close(&mut self);
}

fn failure(slot: usize, message: impl Into<String>) -> AbodeError {
    AbodeError::WorkerFailure {
        slot,
        message: message.into(),
    }
}

struct Worker<A, O> {
    commands: Sender<SlotCommand<A>>,
    responses: Receiver<SlotResponse<O>>,
    handle: Option<JoinHandle<()>>,
}

/// One thread per slot.
pub(crate) struct ThreadedExecutor<E: Env> {
    workers: Vec<Worker<E::Act, E::Obs>>,
}

impl<E: Env + 'static> ThreadedExecutor<E> {
    /// Spawns the workers and waits until every environment is built.
    pub fn build(
        num_envs: usize,
        env_config: &E::Config,
        seed: i64,
        auto_reset_done: bool,
    ) -> Result<Self, AbodeError> {
        let mut executor = Self { workers: vec![] };
        for slot in 0..num_envs {
            let (s_command, r_command) = unbounded();
            let (s_response, r_response) = unbounded();
            let env_config = env_config.clone();
            let seed = seed + slot as i64;

            let handle = std::thread::Builder::new()
                .name(format!("abode-env-{}", slot))
                .spawn(move || {
                    Self::run_worker(slot, env_config, seed, auto_reset_done, r_command, s_response)
                });
            let handle = match handle {
                Ok(handle) => handle,
                Err(e) => {
                    executor.close();
                    return Err(failure(slot, e.to_string()));
                }
            };
            executor.workers.push(Worker {
                commands: s_command,
                responses: r_response,
                handle: Some(handle),
            });
        }

        for slot in 0..num_envs {
            if let Err(e) = executor.recv(slot) {
                executor.close();
                return Err(e);
            }
        }
        Ok(executor)
    }

    /// Loop of a worker thread. The environment lives and dies in this thread.
    fn run_worker(
        slot: usize,
        env_config: E::Config,
        seed: i64,
        auto_reset_done: bool,
        commands: Receiver<SlotCommand<E::Act>>,
        responses: Sender<SlotResponse<E::Obs>>,
    ) {
        let mut runner = match SlotRunner::<E>::build(&env_config, seed, auto_reset_done) {
            Ok(runner) => runner,
            Err(msg) => {
                let _ = responses.send(SlotResponse::Failed(msg));
                return;
            }
        };
        if responses.send(SlotResponse::Ready).is_err() {
            return;
        }
        debug!("Started worker {} with seed {}", slot, seed);

        for command in commands.iter() {
            let is_close = matches!(command, SlotCommand::Close);
            let response = runner.handle(command);
            let failed = matches!(response, SlotResponse::Failed(_));
            if is_close || responses.send(response).is_err() || failed {
                break;
            }
        }
        debug!("Stopped worker {}", slot);
    }
}

impl<E: Env> SlotExecutor<E> for ThreadedExecutor<E> {
    fn len(&self) -> usize {
        self.workers.len()
    }

    fn send(&mut self, slot: usize, command: SlotCommand<E::Act>) {
        // A disconnected worker is detected in `recv`.
        let _ = self.workers[slot].commands.send(command);
    }

    fn recv(&mut self, slot: usize) -> Result<SlotResponse<E::Obs>, AbodeError> {
        match self.workers[slot].responses.recv() {
            Ok(SlotResponse::Failed(msg)) => Err(failure(slot, msg)),
            Ok(response) => Ok(response),
            Err(_) => Err(failure(slot, "worker thread terminated")),
        }
    }

    fn close(&mut self) {
        for worker in self.workers.iter() {
            let _ = worker.commands.send(SlotCommand::Close);
        }
        for (slot, worker) in self.workers.iter_mut().enumerate() {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!("Worker {} panicked", slot);
                }
            }
        }
    }
}

/// All slots in the thread of the controller.
pub(crate) struct InProcessExecutor<E: Env> {
    runners: Vec<Option<SlotRunner<E>>>,
    pending: Vec<Option<SlotCommand<E::Act>>>,
}

impl<E: Env> InProcessExecutor<E> {
    /// Builds every environment.
    pub fn build(
        num_envs: usize,
        env_config: &E::Config,
        seed: i64,
        auto_reset_done: bool,
    ) -> Result<Self, AbodeError> {
        let runners = (0..num_envs)
            .map(|slot| {
                SlotRunner::build(env_config, seed + slot as i64, auto_reset_done)
                    .map(Some)
                    .map_err(|msg| failure(slot, msg))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pending = (0..num_envs).map(|_| None).collect();
        Ok(Self { runners, pending })
    }
}

impl<E: Env> SlotExecutor<E> for InProcessExecutor<E> {
    fn len(&self) -> usize {
        self.runners.len()
    }

    fn send(&mut self, slot: usize, command: SlotCommand<E::Act>) {
        self.pending[slot] = Some(command);
    }

    fn recv(&mut self, slot: usize) -> Result<SlotResponse<E::Obs>, AbodeError> {
        let command = self.pending[slot]
            .take()
            .ok_or_else(|| AbodeError::UsageError(format!("No command sent to slot {}", slot)))?;
        let runner = self.runners[slot]
            .as_mut()
            .ok_or_else(|| failure(slot, "environment is no longer available"))?;
        match runner.handle(command) {
            SlotResponse::Failed(msg) => {
                self.runners[slot] = None;
                Err(failure(slot, msg))
            }
            response => Ok(response),
        }
    }

    fn close(&mut self) {
        for runner in self.runners.iter_mut() {
            if let Some(mut runner) = runner.take() {
                runner.handle(SlotCommand::Close);
            }
        }
        self.pending.iter_mut().for_each(|p| *p = None);
    }
}
