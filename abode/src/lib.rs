//! Rollouts of recurrent policies over vectorized embodied environments.
//!
//! Abode consists of the following crates:
//!
//! * [abode-core](abode_core) defines the environment contract, records, sensors,
//!   and the episode indexer and sequence packer used to run recurrent networks
//!   over rollout windows.
//! * [abode-candle-rnn](abode_candle_rnn) routes rollout rows and hidden states
//!   to and from the packed layout, with GRU and LSTM cores built on
//!   [candle](https://crates.io/crates/candle-core).
//! * [abode-vec-env](abode_vec_env) is the vectorized environment controller
//!   with pausable slots.
//! * This crate ties them together: [`RolloutWindow`] tracks the episode
//!   boundaries of a window, [`pause_envs`] keeps per-slot data aligned with the
//!   controller, and [`RecurrentEvaluator`] runs a [`RecurrentPolicy`] until every
//!   slot completed its episodes.
mod evaluator;
mod pause;
mod policy;
mod rollout;
pub use abode_candle_rnn;
pub use abode_core;
pub use abode_vec_env;
pub use evaluator::{EvaluatorConfig, RecurrentEvaluator};
pub use pause::{pause_envs, RolloutState};
pub use policy::{EncoderPolicy, RecurrentPolicy};
pub use rollout::RolloutWindow;
