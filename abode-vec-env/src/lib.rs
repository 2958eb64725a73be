//! Vectorized environment controller.
//!
//! [`VecEnv`] owns a fixed pool of environment slots and steps the running ones
//! as a batch. Slots can be paused to drop them out of the batch while the
//! others keep running, and resumed all at once.
//!
//! # Messages
//! * From the controller to a slot
//!   - `Reset`, `Step`, `Close`
//! * From a slot to the controller
//!   - `Ready`, `Reset`, `Step`, `Failed`
mod backend;
mod config;
mod messages;
mod vec_env;
pub use config::{Backend, VecEnvConfig};
pub use messages::VecStep;
pub use vec_env::VecEnv;
