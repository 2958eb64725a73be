#![warn(missing_docs)]
//! Core components of abode.
//!
//! * [`Env`], [`Obs`], [`Act`] and [`Step`] describe the contract of a simulation
//!   backend consumed by the vectorized controller in `abode-vec-env`.
//! * [`record::Record`] is the named-value map used for step infos and metrics.
//! * [`seq`] turns a `(T, N)` matrix of done flags into the index metadata needed
//!   to run a recurrent network over packed, episode-aligned sequences.
//! * [`Registry`] and [`sensor`] provide explicit, name-keyed plugin lookup.
pub mod dummy;
pub mod error;
pub mod record;
pub mod sensor;
pub mod seq;

mod base;
pub use base::{Act, Env, Obs, Step};

mod registry;
pub use registry::Registry;

pub use error::AbodeError;
