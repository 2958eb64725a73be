//! Recurrent networks over packed episode sequences, implemented with
//! [candle](https://crates.io/crates/candle-core).
//!
//! The [`router`] module moves rollout data and hidden states between the flat
//! `(T * N)` layout produced by a vectorized environment and the packed layout
//! described by [`SequenceDescriptor`](abode_core::seq::SequenceDescriptor).
//! [`RnnStateEncoder`] combines the router with a [`RecurrentCore`].
mod config;
pub mod core;
mod encoder;
pub mod router;
pub mod util;
pub use crate::core::{
    default_core_registry, CoreFactory, GruCore, IdentityCore, LstmCore, RecurrentCore,
};
pub use config::RnnConfig;
pub use encoder::RnnStateEncoder;
pub use router::PackedSequence;
