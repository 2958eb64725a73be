//! Core functionalities.
mod env;
mod step;
use std::fmt::Debug;
pub use env::Env;
pub use step::Step;

/// An observation of a single environment.
///
/// The vectorized controller passes observations through unmodified, so the
/// only requirement is that they can be moved to a worker thread and back.
pub trait Obs: Clone + Debug + Send + 'static {}

/// An action applied to a single environment.
pub trait Act: Clone + Debug + Send + 'static {}

impl Act for i64 {}

impl Act for Vec<f32> {}
