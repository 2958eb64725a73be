//! Named values used for step infos and evaluation metrics.
//!
//! The controller treats the `info` of a step as an opaque [`Record`] and hands
//! it to the caller unmodified. Evaluation loops write their results as records
//! too, through a [`Recorder`].
//!
//! ```rust
//! use abode_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("distance_to_goal", RecordValue::Scalar(1.5));
//! record.insert("success", RecordValue::Scalar(0.0));
//! assert_eq!(record.get_scalar("distance_to_goal").unwrap(), 1.5);
//! ```
mod base;
mod recorder;

pub use base::{Record, RecordValue};
pub use recorder::{BufferedRecorder, Recorder};
