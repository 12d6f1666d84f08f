//! Records of values observed during training and evaluation.
//!
//! The [`Trainer`](crate::Trainer) writes one [`Record`] per training cycle,
//! holding `global_step`, the evaluation score (when an evaluation ran),
//! losses and diagnostics of the policy update. Records go to a
//! [`Recorder`], which may keep them ([`BufferedRecorder`]), drop them
//! ([`NullRecorder`]) or aggregate them before writing
//! ([`RecordStorage`] is the aggregation helper used by sinks such as the
//! tensorboard recorder).
//!
//! ```rust
//! use stride_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("global_step", RecordValue::Scalar(256.0));
//! record.insert("eval_score", RecordValue::Scalar(-812.5));
//! record.insert("episode_returns", RecordValue::Array1(vec![-790.0, -835.0]));
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::Recorder;
pub use storage::RecordStorage;
