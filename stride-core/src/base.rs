//! Capabilities the pipeline is written against.
//!
//! The pipeline never looks inside an environment, a policy or a value
//! function. It talks to them through the traits of this module.
mod env;
mod policy;
mod step;
mod value;
pub use env::Env;
pub use policy::{Policy, PolicyModel};
use std::fmt::Debug;
pub use step::{Info, Step};
pub use value::ValueModel;

/// Observation of an environment.
pub trait Obs: Clone + Debug {}

impl<T: Clone + Debug> Obs for T {}

/// Action applied to an environment.
pub trait Act: Clone + Debug {}

impl<T: Clone + Debug> Act for T {}
