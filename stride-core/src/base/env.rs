//! Environment.
use super::{Act, Info, Obs, Step};
use anyhow::Result;

/// A gym-style environment.
///
/// [`EnvPool`](crate::EnvPool) vectorizes instances of this trait.
pub trait Env {
    /// Configuration.
    type Config: Clone;

    /// Observation of the environment.
    type Obs: Obs;

    /// Action of the environment.
    type Act: Act;

    /// Information attached to each [`Step`].
    type Info: Info;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Starts a new episode and returns its first observation.
    fn reset(&mut self) -> Result<Self::Obs>;

    /// Starts a new episode identified by `ix`.
    ///
    /// The index is used in an arbitrary way, typically as a seed so that
    /// evaluation runs are reproducible. [`DefaultEvaluator`] calls this.
    ///
    /// [`DefaultEvaluator`]: crate::DefaultEvaluator
    fn reset_with_index(&mut self, ix: usize) -> Result<Self::Obs>;

    /// Applies an action.
    fn step(&mut self, act: &Self::Act) -> Result<Step<Self>>
    where
        Self: Sized;
}
