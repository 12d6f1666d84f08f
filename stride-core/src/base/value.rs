//! State-value function.
use super::Env;
use anyhow::Result;
use std::path::Path;

/// A trainable state-value function `V(s)`.
pub trait ValueModel<E: Env> {
    /// Predicts one value per observation.
    fn predict(&self, obs: &[E::Obs]) -> Result<Vec<f32>>;

    /// Takes one regression step towards `targets` and returns the mean-squared error
    /// measured before the step.
    fn update(&mut self, obs: &[E::Obs], targets: &[f32]) -> Result<f32>;

    /// Saves the parameters in a file at `path`.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Loads the parameters from a file at `path`.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
