//! Policy.
use super::Env;
use anyhow::Result;
use std::path::Path;

/// A policy on an environment.
///
/// Policy is a mapping from an observation to an action.
/// The mapping can be either of deterministic or stochastic.
pub trait Policy<E: Env> {
    /// Sample an action given an observation.
    fn sample(&mut self, obs: &E::Obs) -> E::Act;
}

/// A differentiable stochastic policy, `π_θ(a|s)`.
///
/// The update engines never differentiate anything themselves. They ask the
/// model for score-function gradients `∇_θ log π_θ(a|s)` and send back a
/// gradient of the objective through [`PolicyModel::apply_gradient`].
///
/// Every batched method must return exactly one entry per input pair.
pub trait PolicyModel<E: Env>: Policy<E> {
    /// Switches to training mode, where [`Policy::sample`] explores.
    fn train(&mut self);

    /// Switches to evaluation mode, where [`Policy::sample`] is greedy or low-noise.
    fn eval(&mut self);

    /// Returns `true` in training mode.
    fn is_train(&self) -> bool;

    /// Returns `log π_θ(a_i|s_i)` for each pair.
    fn log_prob(&self, obs: &[E::Obs], act: &[E::Act]) -> Result<Vec<f32>>;

    /// Returns `∇_θ log π_θ(a_i|s_i)` for each pair, flattened like [`PolicyModel::params`].
    fn grad_log_prob(&self, obs: &[E::Obs], act: &[E::Act]) -> Result<Vec<Vec<f32>>>;

    /// Returns the gradient of the mean entropy over `obs`, if the model can compute it.
    fn entropy_grad(&self, obs: &[E::Obs]) -> Result<Option<Vec<f32>>> {
        let _ = obs;
        Ok(None)
    }

    /// Flat parameter vector.
    fn params(&self) -> Vec<f32>;

    /// Overwrites the parameters with a vector laid out like [`PolicyModel::params`].
    fn set_params(&mut self, params: &[f32]) -> Result<()>;

    /// Takes one optimizer step in the ascent direction `grad`.
    fn apply_gradient(&mut self, grad: &[f32]) -> Result<()>;

    /// Saves the parameters in a file at `path`.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Loads the parameters from a file at `path`.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
