//! Evaluation of policies.
use crate::{record::Record, Env, Policy};
use anyhow::Result;
mod default_evaluator;
pub use default_evaluator::DefaultEvaluator;

/// Evaluates a [`Policy`] without learning.
pub trait Evaluator<E: Env> {
    /// Runs evaluation episodes and returns a record holding the mean
    /// episode return under `eval_score`.
    ///
    /// The caller is responsible for the mode of `policy`. The trainer
    /// switches it to evaluation mode before calling this method.
    fn evaluate<P: Policy<E>>(&mut self, policy: &mut P) -> Result<Record>;
}
