//! Default implementation of the [`Evaluator`] trait.
use super::Evaluator;
use crate::{
    record::{Record, RecordValue},
    Env, Policy,
};
use anyhow::Result;
use log::debug;

/// Runs a fixed number of episodes on a dedicated environment instance and
/// reports their mean return.
///
/// ```rust
/// use stride_core::{
///     dummy::{ScalarGaussianPolicy, ScriptedEnv, ScriptedEnvConfig},
///     DefaultEvaluator, Evaluator,
/// };
///
/// let config = ScriptedEnvConfig::constant(1.0, 5);
/// let mut evaluator = DefaultEvaluator::<ScriptedEnv>::new(&config, 42, 3).unwrap();
/// let mut policy = ScalarGaussianPolicy::new(0.0, 0.1, 0);
/// let record = evaluator.evaluate(&mut policy).unwrap();
/// assert_eq!(record.get_scalar("eval_score").unwrap(), 5.0);
/// ```
pub struct DefaultEvaluator<E: Env> {
    n_episodes: usize,
    max_steps: Option<usize>,
    env: E,
}

impl<E: Env> Evaluator<E> for DefaultEvaluator<E> {
    fn evaluate<P: Policy<E>>(&mut self, policy: &mut P) -> Result<Record> {
        let mut returns = Vec::with_capacity(self.n_episodes);

        for ix in 0..self.n_episodes {
            let mut obs = self.env.reset_with_index(ix)?;
            let mut ret = 0f32;
            let mut n_steps = 0;

            loop {
                let act = policy.sample(&obs);
                let step = self.env.step(&act)?;
                ret += step.reward;
                n_steps += 1;
                if step.is_done() || self.max_steps.is_some_and(|m| n_steps >= m) {
                    break;
                }
                obs = step.obs;
            }
            debug!("Evaluation episode {}: return = {}, steps = {}", ix, ret, n_steps);
            returns.push(ret);
        }

        let score = returns.iter().sum::<f32>() / self.n_episodes.max(1) as f32;
        Ok(Record::from_slice(&[
            ("eval_score", RecordValue::Scalar(score)),
            ("eval_returns", RecordValue::Array1(returns)),
        ]))
    }
}

impl<E: Env> DefaultEvaluator<E> {
    /// Builds the evaluation environment with `seed` and runs `n_episodes`
    /// episodes per evaluation.
    pub fn new(config: &E::Config, seed: i64, n_episodes: usize) -> Result<Self> {
        Ok(Self {
            n_episodes,
            max_steps: None,
            env: E::build(config, seed)?,
        })
    }

    /// Ends every evaluation episode after at most `max_steps` steps.
    pub fn with_max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{Script, ScalarGaussianPolicy, ScriptedEnv, ScriptedEnvConfig};

    #[test]
    fn test_mean_episode_return() -> Result<()> {
        let config = ScriptedEnvConfig::new(vec![Script::new(vec![1.0, 2.0], 3)]);
        let mut evaluator = DefaultEvaluator::<ScriptedEnv>::new(&config, 0, 2)?;
        let mut policy = ScalarGaussianPolicy::new(0.0, 0.1, 0);
        let record = evaluator.evaluate(&mut policy)?;

        // rewards cycle over the lifetime of the environment: 1+2+1, 2+1+2
        assert_eq!(record.get_array1("eval_returns")?, vec![4.0, 5.0]);
        assert_eq!(record.get_scalar("eval_score")?, 4.5);
        Ok(())
    }

    #[test]
    fn test_max_steps() -> Result<()> {
        let config = ScriptedEnvConfig::constant(1.0, 1000);
        let mut evaluator = DefaultEvaluator::<ScriptedEnv>::new(&config, 0, 1)?.with_max_steps(Some(10));
        let mut policy = ScalarGaussianPolicy::new(0.0, 0.1, 0);
        assert_eq!(evaluator.evaluate(&mut policy)?.get_scalar("eval_score")?, 10.0);
        Ok(())
    }
}
