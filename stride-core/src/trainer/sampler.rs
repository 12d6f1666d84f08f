//! Rollout collection.
use crate::{
    error::StrideError, Env, EnvPool, Policy, Trajectory, TrajectoryBuffer, TransitionBatch, ValueModel,
};
use anyhow::Result;
use log::trace;

/// A finished rollout and the training episodes completed while collecting it.
pub struct Rollout<E: Env> {
    /// The finalized trajectory.
    pub trajectory: Trajectory<E>,

    /// Returns of the episodes that ended during the rollout, in order of
    /// completion.
    pub episode_returns: Vec<f32>,
}

/// Collects fixed-horizon rollouts from an [`EnvPool`].
///
/// The observations of the last step are carried over to the first step of
/// the next rollout, so no transition is dropped or duplicated at rollout
/// boundaries. Episode returns are accumulated across rollouts as well.
pub struct Sampler<E: Env> {
    pool: EnvPool<E>,

    /// Observations the next step starts from.
    prev_obs: Option<Vec<E::Obs>>,

    /// Returns of the running episodes.
    running_returns: Vec<f32>,
}

impl<E> Sampler<E>
where
    E: Env + Send,
    E::Obs: Send,
    E::Act: Sync,
    E::Info: Send,
{
    /// Creates a sampler over `pool`.
    pub fn new(pool: EnvPool<E>) -> Self {
        let n = pool.n_envs();
        Self {
            pool,
            prev_obs: None,
            running_returns: vec![0.0; n],
        }
    }

    /// Number of slots of the pool.
    pub fn n_envs(&self) -> usize {
        self.pool.n_envs()
    }

    /// Collects `horizon` steps of every slot.
    ///
    /// With `inline_values`, `V(s_t)` is predicted at every step and stored
    /// in the trajectory; otherwise only the bootstrap values are predicted.
    pub fn collect<P, V>(
        &mut self,
        policy: &mut P,
        value: &V,
        horizon: usize,
        inline_values: bool,
    ) -> Result<Rollout<E>>
    where
        P: Policy<E>,
        V: ValueModel<E>,
    {
        let n = self.pool.n_envs();
        let mut buffer = TrajectoryBuffer::new(n, horizon);
        let mut episode_returns = vec![];

        let mut obs = match self.prev_obs.take() {
            Some(obs) => obs,
            None => self.pool.reset()?,
        };

        for _ in 0..horizon {
            let act: Vec<E::Act> = obs.iter().map(|o| policy.sample(o)).collect();
            let v_pred = match inline_values {
                true => {
                    let v = value.predict(&obs)?;
                    StrideError::check_len("value function", n, v.len())?;
                    Some(v)
                }
                false => None,
            };

            let step = self.pool.step(&act)?;
            for (i, (r, done)) in step.rewards.iter().zip(step.dones.iter()).enumerate() {
                self.running_returns[i] += r;
                if *done {
                    trace!("Slot {} finished an episode, return = {}", i, self.running_returns[i]);
                    episode_returns.push(self.running_returns[i]);
                    self.running_returns[i] = 0.0;
                }
            }

            let next_obs = step.next_obs;
            buffer.append(TransitionBatch {
                obs,
                act,
                reward: step.rewards,
                next_obs: next_obs.clone(),
                done: step.dones,
                v_pred,
            })?;
            obs = next_obs;
        }

        self.prev_obs = Some(obs);
        Ok(Rollout {
            trajectory: buffer.finalize(value)?,
            episode_returns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dummy::{ConstantValue, ScalarGaussianPolicy, Script, ScriptedEnv, ScriptedEnvConfig},
        AdvantageConfig, AdvantageEstimator,
    };

    fn sampler() -> Result<Sampler<ScriptedEnv>> {
        let config = ScriptedEnvConfig::new(vec![Script::new(vec![1.0], 3), Script::new(vec![2.0], 100)]);
        Ok(Sampler::new(EnvPool::build(&config, 2, 0)?))
    }

    #[test]
    fn test_state_carries_over_rollouts() -> Result<()> {
        let mut sampler = sampler()?;
        let mut policy = ScalarGaussianPolicy::new(0.0, 0.1, 0);
        let value = ConstantValue::new(0.0);

        let first = sampler.collect(&mut policy, &value, 2, false)?;
        let second = sampler.collect(&mut policy, &value, 2, false)?;

        // the first observation of a rollout is the last next observation of the previous one
        for e in 0..2 {
            assert_eq!(second.trajectory.obs()[e][0], first.trajectory.next_obs()[e][1]);
        }
        // slot 1 keeps counting steps of its episode
        assert_eq!(second.trajectory.obs()[1][0], vec![1.0, 2.0]);
        // slot 0 ended its episode at the first step of the second rollout
        assert_eq!(second.trajectory.done()[0], vec![true, false]);
        assert_eq!(second.episode_returns, vec![3.0]);
        assert!(first.episode_returns.is_empty());
        Ok(())
    }

    #[test]
    fn test_inline_values() -> Result<()> {
        let mut sampler = sampler()?;
        let mut policy = ScalarGaussianPolicy::new(0.0, 0.1, 0);
        let rollout = sampler.collect(&mut policy, &ConstantValue::new(1.5), 3, true)?;
        let traj = rollout.trajectory;
        assert_eq!(traj.v_pred().unwrap(), &[vec![1.5; 3], vec![1.5; 3]]);
        assert_eq!(traj.v_pred_next().unwrap(), &[vec![1.5; 3], vec![1.5; 3]]);
        assert_eq!(traj.bootstrap(), &[1.5, 1.5]);
        Ok(())
    }

    #[test]
    fn test_two_env_advantages_through_pool() -> Result<()> {
        // slot 0 earns 1 per step and terminates at t=3, slot 1 earns nothing
        let config = ScriptedEnvConfig::new(vec![Script::new(vec![1.0], 4), Script::new(vec![0.0], 100)]);
        let mut sampler = Sampler::new(EnvPool::<ScriptedEnv>::build(&config, 2, 0)?);
        let mut policy = ScalarGaussianPolicy::new(0.0, 0.1, 0);
        let value = ConstantValue::new(0.0);

        let rollout = sampler.collect(&mut policy, &value, 4, false)?;
        let traj = rollout.trajectory.with_value_predictions(&value)?;
        assert_eq!(traj.reward(), &[vec![1.0; 4], vec![0.0; 4]]);
        assert_eq!(traj.done(), &[vec![false, false, false, true], vec![false; 4]]);

        let estimator = AdvantageEstimator::build(&AdvantageConfig::default().gamma(0.99).lambda(0.95))?;
        let adv = estimator.estimate(&traj)?;
        let expected = [3.6569504, 2.8250403, 1.9405, 1.0];
        for (a, e) in adv.advantage[0].iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-5, "{:?}", adv.advantage[0]);
        }
        assert_eq!(adv.advantage[1], vec![0.0; 4]);
        assert_eq!(rollout.episode_returns, vec![4.0]);
        Ok(())
    }
}
