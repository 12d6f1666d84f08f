//! Vectorized environments.
//!
//! [`EnvPool`] owns `n` independent instances of an [`Env`] and steps them as
//! one batch. A call to [`EnvPool::step`] is a barrier: it returns only when
//! every slot has produced its result. Slots are stepped on rayon's thread
//! pool. If any slot fails, the error is returned but other slots may already
//! have advanced or reset, so the state of the pool is undefined afterwards.
use crate::{error::StrideError, Env};
use anyhow::{anyhow, Result};
use log::trace;
use rayon::prelude::*;

/// Result of stepping every slot of an [`EnvPool`].
///
/// Index `i` of each vector belongs to slot `i`.
pub struct PoolStep<E: Env> {
    /// Rewards of the transitions.
    pub rewards: Vec<f32>,

    /// Next observations. For a slot whose episode ended, this is the first
    /// observation of the new episode.
    pub next_obs: Vec<E::Obs>,

    /// `terminated || truncated` of the transitions.
    pub dones: Vec<bool>,

    /// Information returned by the environments.
    pub infos: Vec<E::Info>,
}

/// A pool of environments stepped in lockstep.
///
/// ```rust
/// use stride_core::{dummy::{ScriptedEnv, ScriptedEnvConfig}, EnvPool};
///
/// let config = ScriptedEnvConfig::constant(1.0, 3);
/// let mut pool = EnvPool::<ScriptedEnv>::build(&config, 4, 0).unwrap();
/// let obs = pool.reset().unwrap();
/// assert_eq!(obs.len(), 4);
/// let step = pool.step(&[0.0; 4]).unwrap();
/// assert_eq!(step.rewards, vec![1.0; 4]);
/// ```
pub struct EnvPool<E: Env> {
    envs: Vec<E>,
}

impl<E> EnvPool<E>
where
    E: Env + Send,
    E::Obs: Send,
    E::Act: Sync,
    E::Info: Send,
{
    /// Builds `n_envs` environments. Slot `i` is seeded with `seed + i`.
    pub fn build(config: &E::Config, n_envs: usize, seed: i64) -> Result<Self> {
        let envs = (0..n_envs)
            .map(|i| E::build(config, seed + i as i64))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { envs })
    }

    /// Number of slots.
    pub fn n_envs(&self) -> usize {
        self.envs.len()
    }

    /// Resets every slot and returns the initial observations.
    pub fn reset(&mut self) -> Result<Vec<E::Obs>> {
        self.envs.par_iter_mut().map(|env| env.reset()).collect()
    }

    /// Resets the slot `ix` only.
    pub fn reset_env(&mut self, ix: usize) -> Result<E::Obs> {
        match self.envs.get_mut(ix) {
            Some(env) => env.reset(),
            None => Err(anyhow!("slot {} is out of range for {} environments", ix, self.envs.len())),
        }
    }

    /// Applies `acts[i]` to slot `i` for every slot.
    ///
    /// Slots whose episode ends are reset immediately; their reward and done
    /// flag still describe the terminal transition.
    pub fn step(&mut self, acts: &[E::Act]) -> Result<PoolStep<E>> {
        StrideError::check_len("env pool", self.envs.len(), acts.len())?;

        let results = self
            .envs
            .par_iter_mut()
            .zip(acts.par_iter())
            .map(|(env, act)| {
                let step = env.step(act)?;
                let done = step.is_done();
                let next_obs = if done { env.reset()? } else { step.obs };
                Ok((step.reward, next_obs, done, step.info))
            })
            .collect::<Result<Vec<_>>>()?;

        let n = results.len();
        let mut pool_step = PoolStep {
            rewards: Vec::with_capacity(n),
            next_obs: Vec::with_capacity(n),
            dones: Vec::with_capacity(n),
            infos: Vec::with_capacity(n),
        };
        for (reward, obs, done, info) in results {
            pool_step.rewards.push(reward);
            pool_step.next_obs.push(obs);
            pool_step.dones.push(done);
            pool_step.infos.push(info);
        }
        trace!("Pool step: dones = {:?}", pool_step.dones);

        Ok(pool_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{Script, ScriptedEnv, ScriptedEnvConfig};

    fn two_slot_config() -> ScriptedEnvConfig {
        ScriptedEnvConfig::new(vec![
            Script::new(vec![1.0, 2.0, 3.0], 2),
            Script::new(vec![10.0], 100),
        ])
    }

    #[test]
    fn test_pool_reset() -> Result<()> {
        let mut pool = EnvPool::<ScriptedEnv>::build(&two_slot_config(), 2, 0)?;
        let obs = pool.reset()?;
        assert_eq!(obs, vec![vec![0.0, 0.0], vec![1.0, 0.0]]);
        Ok(())
    }

    #[test]
    fn test_pool_preserves_slot_order() -> Result<()> {
        let mut pool = EnvPool::<ScriptedEnv>::build(&two_slot_config(), 2, 0)?;
        pool.reset()?;
        let step = pool.step(&[0.0, 0.0])?;
        assert_eq!(step.rewards, vec![1.0, 10.0]);
        assert_eq!(step.next_obs, vec![vec![0.0, 1.0], vec![1.0, 1.0]]);
        assert_eq!(step.dones, vec![false, false]);
        Ok(())
    }

    #[test]
    fn test_pool_auto_reset() -> Result<()> {
        let mut pool = EnvPool::<ScriptedEnv>::build(&two_slot_config(), 2, 0)?;
        pool.reset()?;
        pool.step(&[0.0, 0.0])?;
        let step = pool.step(&[0.0, 0.0])?;

        // The terminal transition keeps its reward and done flag...
        assert_eq!(step.rewards, vec![2.0, 10.0]);
        assert_eq!(step.dones, vec![true, false]);
        // ...while the observation is already the one of the new episode.
        assert_eq!(step.next_obs[0], vec![0.0, 0.0]);
        assert_eq!(step.next_obs[1], vec![1.0, 2.0]);

        let step = pool.step(&[0.0, 0.0])?;
        assert_eq!(step.rewards[0], 3.0);
        assert!(!step.dones[0]);
        Ok(())
    }

    #[test]
    fn test_pool_wrong_action_count() -> Result<()> {
        let mut pool = EnvPool::<ScriptedEnv>::build(&two_slot_config(), 2, 0)?;
        pool.reset()?;
        let err = pool.step(&[0.0]).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<StrideError>(),
            Some(StrideError::ShapeMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
        Ok(())
    }
}
