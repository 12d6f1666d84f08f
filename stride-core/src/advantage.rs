//! Advantage estimation.
//!
//! [`AdvantageEstimator`] turns a finalized [`Trajectory`] with value
//! predictions into per-step advantages and value targets, shaped like the
//! reward array `[env][t]`. Each slot is processed independently in reverse
//! time order.
use crate::{error::StrideError, Env, Trajectory};
use anyhow::{bail, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Return estimators.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum EstimatorKind {
    /// Generalized advantage estimation.
    Gae,

    /// Discounted `n`-step returns bootstrapped at the end of the rollout,
    /// `advantage = return - V(s)`.
    NStepReturn,
}

/// Configuration of [`AdvantageEstimator`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AdvantageConfig {
    /// Discount factor, in `(0, 1]`.
    pub gamma: f32,

    /// GAE mixing factor, in `[0, 1]`. Ignored by [`EstimatorKind::NStepReturn`].
    pub lambda: f32,

    /// The estimator.
    pub estimator: EstimatorKind,
}

impl Default for AdvantageConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            lambda: 0.95,
            estimator: EstimatorKind::Gae,
        }
    }
}

impl AdvantageConfig {
    /// Sets the discount factor.
    pub fn gamma(mut self, v: f32) -> Self {
        self.gamma = v;
        self
    }

    /// Sets the GAE mixing factor.
    pub fn lambda(mut self, v: f32) -> Self {
        self.lambda = v;
        self
    }

    /// Sets the estimator.
    pub fn estimator(mut self, v: EstimatorKind) -> Self {
        self.estimator = v;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let rdr = BufReader::new(File::open(path)?);
        Ok(serde_yaml::from_reader(rdr)?)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Advantages and value targets, indexed `[env][t]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Advantages {
    /// Advantage estimates.
    pub advantage: Vec<Vec<f32>>,

    /// Regression targets of the value function.
    pub value_target: Vec<Vec<f32>>,
}

/// Generalized advantage estimation over one slot.
///
/// Processes `t = H-1 .. 0`:
///
/// ```text
/// delta[t]     = r[t] + gamma * (1 - done[t]) * v_next[t] - v[t]
/// advantage[t] = delta[t] + gamma * lambda * (1 - done[t]) * advantage[t+1]
/// ```
///
/// with `advantage[H] = 0`. All slices must have the length of `reward`.
pub fn gae(
    reward: &[f32],
    done: &[bool],
    v_pred: &[f32],
    v_pred_next: &[f32],
    gamma: f32,
    lambda: f32,
) -> Result<Vec<f32>, StrideError> {
    let h = reward.len();
    StrideError::check_len("advantage estimator", h, done.len())?;
    StrideError::check_len("advantage estimator", h, v_pred.len())?;
    StrideError::check_len("advantage estimator", h, v_pred_next.len())?;

    let mut advantage = vec![0.0; reward.len()];
    let mut last = 0.0;
    for t in (0..reward.len()).rev() {
        let nonterminal = if done[t] { 0.0 } else { 1.0 };
        let delta = reward[t] + gamma * nonterminal * v_pred_next[t] - v_pred[t];
        last = delta + gamma * lambda * nonterminal * last;
        advantage[t] = last;
    }
    Ok(advantage)
}

/// Discounted returns over one slot, restarting at every episode end and
/// bootstrapped with `bootstrap` after the last step.
pub fn discount_with_dones(
    reward: &[f32],
    done: &[bool],
    bootstrap: f32,
    gamma: f32,
) -> Result<Vec<f32>, StrideError> {
    StrideError::check_len("advantage estimator", reward.len(), done.len())?;
    let mut ret = vec![0.0; reward.len()];
    let mut last = bootstrap;
    for t in (0..reward.len()).rev() {
        let nonterminal = if done[t] { 0.0 } else { 1.0 };
        last = reward[t] + gamma * nonterminal * last;
        ret[t] = last;
    }
    Ok(ret)
}

/// Computes advantages of finalized trajectories.
pub struct AdvantageEstimator {
    config: AdvantageConfig,
}

impl AdvantageEstimator {
    /// Builds the estimator.
    pub fn build(config: &AdvantageConfig) -> Result<Self> {
        if !(config.gamma > 0.0 && config.gamma <= 1.0) {
            bail!("gamma must be in (0, 1], got {}", config.gamma);
        }
        if !(0.0..=1.0).contains(&config.lambda) {
            bail!("lambda must be in [0, 1], got {}", config.lambda);
        }
        Ok(Self {
            config: config.clone(),
        })
    }

    /// Estimates advantages and value targets of `traj`.
    ///
    /// Fails with [`StrideError::MissingValuePrediction`] if value predictions
    /// have not been attached to the trajectory.
    pub fn estimate<E: Env>(&self, traj: &Trajectory<E>) -> Result<Advantages> {
        let v_pred = traj.v_pred().ok_or(StrideError::MissingValuePrediction)?;
        let (gamma, lambda) = (self.config.gamma, self.config.lambda);

        let advantage: Vec<Vec<f32>> = match self.config.estimator {
            EstimatorKind::Gae => {
                let v_pred_next = traj.v_pred_next().ok_or(StrideError::MissingValuePrediction)?;
                (0..traj.n_envs())
                    .map(|e| {
                        gae(
                            &traj.reward()[e],
                            &traj.done()[e],
                            &v_pred[e],
                            &v_pred_next[e],
                            gamma,
                            lambda,
                        )
                    })
                    .collect::<Result<_, _>>()?
            }
            EstimatorKind::NStepReturn => (0..traj.n_envs())
                .map(|e| -> Result<Vec<f32>, StrideError> {
                    let ret =
                        discount_with_dones(&traj.reward()[e], &traj.done()[e], traj.bootstrap()[e], gamma)?;
                    StrideError::check_len("advantage estimator", ret.len(), v_pred[e].len())?;
                    Ok(ret.into_iter().zip(v_pred[e].iter()).map(|(ret, v)| ret - v).collect())
                })
                .collect::<Result<_, _>>()?,
        };

        let value_target = advantage
            .iter()
            .zip(v_pred.iter())
            .map(|(a, v)| a.iter().zip(v.iter()).map(|(a, v)| a + v).collect())
            .collect();

        if log::log_enabled!(log::Level::Debug) {
            let n = traj.len().max(1) as f32;
            let mean = advantage.iter().flatten().sum::<f32>() / n;
            debug!("Estimated {} advantages, mean = {}", traj.len(), mean);
        }

        Ok(Advantages {
            advantage,
            value_target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::ScriptedEnv;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-5, "{:?} != {:?}", actual, expected);
        }
    }

    /// Trajectory of `ScriptedEnv` with the given rewards and done flags.
    fn trajectory(reward: Vec<Vec<f32>>, done: Vec<Vec<bool>>) -> Trajectory<ScriptedEnv> {
        let obs: Vec<Vec<Vec<f32>>> = reward
            .iter()
            .map(|r| r.iter().map(|_| vec![0.0, 0.0]).collect())
            .collect();
        let act = reward.iter().map(|r| vec![0.0; r.len()]).collect();
        let bootstrap = vec![0.0; reward.len()];
        Trajectory::from_parts(obs.clone(), act, reward, obs, done, bootstrap).unwrap()
    }

    #[test]
    fn test_lambda_zero_is_td_residual() -> Result<()> {
        let reward = [0.5, -1.0, 2.0, 0.0];
        let done = [false, false, true, false];
        let v = [0.1, 0.2, 0.3, 0.4];
        let v_next = [0.2, 0.3, 0.9, 0.5];
        let gamma = 0.9;

        let adv = gae(&reward, &done, &v, &v_next, gamma, 0.0)?;
        let delta: Vec<f32> = (0..4)
            .map(|t| {
                let nonterminal = if done[t] { 0.0 } else { 1.0 };
                reward[t] + gamma * nonterminal * v_next[t] - v[t]
            })
            .collect();
        assert_close(&adv, &delta);
        Ok(())
    }

    #[test]
    fn test_lambda_one_is_monte_carlo() -> Result<()> {
        let reward = [1.0, 2.0, 3.0, 4.0];
        let done = [false; 4];
        let v = [0.5, 1.0, -1.0, 2.0];
        let bootstrap = 1.5;
        let v_next = [1.0, -1.0, 2.0, bootstrap];

        let adv = gae(&reward, &done, &v, &v_next, 1.0, 1.0)?;
        let mc: Vec<f32> = (0..4)
            .map(|t| reward[t..].iter().sum::<f32>() + bootstrap - v[t])
            .collect();
        assert_close(&adv, &mc);
        Ok(())
    }

    #[test]
    fn test_terminal_blocks_bootstrap() -> Result<()> {
        // Terminal at step 1: advantage at step 2 must not leak into steps 0 and 1.
        let reward = [1.0, 1.0, 100.0];
        let done = [false, true, false];
        let v = [0.0; 3];
        let v_next = [0.0, 50.0, 0.0];
        let (gamma, lambda) = (0.9, 0.8);

        let adv = gae(&reward, &done, &v, &v_next, gamma, lambda)?;
        assert_close(&adv, &[1.0 + gamma * lambda * 1.0, 1.0, 100.0]);
        Ok(())
    }

    #[test]
    fn test_mismatched_lengths() {
        let err = gae(&[1.0, 1.0, 1.0], &[false], &[0.0; 3], &[0.0; 3], 0.99, 0.95).unwrap_err();
        assert!(matches!(
            err,
            StrideError::ShapeMismatch { expected: 3, actual: 1, .. }
        ));
        let err = gae(&[1.0; 3], &[false; 3], &[0.0; 3], &[0.0; 2], 0.99, 0.95).unwrap_err();
        assert!(matches!(
            err,
            StrideError::ShapeMismatch { expected: 3, actual: 2, .. }
        ));
        let err = discount_with_dones(&[1.0; 2], &[false; 4], 0.0, 0.99).unwrap_err();
        assert!(matches!(
            err,
            StrideError::ShapeMismatch { expected: 2, actual: 4, .. }
        ));
    }

    #[test]
    fn test_two_env_regression() -> Result<()> {
        let traj = trajectory(
            vec![vec![1.0; 4], vec![0.0; 4]],
            vec![vec![false, false, false, true], vec![false; 4]],
        )
        .with_values(vec![vec![0.0; 4]; 2], vec![vec![0.0; 4]; 2])?;
        let estimator = AdvantageEstimator::build(&AdvantageConfig::default().gamma(0.99).lambda(0.95))?;
        let adv = estimator.estimate(&traj)?;

        let c = 0.99 * 0.95;
        let a3 = 1.0;
        let a2 = 1.0 + c * a3;
        let a1 = 1.0 + c * a2;
        let a0 = 1.0 + c * a1;
        assert_close(&adv.advantage[0], &[a0, a1, a2, a3]);
        assert_close(&adv.advantage[0], &[3.6569504, 2.8250403, 1.9405, 1.0]);
        assert_close(&adv.advantage[1], &[0.0; 4]);
        assert_eq!(adv.value_target, adv.advantage);
        Ok(())
    }

    #[test]
    fn test_value_target_adds_prediction() -> Result<()> {
        let traj = trajectory(vec![vec![1.0, 0.0]], vec![vec![false, true]])
            .with_values(vec![vec![0.5, 0.25]], vec![vec![0.25, 0.0]])?;
        let estimator = AdvantageEstimator::build(&AdvantageConfig::default().gamma(1.0).lambda(1.0))?;
        let adv = estimator.estimate(&traj)?;
        for t in 0..2 {
            let expected = adv.advantage[0][t] + [0.5, 0.25][t];
            assert!((adv.value_target[0][t] - expected).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_missing_value_prediction() -> Result<()> {
        let traj = trajectory(vec![vec![1.0; 3]], vec![vec![false; 3]]);
        let estimator = AdvantageEstimator::build(&AdvantageConfig::default())?;
        let err = estimator.estimate(&traj).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StrideError>(),
            Some(StrideError::MissingValuePrediction)
        ));
        Ok(())
    }

    #[test]
    fn test_n_step_return() -> Result<()> {
        let ret = discount_with_dones(&[1.0, 1.0, 1.0], &[false, true, false], 10.0, 0.5)?;
        assert_close(&ret, &[1.5, 1.0, 6.0]);

        let traj = trajectory(vec![vec![1.0, 1.0, 1.0]], vec![vec![false, true, false]])
            .with_values(vec![vec![1.0; 3]], vec![vec![0.0; 3]])?;
        let config = AdvantageConfig::default()
            .gamma(0.5)
            .estimator(EstimatorKind::NStepReturn);
        let adv = AdvantageEstimator::build(&config)?.estimate(&traj)?;
        // bootstrap of the fixture is zero
        assert_close(&adv.value_target[0], &[1.5, 1.0, 1.0]);
        assert_close(&adv.advantage[0], &[0.5, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_invalid_config() {
        assert!(AdvantageEstimator::build(&AdvantageConfig::default().gamma(0.0)).is_err());
        assert!(AdvantageEstimator::build(&AdvantageConfig::default().lambda(1.5)).is_err());
    }
}
