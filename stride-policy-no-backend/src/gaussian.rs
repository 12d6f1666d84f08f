//! Diagonal Gaussian policy with a linear mean.
use crate::{clip_grad_norm, load_bincode, load_yaml, save_bincode, save_yaml, Mat};
use anyhow::{ensure, Result};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::path::Path;
use stride_core::{error::StrideError, Env, Policy, PolicyModel};

const HALF_LN_2PI: f32 = 0.918_938_5;

/// Configuration of [`LinearGaussianPolicy`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LinearGaussianPolicyConfig {
    /// Dimension of observations.
    pub obs_dim: usize,

    /// Dimension of actions.
    pub act_dim: usize,

    /// Initial log standard deviation of every action dimension.
    pub init_log_std: f32,

    /// Learn the standard deviation. Otherwise it stays at `init_log_std`.
    pub learn_std: bool,

    /// SGD step size.
    pub learning_rate: f32,

    /// Gradients are rescaled to at most this L2 norm.
    pub max_grad_norm: Option<f32>,
}

impl Default for LinearGaussianPolicyConfig {
    fn default() -> Self {
        Self {
            obs_dim: 1,
            act_dim: 1,
            init_log_std: 0.0,
            learn_std: true,
            learning_rate: 0.01,
            max_grad_norm: Some(1.0),
        }
    }
}

impl LinearGaussianPolicyConfig {
    /// Sets the dimensions of observations and actions.
    pub fn dims(mut self, obs_dim: usize, act_dim: usize) -> Self {
        self.obs_dim = obs_dim;
        self.act_dim = act_dim;
        self
    }

    /// Sets the initial log standard deviation.
    pub fn init_log_std(mut self, v: f32) -> Self {
        self.init_log_std = v;
        self
    }

    /// Learn the standard deviation or not.
    pub fn learn_std(mut self, v: bool) -> Self {
        self.learn_std = v;
        self
    }

    /// Sets the step size.
    pub fn learning_rate(mut self, v: f32) -> Self {
        self.learning_rate = v;
        self
    }

    /// Sets the gradient clipping norm.
    pub fn max_grad_norm(mut self, v: Option<f32>) -> Self {
        self.max_grad_norm = v;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_yaml(path.as_ref())
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_yaml(self, path.as_ref())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
struct Params {
    w: Mat,
    b: Vec<f32>,
    log_std: Vec<f32>,
}

/// `a ~ N(W s + b, diag(exp(log_std))^2)`.
///
/// Parameters are flattened as `[W (row-major), b, log_std]`. In evaluation
/// mode [`Policy::sample`] returns the mean.
pub struct LinearGaussianPolicy {
    config: LinearGaussianPolicyConfig,
    params: Params,
    train: bool,
    rng: StdRng,
}

impl LinearGaussianPolicy {
    /// Builds a policy with zero weights.
    pub fn build(config: LinearGaussianPolicyConfig, seed: u64) -> Self {
        let (n, m) = (config.act_dim, config.obs_dim);
        let params = Params {
            w: Mat::zeros(n, m),
            b: vec![0.0; n],
            log_std: vec![config.init_log_std; n],
        };
        Self {
            config,
            params,
            train: true,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Mean action at `obs`.
    pub fn mean(&self, obs: &[f32]) -> Vec<f32> {
        self.params
            .w
            .matvec(obs)
            .into_iter()
            .zip(self.params.b.iter())
            .map(|(x, b)| x + b)
            .collect()
    }

    /// Standard deviations of the action dimensions.
    pub fn std(&self) -> Vec<f32> {
        self.params.log_std.iter().map(|l| l.exp()).collect()
    }

    fn n_params(&self) -> usize {
        self.params.w.data.len() + self.params.b.len() + self.params.log_std.len()
    }

    fn check_pair(&self, obs: &[f32], act: &[f32]) -> Result<(), StrideError> {
        StrideError::check_len("linear gaussian policy", self.config.obs_dim, obs.len())?;
        StrideError::check_len("linear gaussian policy", self.config.act_dim, act.len())
    }

    fn log_prob_one(&self, obs: &[f32], act: &[f32]) -> f32 {
        self.mean(obs)
            .iter()
            .zip(act.iter())
            .zip(self.params.log_std.iter())
            .map(|((mu, a), l)| {
                let z = (a - mu) / l.exp();
                -0.5 * z * z - l - HALF_LN_2PI
            })
            .sum()
    }

    fn grad_one(&self, obs: &[f32], act: &[f32]) -> Vec<f32> {
        let (n, m) = (self.config.act_dim, self.config.obs_dim);
        let mut w = Mat::zeros(n, m);
        let mut b = vec![0.0; n];
        let mut log_std = vec![0.0; n];
        let mu = self.mean(obs);

        for i in 0..n {
            let var = (2.0 * self.params.log_std[i]).exp();
            let d = act[i] - mu[i];
            b[i] = d / var;
            if self.config.learn_std {
                log_std[i] = d * d / var - 1.0;
            }
        }
        w.add_outer(1.0, &b, obs);

        let mut grad = w.data;
        grad.extend(b);
        grad.extend(log_std);
        grad
    }
}

impl<E> Policy<E> for LinearGaussianPolicy
where
    E: Env<Act = Vec<f32>>,
    E::Obs: AsRef<[f32]>,
{
    fn sample(&mut self, obs: &E::Obs) -> Vec<f32> {
        let mu = self.mean(obs.as_ref());
        match self.train {
            true => mu
                .into_iter()
                .zip(self.params.log_std.iter())
                .map(|(mu, l)| {
                    let eps: f32 = StandardNormal.sample(&mut self.rng);
                    mu + l.exp() * eps
                })
                .collect(),
            false => mu,
        }
    }
}

impl<E> PolicyModel<E> for LinearGaussianPolicy
where
    E: Env<Act = Vec<f32>>,
    E::Obs: AsRef<[f32]>,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn log_prob(&self, obs: &[E::Obs], act: &[Vec<f32>]) -> Result<Vec<f32>> {
        StrideError::check_len("linear gaussian policy", obs.len(), act.len())?;
        obs.iter()
            .zip(act.iter())
            .map(|(o, a)| {
                self.check_pair(o.as_ref(), a)?;
                Ok(self.log_prob_one(o.as_ref(), a))
            })
            .collect()
    }

    fn grad_log_prob(&self, obs: &[E::Obs], act: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        StrideError::check_len("linear gaussian policy", obs.len(), act.len())?;
        obs.iter()
            .zip(act.iter())
            .map(|(o, a)| {
                self.check_pair(o.as_ref(), a)?;
                Ok(self.grad_one(o.as_ref(), a))
            })
            .collect()
    }

    /// The entropy `sum(log_std) + const` only depends on `log_std`.
    fn entropy_grad(&self, _obs: &[E::Obs]) -> Result<Option<Vec<f32>>> {
        if !self.config.learn_std {
            return Ok(None);
        }
        let n = self.config.act_dim;
        let mut grad = vec![0.0; self.n_params() - n];
        grad.extend(vec![1.0; n]);
        Ok(Some(grad))
    }

    fn params(&self) -> Vec<f32> {
        let mut params = self.params.w.data.clone();
        params.extend(self.params.b.iter());
        params.extend(self.params.log_std.iter());
        params
    }

    fn set_params(&mut self, params: &[f32]) -> Result<()> {
        StrideError::check_len("linear gaussian policy", self.n_params(), params.len())?;
        let (nw, nb) = (self.params.w.data.len(), self.params.b.len());
        self.params.w.data.copy_from_slice(&params[..nw]);
        self.params.b.copy_from_slice(&params[nw..nw + nb]);
        self.params.log_std.copy_from_slice(&params[nw + nb..]);
        Ok(())
    }

    fn apply_gradient(&mut self, grad: &[f32]) -> Result<()> {
        StrideError::check_len("linear gaussian policy", self.n_params(), grad.len())?;
        let mut grad = grad.to_vec();
        clip_grad_norm(&mut grad, self.config.max_grad_norm);
        let lr = self.config.learning_rate;
        let params: Vec<f32> = PolicyModel::<E>::params(self)
            .iter()
            .zip(grad.iter())
            .map(|(p, g)| p + lr * g)
            .collect();
        PolicyModel::<E>::set_params(self, &params)
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        save_bincode(&self.params, path)
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let params: Params = load_bincode(path)?;
        ensure!(
            params.w.shape == self.params.w.shape && params.log_std.len() == self.params.log_std.len(),
            "parameters in {:?} have shape {:?}, expected {:?}",
            path,
            params.w.shape,
            self.params.w.shape
        );
        self.params = params;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_core::Step;
    use tempdir::TempDir;

    /// Only the associated types matter.
    struct VecEnv;

    impl Env for VecEnv {
        type Config = ();
        type Obs = Vec<f32>;
        type Act = Vec<f32>;
        type Info = ();

        fn build(_config: &(), _seed: i64) -> Result<Self> {
            Ok(Self)
        }

        fn reset(&mut self) -> Result<Vec<f32>> {
            Ok(vec![])
        }

        fn reset_with_index(&mut self, _ix: usize) -> Result<Vec<f32>> {
            Ok(vec![])
        }

        fn step(&mut self, _act: &Vec<f32>) -> Result<Step<Self>> {
            Ok(Step::new(vec![], 0.0, true, false, ()))
        }
    }

    fn policy() -> LinearGaussianPolicy {
        let config = LinearGaussianPolicyConfig::default().dims(2, 1).init_log_std(0.5);
        let mut policy = LinearGaussianPolicy::build(config, 0);
        PolicyModel::<VecEnv>::set_params(&mut policy, &[0.3, -0.2, 0.1, 0.5]).unwrap();
        policy
    }

    #[test]
    fn test_grad_matches_finite_difference() -> Result<()> {
        let mut policy = policy();
        let (obs, act) = (vec![vec![1.0, 2.0]], vec![vec![0.7]]);
        let grad = PolicyModel::<VecEnv>::grad_log_prob(&policy, &obs, &act)?[0].clone();
        let params = PolicyModel::<VecEnv>::params(&policy);

        let h = 1e-3;
        for k in 0..params.len() {
            let mut p = params.clone();
            p[k] += h;
            PolicyModel::<VecEnv>::set_params(&mut policy, &p)?;
            let up = PolicyModel::<VecEnv>::log_prob(&policy, &obs, &act)?[0];
            p[k] -= 2.0 * h;
            PolicyModel::<VecEnv>::set_params(&mut policy, &p)?;
            let down = PolicyModel::<VecEnv>::log_prob(&policy, &obs, &act)?[0];
            let fd = (up - down) / (2.0 * h);
            assert!((fd - grad[k]).abs() < 1e-2, "param {}: {} vs {}", k, fd, grad[k]);
        }
        Ok(())
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let mut policy = policy();
        PolicyModel::<VecEnv>::eval(&mut policy);
        let a = Policy::<VecEnv>::sample(&mut policy, &vec![1.0, 2.0]);
        assert!((a[0] - (0.3 - 0.4 + 0.1)).abs() < 1e-6);
    }

    #[test]
    fn test_shape_mismatch() {
        let policy = policy();
        let err = PolicyModel::<VecEnv>::log_prob(&policy, &[vec![1.0]], &[vec![0.0]]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StrideError>(),
            Some(StrideError::ShapeMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_save_load() -> Result<()> {
        let dir = TempDir::new("linear_gaussian")?;
        let path = dir.path().join("policy");
        let policy = policy();
        PolicyModel::<VecEnv>::save_params(&policy, &path)?;

        let config = LinearGaussianPolicyConfig::default().dims(2, 1);
        let mut loaded = LinearGaussianPolicy::build(config, 1);
        PolicyModel::<VecEnv>::load_params(&mut loaded, &path)?;
        assert_eq!(
            PolicyModel::<VecEnv>::params(&loaded),
            PolicyModel::<VecEnv>::params(&policy)
        );

        let mut wrong = LinearGaussianPolicy::build(LinearGaussianPolicyConfig::default().dims(3, 1), 1);
        assert!(PolicyModel::<VecEnv>::load_params(&mut wrong, &path).is_err());
        Ok(())
    }
}
