//! Categorical policy over linear logits.
use crate::{clip_grad_norm, load_bincode, load_yaml, save_bincode, save_yaml, Mat};
use anyhow::{ensure, Result};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, WeightedIndex};
use serde::{Deserialize, Serialize};
use std::path::Path;
use stride_core::{error::StrideError, Env, Policy, PolicyModel};

/// Configuration of [`LinearSoftmaxPolicy`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LinearSoftmaxPolicyConfig {
    /// Dimension of observations.
    pub obs_dim: usize,

    /// Number of discrete actions.
    pub n_actions: usize,

    /// SGD step size.
    pub learning_rate: f32,

    /// Gradients are rescaled to at most this L2 norm.
    pub max_grad_norm: Option<f32>,
}

impl Default for LinearSoftmaxPolicyConfig {
    fn default() -> Self {
        Self {
            obs_dim: 1,
            n_actions: 2,
            learning_rate: 0.01,
            max_grad_norm: Some(1.0),
        }
    }
}

impl LinearSoftmaxPolicyConfig {
    /// Sets the dimension of observations and the number of actions.
    pub fn dims(mut self, obs_dim: usize, n_actions: usize) -> Self {
        self.obs_dim = obs_dim;
        self.n_actions = n_actions;
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
}

/// `π(a|s) = softmax(W s + b)_a`.
///
/// Parameters are flattened as `[W (row-major), b]`. In evaluation mode
/// [`Policy::sample`] returns the most probable action.
pub struct LinearSoftmaxPolicy {
    config: LinearSoftmaxPolicyConfig,
    params: Params,
    train: bool,
    rng: StdRng,
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let lse = logits.iter().map(|l| (l - max).exp()).sum::<f32>().ln() + max;
    logits.iter().map(|l| l - lse).collect()
}

fn argmax(xs: &[f32]) -> usize {
    xs.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(im, m), (i, &x)| match x > m {
            true => (i, x),
            false => (im, m),
        })
        .0
}

impl LinearSoftmaxPolicy {
    /// Builds a policy with zero weights, i.e., uniform over actions.
    pub fn build(config: LinearSoftmaxPolicyConfig, seed: u64) -> Self {
        let params = Params {
            w: Mat::zeros(config.n_actions, config.obs_dim),
            b: vec![0.0; config.n_actions],
        };
        Self {
            config,
            params,
            train: true,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Action probabilities at `obs`.
    pub fn probs(&self, obs: &[f32]) -> Vec<f32> {
        self.log_probs(obs).into_iter().map(f32::exp).collect()
    }

    fn log_probs(&self, obs: &[f32]) -> Vec<f32> {
        let logits: Vec<f32> = self
            .params
            .w
            .matvec(obs)
            .into_iter()
            .zip(self.params.b.iter())
            .map(|(x, b)| x + b)
            .collect();
        log_softmax(&logits)
    }

    fn n_params(&self) -> usize {
        self.params.w.data.len() + self.params.b.len()
    }

    fn check_obs(&self, obs: &[f32]) -> Result<(), StrideError> {
        StrideError::check_len("linear softmax policy", self.config.obs_dim, obs.len())
    }

    fn check_act(&self, act: usize) -> Result<()> {
        ensure!(
            act < self.config.n_actions,
            "action {} out of range of {} actions",
            act,
            self.config.n_actions
        );
        Ok(())
    }

    /// Flattens the gradient w.r.t. the logits into a parameter gradient.
    fn logit_grad_to_params(&self, g: &[f32], obs: &[f32]) -> Vec<f32> {
        let mut w = Mat::zeros(self.config.n_actions, self.config.obs_dim);
        w.add_outer(1.0, g, obs);
        let mut grad = w.data;
        grad.extend_from_slice(g);
        grad
    }
}

impl<E> Policy<E> for LinearSoftmaxPolicy
where
    E: Env<Act = usize>,
    E::Obs: AsRef<[f32]>,
{
    fn sample(&mut self, obs: &E::Obs) -> usize {
        let probs = self.probs(obs.as_ref());
        match self.train {
            true => match WeightedIndex::new(&probs) {
                Ok(dist) => dist.sample(&mut self.rng),
                Err(_) => argmax(&probs),
            },
            false => argmax(&probs),
        }
    }
}

impl<E> PolicyModel<E> for LinearSoftmaxPolicy
where
    E: Env<Act = usize>,
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

    fn log_prob(&self, obs: &[E::Obs], act: &[usize]) -> Result<Vec<f32>> {
        StrideError::check_len("linear softmax policy", obs.len(), act.len())?;
        obs.iter()
            .zip(act.iter())
            .map(|(o, &a)| {
                self.check_obs(o.as_ref())?;
                self.check_act(a)?;
                Ok(self.log_probs(o.as_ref())[a])
            })
            .collect()
    }

    /// `∇ log π(a|s)` w.r.t. the logits is `onehot(a) - π(·|s)`.
    fn grad_log_prob(&self, obs: &[E::Obs], act: &[usize]) -> Result<Vec<Vec<f32>>> {
        StrideError::check_len("linear softmax policy", obs.len(), act.len())?;
        obs.iter()
            .zip(act.iter())
            .map(|(o, &a)| {
                self.check_obs(o.as_ref())?;
                self.check_act(a)?;
                let mut g: Vec<f32> = self.probs(o.as_ref()).into_iter().map(|p| -p).collect();
                g[a] += 1.0;
                Ok(self.logit_grad_to_params(&g, o.as_ref()))
            })
            .collect()
    }

    /// `dH/dlogit_i = -π_i (log π_i + H)`, averaged over `obs`.
    fn entropy_grad(&self, obs: &[E::Obs]) -> Result<Option<Vec<f32>>> {
        let mut grad = vec![0.0; self.n_params()];
        if obs.is_empty() {
            return Ok(Some(grad));
        }
        for o in obs.iter() {
            self.check_obs(o.as_ref())?;
            let log_p = self.log_probs(o.as_ref());
            let h: f32 = -log_p.iter().map(|l| l.exp() * l).sum::<f32>();
            let g: Vec<f32> = log_p.iter().map(|l| -l.exp() * (l + h)).collect();
            for (acc, x) in grad.iter_mut().zip(self.logit_grad_to_params(&g, o.as_ref())) {
                *acc += x;
            }
        }
        let n = obs.len() as f32;
        grad.iter_mut().for_each(|g| *g /= n);
        Ok(Some(grad))
    }

    fn params(&self) -> Vec<f32> {
        let mut params = self.params.w.data.clone();
        params.extend(self.params.b.iter());
        params
    }

    fn set_params(&mut self, params: &[f32]) -> Result<()> {
        StrideError::check_len("linear softmax policy", self.n_params(), params.len())?;
        let nw = self.params.w.data.len();
        self.params.w.data.copy_from_slice(&params[..nw]);
        self.params.b.copy_from_slice(&params[nw..]);
        Ok(())
    }

    fn apply_gradient(&mut self, grad: &[f32]) -> Result<()> {
        StrideError::check_len("linear softmax policy", self.n_params(), grad.len())?;
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
            params.w.shape == self.params.w.shape,
            "parameters in {:?} have shape {:?}, expected {:?}",
            path,
            params.w.shape,
            self.params.w.shape
        );
        self.params = params;
        Ok(())
    }
}
