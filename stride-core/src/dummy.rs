//! Deterministic environment and minimal models, used in tests and doc examples.
use crate::{Env, Policy, PolicyModel, Step, ValueModel};
use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

/// Rewards and episode length of one slot of [`ScriptedEnv`].
#[derive(Clone, Debug)]
pub struct Script {
    /// Rewards, cycled over the lifetime of the environment.
    pub rewards: Vec<f32>,

    /// Every episode ends after this many steps.
    pub episode_len: usize,
}

impl Script {
    /// Constructs a script.
    pub fn new(rewards: Vec<f32>, episode_len: usize) -> Self {
        Self {
            rewards,
            episode_len,
        }
    }
}

/// Configuration of [`ScriptedEnv`]. The environment built with seed `s`
/// plays `scripts[s % scripts.len()]`.
#[derive(Clone, Debug)]
pub struct ScriptedEnvConfig {
    scripts: Vec<Script>,
}

impl ScriptedEnvConfig {
    /// Configuration with one script per seed.
    pub fn new(scripts: Vec<Script>) -> Self {
        Self { scripts }
    }

    /// Same constant reward and episode length for every seed.
    pub fn constant(reward: f32, episode_len: usize) -> Self {
        Self::new(vec![Script::new(vec![reward], episode_len)])
    }
}

/// An environment replaying a fixed reward sequence.
///
/// The observation is `[seed, t]`, `t` being the step index inside the
/// current episode. Actions are ignored.
pub struct ScriptedEnv {
    seed: f32,
    script: Script,
    t: usize,
    n_steps: usize,
}

impl Env for ScriptedEnv {
    type Config = ScriptedEnvConfig;
    type Obs = Vec<f32>;
    type Act = f32;
    type Info = ();

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        let script = config.scripts[seed as usize % config.scripts.len()].clone();
        Ok(Self {
            seed: seed as f32,
            script,
            t: 0,
            n_steps: 0,
        })
    }

    fn reset(&mut self) -> Result<Self::Obs> {
        self.t = 0;
        Ok(vec![self.seed, 0.0])
    }

    fn reset_with_index(&mut self, _ix: usize) -> Result<Self::Obs> {
        self.reset()
    }

    fn step(&mut self, _act: &Self::Act) -> Result<Step<Self>> {
        let reward = self.script.rewards[self.n_steps % self.script.rewards.len()];
        self.n_steps += 1;
        self.t += 1;
        let is_terminated = self.t >= self.script.episode_len;
        Ok(Step::new(
            vec![self.seed, self.t as f32],
            reward,
            is_terminated,
            false,
            (),
        ))
    }
}

/// A value function predicting the same value everywhere.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConstantValue {
    /// The predicted value.
    pub value: f32,

    /// Number of calls to [`ValueModel::update`].
    #[serde(skip)]
    pub n_updates: usize,
}

impl ConstantValue {
    /// Constructs the model.
    pub fn new(value: f32) -> Self {
        Self {
            value,
            n_updates: 0,
        }
    }
}

impl<E: Env> ValueModel<E> for ConstantValue {
    fn predict(&self, obs: &[E::Obs]) -> Result<Vec<f32>> {
        Ok(vec![self.value; obs.len()])
    }

    fn update(&mut self, obs: &[E::Obs], targets: &[f32]) -> Result<f32> {
        crate::error::StrideError::check_len("constant value", obs.len(), targets.len())?;
        self.n_updates += 1;
        let n = targets.len().max(1) as f32;
        Ok(targets.iter().map(|t| (t - self.value).powi(2)).sum::<f32>() / n)
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let loaded: Self = serde_yaml::from_reader(BufReader::new(File::open(path)?))?;
        self.value = loaded.value;
        Ok(())
    }
}

/// A one-parameter Gaussian policy over `f32` actions, `a ~ N(mu, 1)`.
///
/// The observation is ignored, so `∇_mu log π(a) = a - mu`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScalarGaussianPolicy {
    /// Mean of the action distribution.
    pub mu: f32,

    /// Step size of [`PolicyModel::apply_gradient`].
    pub learning_rate: f32,

    #[serde(skip)]
    train: bool,

    #[serde(skip, default = "default_rng")]
    rng: StdRng,
}

fn default_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}

impl ScalarGaussianPolicy {
    /// Constructs the policy.
    pub fn new(mu: f32, learning_rate: f32, seed: u64) -> Self {
        Self {
            mu,
            learning_rate,
            train: true,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn standard_normal(&mut self) -> f32 {
        // Box-Muller
        let u1: f32 = self.rng.gen_range(f32::EPSILON..1.0);
        let u2: f32 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
    }
}

impl<E: Env<Act = f32>> Policy<E> for ScalarGaussianPolicy {
    fn sample(&mut self, _obs: &E::Obs) -> f32 {
        match self.train {
            true => self.mu + self.standard_normal(),
            false => self.mu,
        }
    }
}

impl<E: Env<Act = f32>> PolicyModel<E> for ScalarGaussianPolicy {
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn log_prob(&self, obs: &[E::Obs], act: &[f32]) -> Result<Vec<f32>> {
        crate::error::StrideError::check_len("scalar gaussian policy", obs.len(), act.len())?;
        let c = 0.5 * (2.0 * std::f32::consts::PI).ln();
        Ok(act.iter().map(|a| -0.5 * (a - self.mu).powi(2) - c).collect())
    }

    fn grad_log_prob(&self, obs: &[E::Obs], act: &[f32]) -> Result<Vec<Vec<f32>>> {
        crate::error::StrideError::check_len("scalar gaussian policy", obs.len(), act.len())?;
        Ok(act.iter().map(|a| vec![a - self.mu]).collect())
    }

    fn params(&self) -> Vec<f32> {
        vec![self.mu]
    }

    fn set_params(&mut self, params: &[f32]) -> Result<()> {
        crate::error::StrideError::check_len("scalar gaussian policy", 1, params.len())?;
        self.mu = params[0];
        Ok(())
    }

    fn apply_gradient(&mut self, grad: &[f32]) -> Result<()> {
        crate::error::StrideError::check_len("scalar gaussian policy", 1, grad.len())?;
        self.mu += self.learning_rate * grad[0];
        Ok(())
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let loaded: Self = serde_yaml::from_reader(BufReader::new(File::open(path)?))?;
        self.mu = loaded.mu;
        Ok(())
    }
}
