//! Move a point to a target.
use crate::{load_yaml, save_yaml};
use anyhow::Result;
use log::trace;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use stride_core::{error::StrideError, Env, Step};

/// Configuration of [`PointReach`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PointReachConfig {
    /// Dimension of the space.
    pub dim: usize,

    /// Episodes are truncated after this many steps.
    pub max_steps: usize,

    /// Each component of an action is clipped to `[-max_speed, max_speed]`.
    pub max_speed: f32,

    /// The episode terminates when the point is closer than this to the target.
    pub tolerance: f32,

    /// Start and target coordinates are drawn from `[-init_range, init_range]`.
    pub init_range: f32,
}

impl Default for PointReachConfig {
    fn default() -> Self {
        Self {
            dim: 1,
            max_steps: 50,
            max_speed: 1.0,
            tolerance: 0.1,
            init_range: 2.0,
        }
    }
}

impl PointReachConfig {
    /// Sets the dimension.
    pub fn dim(mut self, v: usize) -> Self {
        self.dim = v;
        self
    }

    /// Sets the time limit.
    pub fn max_steps(mut self, v: usize) -> Self {
        self.max_steps = v;
        self
    }

    /// Sets the speed limit.
    pub fn max_speed(mut self, v: f32) -> Self {
        self.max_speed = v;
        self
    }

    /// Sets the distance at which the target is reached.
    pub fn tolerance(mut self, v: f32) -> Self {
        self.tolerance = v;
        self
    }

    /// Sets the range of initial coordinates.
    pub fn init_range(mut self, v: f32) -> Self {
        self.init_range = v;
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

/// A point moving in `R^dim` towards a random target.
///
/// The observation is `target - position`, the action a velocity. The reward
/// of a step is the negative distance to the target after moving, so the
/// return of an episode is higher the faster the target is reached. Moving
/// with velocity equal to the observation is optimal as long as the speed
/// limit is not hit.
pub struct PointReach {
    config: PointReachConfig,
    seed: u64,
    rng: StdRng,
    position: Vec<f32>,
    target: Vec<f32>,
    n_steps: usize,
}

impl PointReach {
    fn obs(&self) -> Vec<f32> {
        self.target
            .iter()
            .zip(self.position.iter())
            .map(|(t, p)| t - p)
            .collect()
    }

    fn distance(&self) -> f32 {
        self.obs().iter().map(|d| d * d).sum::<f32>().sqrt()
    }

    fn start(&mut self, position: Vec<f32>, target: Vec<f32>) -> Vec<f32> {
        self.position = position;
        self.target = target;
        self.n_steps = 0;
        self.obs()
    }
}

fn draw(config: &PointReachConfig, rng: &mut StdRng) -> (Vec<f32>, Vec<f32>) {
    let r = config.init_range;
    let mut coords = || -> Vec<f32> { (0..config.dim).map(|_| rng.gen_range(-r..=r)).collect() };
    let position = coords();
    (position, coords())
}

impl Env for PointReach {
    type Config = PointReachConfig;
    type Obs = Vec<f32>;
    type Act = Vec<f32>;
    type Info = ();

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            seed: seed as u64,
            rng: StdRng::seed_from_u64(seed as u64),
            position: vec![0.0; config.dim],
            target: vec![0.0; config.dim],
            n_steps: 0,
        })
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        let (position, target) = draw(&self.config, &mut self.rng);
        Ok(self.start(position, target))
    }

    /// Episode `ix` starts from the same position and target every time.
    fn reset_with_index(&mut self, ix: usize) -> Result<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(ix as u64));
        let (position, target) = draw(&self.config, &mut rng);
        Ok(self.start(position, target))
    }

    fn step(&mut self, act: &Vec<f32>) -> Result<Step<Self>> {
        StrideError::check_len("point reach", self.config.dim, act.len())?;
        let v = self.config.max_speed;
        for (p, a) in self.position.iter_mut().zip(act.iter()) {
            *p += a.clamp(-v, v);
        }
        self.n_steps += 1;

        let distance = self.distance();
        let is_terminated = distance < self.config.tolerance;
        let is_truncated = !is_terminated && self.n_steps >= self.config.max_steps;
        if is_terminated {
            trace!("Reached the target in {} steps", self.n_steps);
        }
        Ok(Step::new(self.obs(), -distance, is_terminated, is_truncated, ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_greedy_reaches_target() -> Result<()> {
        let config = PointReachConfig::default().dim(2).max_speed(10.0);
        let mut env = PointReach::build(&config, 0)?;
        let obs = env.reset()?;
        let step = env.step(&obs)?;
        assert!(step.is_terminated);
        assert!(step.reward.abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_truncation_and_speed_limit() -> Result<()> {
        let config = PointReachConfig::default().max_steps(3).max_speed(0.1).init_range(1.0);
        let mut env = PointReach::build(&config, 1)?;
        let obs = env.reset()?;
        let step = env.step(&vec![100.0 * obs[0].signum()])?;
        assert!((step.obs[0].abs() - (obs[0].abs() - 0.1).abs()).abs() < 1e-5);

        env.step(&vec![0.0])?;
        let step = env.step(&vec![0.0])?;
        assert!(step.is_truncated || step.is_terminated);
        Ok(())
    }

    #[test]
    fn test_reset_with_index_is_reproducible() -> Result<()> {
        let mut env = PointReach::build(&PointReachConfig::default(), 7)?;
        let first = env.reset_with_index(3)?;
        env.reset()?;
        assert_eq!(env.reset_with_index(3)?, first);
        assert_ne!(env.reset_with_index(4)?, first);
        Ok(())
    }

    #[test]
    fn test_wrong_action_dim() -> Result<()> {
        let mut env = PointReach::build(&PointReachConfig::default().dim(3), 0)?;
        env.reset()?;
        assert!(env.step(&vec![0.0]).is_err());
        Ok(())
    }

    #[test]
    fn test_serde_config() -> Result<()> {
        let dir = TempDir::new("point_reach")?;
        let path = dir.path().join("point_reach.yaml");
        let config = PointReachConfig::default().dim(3).tolerance(0.05);
        config.save(&path)?;
        assert_eq!(PointReachConfig::load(&path)?, config);
        Ok(())
    }
}
