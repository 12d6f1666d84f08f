//! A corridor with a goal at its right end.
use crate::{load_yaml, save_yaml};
use anyhow::{ensure, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use stride_core::{Env, Step};

/// Configuration of [`Corridor`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CorridorConfig {
    /// Number of cells. The agent starts in cell 0, the goal is the last cell.
    pub length: usize,

    /// Episodes are truncated after this many steps.
    pub max_steps: usize,

    /// Reward of every step that does not reach the goal, usually negative.
    pub step_reward: f32,

    /// Reward for reaching the goal.
    pub goal_reward: f32,

    /// Probability that an action moves the agent the opposite way.
    pub slip_prob: f64,
}

impl Default for CorridorConfig {
    fn default() -> Self {
        Self {
            length: 5,
            max_steps: 20,
            step_reward: -0.1,
            goal_reward: 1.0,
            slip_prob: 0.0,
        }
    }
}

impl CorridorConfig {
    /// Sets the number of cells.
    pub fn length(mut self, v: usize) -> Self {
        self.length = v;
        self
    }

    /// Sets the time limit.
    pub fn max_steps(mut self, v: usize) -> Self {
        self.max_steps = v;
        self
    }

    /// Sets the probability of slipping.
    pub fn slip_prob(mut self, v: f64) -> Self {
        self.slip_prob = v;
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

/// Walk from the left end of a corridor to the right end.
///
/// Action 0 moves left, action 1 moves right. The observation is the one-hot
/// encoding of the current cell. Walking into the left wall keeps the agent
/// in cell 0.
pub struct Corridor {
    config: CorridorConfig,
    rng: StdRng,
    cell: usize,
    n_steps: usize,
}

impl Corridor {
    fn obs(&self) -> Vec<f32> {
        let mut obs = vec![0.0; self.config.length];
        obs[self.cell] = 1.0;
        obs
    }
}

impl Env for Corridor {
    type Config = CorridorConfig;
    type Obs = Vec<f32>;
    type Act = usize;
    type Info = ();

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        ensure!(config.length >= 2, "a corridor needs at least 2 cells");
        Ok(Self {
            config: config.clone(),
            rng: StdRng::seed_from_u64(seed as u64),
            cell: 0,
            n_steps: 0,
        })
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        self.cell = 0;
        self.n_steps = 0;
        Ok(self.obs())
    }

    /// The start state does not depend on `ix`.
    fn reset_with_index(&mut self, _ix: usize) -> Result<Vec<f32>> {
        self.reset()
    }

    fn step(&mut self, act: &usize) -> Result<Step<Self>> {
        ensure!(*act < 2, "invalid corridor action {}", act);
        let slip = self.config.slip_prob > 0.0 && self.rng.gen_bool(self.config.slip_prob);
        let right = (*act == 1) != slip;
        self.cell = match right {
            true => self.cell + 1,
            false => self.cell.saturating_sub(1),
        };
        self.n_steps += 1;

        let is_terminated = self.cell == self.config.length - 1;
        let is_truncated = !is_terminated && self.n_steps >= self.config.max_steps;
        let reward = match is_terminated {
            true => self.config.goal_reward,
            false => self.config.step_reward,
        };
        Ok(Step::new(self.obs(), reward, is_terminated, is_truncated, ()))
    }
}
