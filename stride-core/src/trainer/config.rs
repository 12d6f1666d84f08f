//! Configuration of [`Trainer`](super::Trainer).
use crate::{AdvantageConfig, CheckpointConfig, PolicyUpdateConfig, ValueUpdateConfig};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Trainer`](super::Trainer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrainerConfig {
    /// The number of rollout-update cycles.
    pub n_cycles: usize,

    /// The number of environments stepped in parallel, `E`.
    pub n_envs: usize,

    /// Steps per environment and cycle, `H`.
    pub horizon: usize,

    /// Seed of the environments and of minibatch sampling. Slot `i` of the
    /// pool is seeded with `seed + i`, the evaluation environment with
    /// `seed + n_envs`.
    pub seed: i64,

    /// Predict `V(s_t)` while collecting instead of in two batched calls
    /// after the rollout.
    pub inline_values: bool,

    /// Normalize advantages of each training batch.
    pub normalize_advantages: bool,

    /// Interval of evaluation in cycles.
    pub eval_interval: usize,

    /// Episodes per evaluation.
    pub n_eval_episodes: usize,

    /// Upper bound on the steps of an evaluation episode.
    pub eval_max_steps: Option<usize>,

    /// Interval of flushing records in cycles.
    pub flush_record_interval: usize,

    /// Advantage estimation.
    pub advantage: AdvantageConfig,

    /// Policy update strategy.
    pub policy_update: PolicyUpdateConfig,

    /// Value regression.
    pub value_update: ValueUpdateConfig,

    /// Checkpointing.
    pub checkpoint: CheckpointConfig,

    /// Resume the session saved in the checkpoint directory, if any.
    pub resume: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            n_cycles: 0,
            n_envs: 4,
            horizon: 256,
            seed: 42,
            inline_values: false,
            normalize_advantages: true,
            eval_interval: 1,
            n_eval_episodes: 3,
            eval_max_steps: None,
            flush_record_interval: 1,
            advantage: AdvantageConfig::default(),
            policy_update: PolicyUpdateConfig::default(),
            value_update: ValueUpdateConfig::default(),
            checkpoint: CheckpointConfig::default(),
            resume: false,
        }
    }
}

impl TrainerConfig {
    /// Sets the number of cycles.
    pub fn n_cycles(mut self, v: usize) -> Self {
        self.n_cycles = v;
        self
    }

    /// Sets the number of parallel environments.
    pub fn n_envs(mut self, v: usize) -> Self {
        self.n_envs = v;
        self
    }

    /// Sets the horizon.
    pub fn horizon(mut self, v: usize) -> Self {
        self.horizon = v;
        self
    }

    /// Sets the seed.
    pub fn seed(mut self, v: i64) -> Self {
        self.seed = v;
        self
    }

    /// Predicts values while collecting rollouts.
    pub fn inline_values(mut self, v: bool) -> Self {
        self.inline_values = v;
        self
    }

    /// Enables or disables advantage normalization.
    pub fn normalize_advantages(mut self, v: bool) -> Self {
        self.normalize_advantages = v;
        self
    }

    /// Sets the interval of evaluation in cycles.
    pub fn eval_interval(mut self, v: usize) -> Self {
        self.eval_interval = v;
        self
    }

    /// Sets the number of episodes per evaluation.
    pub fn n_eval_episodes(mut self, v: usize) -> Self {
        self.n_eval_episodes = v;
        self
    }

    /// Sets the maximum number of steps of an evaluation episode.
    pub fn eval_max_steps(mut self, v: Option<usize>) -> Self {
        self.eval_max_steps = v;
        self
    }

    /// Sets the interval of flushing records in cycles.
    pub fn flush_record_interval(mut self, v: usize) -> Self {
        self.flush_record_interval = v;
        self
    }

    /// Sets the advantage estimation.
    pub fn advantage(mut self, v: AdvantageConfig) -> Self {
        self.advantage = v;
        self
    }

    /// Sets the policy update strategy.
    pub fn policy_update(mut self, v: PolicyUpdateConfig) -> Self {
        self.policy_update = v;
        self
    }

    /// Sets the value regression.
    pub fn value_update(mut self, v: ValueUpdateConfig) -> Self {
        self.value_update = v;
        self
    }

    /// Sets checkpointing.
    pub fn checkpoint(mut self, v: CheckpointConfig) -> Self {
        self.checkpoint = v;
        self
    }

    /// Resumes a saved session.
    pub fn resume(mut self, v: bool) -> Self {
        self.resume = v;
        self
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScoreSource, TrustRegionConfig};
    use tempdir::TempDir;

    #[test]
    fn test_serde_trainer_config() -> Result<()> {
        let config = TrainerConfig::default()
            .n_cycles(100)
            .horizon(1024)
            .n_envs(1)
            .eval_max_steps(Some(200))
            .policy_update(PolicyUpdateConfig::TrustRegion(TrustRegionConfig::default().max_kl(0.02)))
            .checkpoint(
                CheckpointConfig::default()
                    .roles("actor", "critic")
                    .score_source(ScoreSource::TrainingEpisodes),
            );

        let dir = TempDir::new("trainer_config")?;
        let path = dir.path().join("trainer_config.yaml");
        config.save(&path)?;
        let config_ = TrainerConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}
