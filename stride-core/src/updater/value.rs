//! Value function regression.
use super::mean;
use crate::{
    record::{Record, RecordValue},
    Env, MinibatchConfig, TrainingBatch, ValueModel,
};
use anyhow::Result;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Configuration of [`ValueRegression`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ValueUpdateConfig {
    /// Passes over the training batch per cycle.
    pub n_epochs: usize,

    /// Minibatches of each pass.
    pub minibatch: MinibatchConfig,
}

impl Default for ValueUpdateConfig {
    fn default() -> Self {
        Self {
            n_epochs: 1,
            minibatch: MinibatchConfig::default().size(64),
        }
    }
}

impl ValueUpdateConfig {
    /// Sets the number of passes per cycle.
    pub fn n_epochs(mut self, v: usize) -> Self {
        self.n_epochs = v;
        self
    }

    /// Sets the minibatch configuration.
    pub fn minibatch(mut self, v: MinibatchConfig) -> Self {
        self.minibatch = v;
        self
    }
}

/// Fits the value function to the value targets of a batch by
/// mean-squared error.
pub struct ValueRegression {
    config: ValueUpdateConfig,
}

impl ValueRegression {
    /// Constructs the regression.
    pub fn new(config: ValueUpdateConfig) -> Self {
        Self { config }
    }

    /// Runs the regression of one cycle.
    pub fn update<E, V>(&self, value: &mut V, batch: &TrainingBatch<E>, rng: &mut StdRng) -> Result<Record>
    where
        E: Env,
        V: ValueModel<E>,
    {
        let mut losses = vec![];
        for _ in 0..self.config.n_epochs {
            for ixs in self.config.minibatch.sample_indices(batch.len(), rng) {
                let (obs, targets) = batch.gather_value(&ixs);
                losses.push(value.update(&obs, &targets)?);
            }
        }
        Ok(Record::from_slice(&[
            ("loss_value", RecordValue::Scalar(mean(&losses))),
            ("n_value_steps", RecordValue::Scalar(losses.len() as f32)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{ConstantValue, ScriptedEnv};
    use rand::SeedableRng;

    #[test]
    fn test_minibatches_with_replacement() -> Result<()> {
        let n = 256;
        let batch = TrainingBatch::<ScriptedEnv>::from_flat(
            vec![vec![0.0, 0.0]; n],
            vec![0.0; n],
            vec![0.0; n],
            vec![2.0; n],
        )?;
        let mut value = ConstantValue::new(1.0);
        let regression = ValueRegression::new(ValueUpdateConfig::default().n_epochs(2));
        let mut rng = StdRng::seed_from_u64(0);

        let record = regression.update(&mut value, &batch, &mut rng)?;

        // 256 / 64 minibatches per pass
        assert_eq!(value.n_updates, 8);
        assert_eq!(record.get_scalar("n_value_steps")?, 8.0);
        assert_eq!(record.get_scalar("loss_value")?, 1.0);
        Ok(())
    }
}
