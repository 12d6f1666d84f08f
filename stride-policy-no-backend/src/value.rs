//! Linear state-value function.
use crate::{clip_grad_norm, load_bincode, load_yaml, save_bincode, save_yaml};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use stride_core::{error::StrideError, Env, ValueModel};

/// Configuration of [`LinearValue`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LinearValueConfig {
    /// Dimension of observations.
    pub obs_dim: usize,

    /// SGD step size.
    pub learning_rate: f32,

    /// Gradients are rescaled to at most this L2 norm.
    pub max_grad_norm: Option<f32>,
}

impl Default for LinearValueConfig {
    fn default() -> Self {
        Self {
            obs_dim: 1,
            learning_rate: 0.01,
            max_grad_norm: None,
        }
    }
}

impl LinearValueConfig {
    /// Sets the dimension of observations.
    pub fn obs_dim(mut self, v: usize) -> Self {
        self.obs_dim = v;
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
    w: Vec<f32>,
    b: f32,
}

/// `V(s) = w·s + b`, fitted by SGD on the mean-squared error.
pub struct LinearValue {
    config: LinearValueConfig,
    params: Params,
}

impl LinearValue {
    /// Builds a value function predicting 0 everywhere.
    pub fn build(config: LinearValueConfig) -> Self {
        let params = Params {
            w: vec![0.0; config.obs_dim],
            b: 0.0,
        };
        Self { config, params }
    }

    fn predict_one(&self, obs: &[f32]) -> f32 {
        self.params.w.iter().zip(obs.iter()).map(|(w, x)| w * x).sum::<f32>() + self.params.b
    }
}

impl<E> ValueModel<E> for LinearValue
where
    E: Env,
    E::Obs: AsRef<[f32]>,
{
    fn predict(&self, obs: &[E::Obs]) -> Result<Vec<f32>> {
        obs.iter()
            .map(|o| {
                StrideError::check_len("linear value", self.config.obs_dim, o.as_ref().len())?;
                Ok(self.predict_one(o.as_ref()))
            })
            .collect()
    }

    fn update(&mut self, obs: &[E::Obs], targets: &[f32]) -> Result<f32> {
        StrideError::check_len("linear value", obs.len(), targets.len())?;
        if obs.is_empty() {
            return Ok(0.0);
        }

        let d = self.config.obs_dim;
        let n = obs.len() as f32;
        let mut grad = vec![0.0; d + 1];
        let mut mse = 0.0;
        for (o, t) in obs.iter().zip(targets.iter()) {
            let o = o.as_ref();
            StrideError::check_len("linear value", d, o.len())?;
            let err = self.predict_one(o) - t;
            mse += err * err / n;
            for (g, x) in grad.iter_mut().zip(o.iter()) {
                *g += 2.0 * err * x / n;
            }
            grad[d] += 2.0 * err / n;
        }

        clip_grad_norm(&mut grad, self.config.max_grad_norm);
        let lr = self.config.learning_rate;
        for (w, g) in self.params.w.iter_mut().zip(grad.iter()) {
            *w -= lr * g;
        }
        self.params.b -= lr * grad[d];
        Ok(mse)
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        save_bincode(&self.params, path)
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let params: Params = load_bincode(path)?;
        ensure!(
            params.w.len() == self.params.w.len(),
            "value parameters in {:?} have {} weights, expected {}",
            path,
            params.w.len(),
            self.params.w.len()
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

    struct LineEnv;

    impl Env for LineEnv {
        type Config = ();
        type Obs = Vec<f32>;
        type Act = f32;
        type Info = ();

        fn build(_config: &(), _seed: i64) -> Result<Self> {
            Ok(Self)
        }

        fn reset(&mut self) -> Result<Vec<f32>> {
            Ok(vec![0.0])
        }

        fn reset_with_index(&mut self, _ix: usize) -> Result<Vec<f32>> {
            Ok(vec![0.0])
        }

        fn step(&mut self, _act: &f32) -> Result<Step<Self>> {
            Ok(Step::new(vec![0.0], 0.0, true, false, ()))
        }
    }

    #[test]
    fn test_fits_a_line() -> Result<()> {
        let mut value = LinearValue::build(LinearValueConfig::default().learning_rate(0.1));
        let obs: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32 / 10.0]).collect();
        let targets: Vec<f32> = obs.iter().map(|o| 2.0 * o[0] - 1.0).collect();

        let first = ValueModel::<LineEnv>::update(&mut value, &obs, &targets)?;
        let mut last = first;
        for _ in 0..2000 {
            last = ValueModel::<LineEnv>::update(&mut value, &obs, &targets)?;
        }
        assert!(last < first * 1e-3);

        let pred = ValueModel::<LineEnv>::predict(&value, &[vec![0.5]])?;
        assert!((pred[0] - 0.0).abs() < 1e-2);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch() {
        let value = LinearValue::build(LinearValueConfig::default().obs_dim(2));
        let err = ValueModel::<LineEnv>::predict(&value, &[vec![1.0]]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StrideError>(),
            Some(StrideError::ShapeMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_save_load() -> Result<()> {
        let dir = TempDir::new("linear_value")?;
        let path = dir.path().join("value");
        let mut value = LinearValue::build(LinearValueConfig::default());
        ValueModel::<LineEnv>::update(&mut value, &[vec![1.0]], &[3.0])?;
        ValueModel::<LineEnv>::save_params(&value, &path)?;

        let mut loaded = LinearValue::build(LinearValueConfig::default());
        ValueModel::<LineEnv>::load_params(&mut loaded, &path)?;
        assert_eq!(
            ValueModel::<LineEnv>::predict(&loaded, &[vec![1.0]])?,
            ValueModel::<LineEnv>::predict(&value, &[vec![1.0]])?
        );
        Ok(())
    }
}
