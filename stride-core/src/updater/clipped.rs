//! PPO clipped surrogate objective.
use super::{check_log_prob_alignment, mean, weighted_mean, LogProbSnapshot, PolicyUpdater};
use crate::{
    error::StrideError,
    record::{Record, RecordValue},
    Env, MinibatchConfig, PolicyModel, TrainingBatch,
};
use anyhow::Result;
use log::{debug, trace};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`ClippedSurrogate`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ClippedSurrogateConfig {
    /// The ratio is clipped to `[1 - clip_eps, 1 + clip_eps]`.
    pub clip_eps: f32,

    /// Passes over the training batch per cycle.
    pub n_epochs: usize,

    /// SGD minibatches of each pass.
    pub minibatch: MinibatchConfig,

    /// Weight of the entropy bonus. Used only with policies providing
    /// [`PolicyModel::entropy_grad`].
    pub entropy_coef: f32,
}

impl Default for ClippedSurrogateConfig {
    fn default() -> Self {
        Self {
            clip_eps: 0.2,
            n_epochs: 4,
            minibatch: MinibatchConfig::default().size(64),
            entropy_coef: 0.0,
        }
    }
}

impl ClippedSurrogateConfig {
    /// Sets the clipping range.
    pub fn clip_eps(mut self, v: f32) -> Self {
        self.clip_eps = v;
        self
    }

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

    /// Sets the weight of the entropy bonus.
    pub fn entropy_coef(mut self, v: f32) -> Self {
        self.entropy_coef = v;
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

/// The clipped surrogate evaluated on a minibatch.
#[derive(Clone, Debug)]
pub struct SurrogateTerms {
    /// `mean_i min(r_i A_i, clip(r_i) A_i)`, to be maximized.
    pub objective: f32,

    /// `d objective_i / d log π(a_i|s_i)`: `r_i A_i` where the unclipped
    /// term is the minimum, `0` where the clipped one is.
    pub weights: Vec<f32>,

    /// Fraction of samples with `|r - 1| > clip_eps`.
    pub clip_fraction: f32,

    /// `mean(old_log_prob - new_log_prob)`.
    pub approx_kl: f32,
}

/// Evaluates the PPO clipped surrogate.
///
/// With `r = exp(new - old)`, each sample contributes
/// `min(r A, clip(r, 1 - eps, 1 + eps) A)`. Once the clipped term is the
/// minimum the sample stops contributing to the gradient, however large `r`
/// grows.
pub fn clipped_surrogate(
    new_log_prob: &[f32],
    old_log_prob: &[f32],
    advantage: &[f32],
    clip_eps: f32,
) -> Result<SurrogateTerms, StrideError> {
    check_log_prob_alignment(old_log_prob, new_log_prob)?;
    StrideError::check_len("clipped surrogate", new_log_prob.len(), advantage.len())?;

    let n = advantage.len();
    let mut objective = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);
    let mut n_clipped = 0;

    for ((new, old), a) in new_log_prob.iter().zip(old_log_prob.iter()).zip(advantage.iter()) {
        let r = (new - old).exp();
        let r_clip = r.clamp(1.0 - clip_eps, 1.0 + clip_eps);
        if (r - 1.0).abs() > clip_eps {
            n_clipped += 1;
        }
        let (unclipped, clipped) = (r * a, r_clip * a);
        if unclipped <= clipped {
            objective.push(unclipped);
            weights.push(unclipped);
        } else {
            objective.push(clipped);
            weights.push(0.0);
        }
    }

    let kl: Vec<f32> = old_log_prob.iter().zip(new_log_prob.iter()).map(|(o, n)| o - n).collect();

    Ok(SurrogateTerms {
        objective: mean(&objective),
        weights,
        clip_fraction: n_clipped as f32 / n.max(1) as f32,
        approx_kl: mean(&kl),
    })
}

/// Proximal policy optimization with ratio clipping.
pub struct ClippedSurrogate {
    config: ClippedSurrogateConfig,
}

impl ClippedSurrogate {
    /// Constructs the updater.
    pub fn new(config: ClippedSurrogateConfig) -> Self {
        Self { config }
    }

    /// One gradient step on the samples `ixs`.
    fn step<E, P>(
        &self,
        policy: &mut P,
        batch: &TrainingBatch<E>,
        snapshot: &LogProbSnapshot,
        ixs: &[usize],
    ) -> Result<SurrogateTerms>
    where
        E: Env,
        P: PolicyModel<E>,
    {
        snapshot.check_aligned(batch)?;
        let (obs, act, adv) = batch.gather(ixs);
        let old_log_prob = snapshot.gather(ixs);
        let new_log_prob = policy.log_prob(&obs, &act)?;
        let terms = clipped_surrogate(&new_log_prob, &old_log_prob, &adv, self.config.clip_eps)?;

        let grads = policy.grad_log_prob(&obs, &act)?;
        StrideError::check_len("policy", obs.len(), grads.len())?;
        let mut grad = weighted_mean(&grads, &terms.weights)?;

        if self.config.entropy_coef != 0.0 {
            if let Some(eg) = policy.entropy_grad(&obs)? {
                StrideError::check_len("policy", grad.len(), eg.len())?;
                for (g, e) in grad.iter_mut().zip(eg.iter()) {
                    *g += self.config.entropy_coef * e;
                }
            }
        }

        policy.apply_gradient(&grad)?;
        trace!("Clipped surrogate step: {:?}", terms.objective);

        Ok(terms)
    }
}

impl<E: Env, P: PolicyModel<E>> PolicyUpdater<E, P> for ClippedSurrogate {
    fn update(&mut self, policy: &mut P, batch: &TrainingBatch<E>, rng: &mut StdRng) -> Result<Record> {
        let snapshot = LogProbSnapshot::take(policy, batch)?;
        let (mut losses, mut clip_fractions, mut kls) = (vec![], vec![], vec![]);

        for _ in 0..self.config.n_epochs {
            for ixs in self.config.minibatch.sample_indices(batch.len(), rng) {
                let terms = self.step(policy, batch, &snapshot, &ixs)?;
                losses.push(-terms.objective);
                clip_fractions.push(terms.clip_fraction);
                kls.push(terms.approx_kl);
            }
        }

        // KL between the snapshot and the final parameters
        let final_log_prob = policy.log_prob(batch.obs(), batch.act())?;
        check_log_prob_alignment(snapshot.log_prob(), &final_log_prob)?;
        let kl: Vec<f32> = snapshot
            .log_prob()
            .iter()
            .zip(final_log_prob.iter())
            .map(|(o, n)| o - n)
            .collect();

        debug!("Clipped surrogate: {} steps, final approx KL = {}", losses.len(), mean(&kl));

        Ok(Record::from_slice(&[
            ("loss_policy", RecordValue::Scalar(mean(&losses))),
            ("clip_fraction", RecordValue::Scalar(mean(&clip_fractions))),
            ("approx_kl", RecordValue::Scalar(mean(&kl))),
            ("n_policy_steps", RecordValue::Scalar(losses.len() as f32)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dummy::{ScalarGaussianPolicy, ScriptedEnv},
        SampleStrategy,
    };
    use rand::SeedableRng;

    #[test]
    fn test_large_ratio_uses_clipped_branch() -> Result<()> {
        let old = [0.0];
        let new = [100f32.ln()];
        let terms = clipped_surrogate(&new, &old, &[1.0], 0.2)?;
        assert!((terms.objective - 1.2).abs() < 1e-5);
        assert_eq!(terms.weights, vec![0.0]);
        assert_eq!(terms.clip_fraction, 1.0);

        // The gradient weight stays zero as the ratio grows further.
        let terms = clipped_surrogate(&[1e4f32.ln()], &old, &[1.0], 0.2)?;
        assert!((terms.objective - 1.2).abs() < 1e-4);
        assert_eq!(terms.weights, vec![0.0]);
        Ok(())
    }

    #[test]
    fn test_small_ratio_negative_advantage_is_clipped() -> Result<()> {
        let terms = clipped_surrogate(&[0.01f32.ln()], &[0.0], &[-1.0], 0.2)?;
        assert!((terms.objective + 0.8).abs() < 1e-5);
        assert_eq!(terms.weights, vec![0.0]);
        Ok(())
    }

    #[test]
    fn test_ratio_inside_range_is_unclipped() -> Result<()> {
        let terms = clipped_surrogate(&[0.1, 0.0], &[0.0, 0.0], &[2.0, -1.0], 0.2)?;
        let r = 0.1f32.exp();
        assert!((terms.weights[0] - 2.0 * r).abs() < 1e-6);
        assert_eq!(terms.weights[1], -1.0);
        assert_eq!(terms.clip_fraction, 0.0);
        assert!((terms.approx_kl + 0.05).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_misaligned_log_probs() {
        let err = clipped_surrogate(&[0.0, 0.0], &[0.0], &[1.0, 1.0], 0.2).unwrap_err();
        assert!(matches!(err, StrideError::BatchAlignmentError(_)));
    }

    #[test]
    fn test_update_moves_towards_positive_advantage() -> Result<()> {
        let mut policy = ScalarGaussianPolicy::new(0.0, 0.5, 0);
        let batch = TrainingBatch::<ScriptedEnv>::from_flat(
            vec![vec![0.0, 0.0]; 2],
            vec![1.0, -1.0],
            vec![1.0, -1.0],
            vec![0.0; 2],
        )?;
        let config = ClippedSurrogateConfig::default()
            .n_epochs(1)
            .minibatch(MinibatchConfig {
                size: None,
                strategy: SampleStrategy::Shuffled,
            });
        let mut updater = ClippedSurrogate::new(config);
        let mut rng = StdRng::seed_from_u64(0);

        let record = PolicyUpdater::<ScriptedEnv, _>::update(&mut updater, &mut policy, &batch, &mut rng)?;

        // r = 1 at the first step: grad = mean(A (a - mu)) = 1
        assert!((policy.mu - 0.5).abs() < 1e-6);
        assert_eq!(record.get_scalar("n_policy_steps")?, 1.0);
        assert_eq!(record.get_scalar("clip_fraction")?, 0.0);
        Ok(())
    }
}
