//! Policy and value updates.
//!
//! A [`PolicyUpdater`] consumes one [`TrainingBatch`] per cycle. It first
//! takes a [`LogProbSnapshot`] of `log π_old(a|s)` under the parameters
//! before any step of the cycle, then moves the policy. The step rule is the
//! strategy: [`ClippedSurrogate`] (PPO) or [`TrustRegion`] (TRPO).
mod clipped;
mod trust_region;
mod value;
use crate::{error::StrideError, record::Record, Env, PolicyModel, TrainingBatch};
use anyhow::Result;
pub use clipped::{clipped_surrogate, ClippedSurrogate, ClippedSurrogateConfig, SurrogateTerms};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
pub use trust_region::{conjugate_gradient, TrustRegion, TrustRegionConfig};
pub use value::{ValueRegression, ValueUpdateConfig};

/// Updates a policy from a training batch.
pub trait PolicyUpdater<E: Env, P: PolicyModel<E>> {
    /// Performs the policy update of one cycle and returns its statistics.
    fn update(&mut self, policy: &mut P, batch: &TrainingBatch<E>, rng: &mut StdRng) -> Result<Record>;
}

/// Selects the policy update strategy.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub enum PolicyUpdateConfig {
    /// Ratio clipping.
    ClippedSurrogate(ClippedSurrogateConfig),

    /// KL-constrained natural gradient step.
    TrustRegion(TrustRegionConfig),
}

impl Default for PolicyUpdateConfig {
    fn default() -> Self {
        Self::ClippedSurrogate(ClippedSurrogateConfig::default())
    }
}

impl PolicyUpdateConfig {
    /// Builds the updater.
    pub fn build<E, P>(&self) -> Box<dyn PolicyUpdater<E, P>>
    where
        E: Env + 'static,
        P: PolicyModel<E> + 'static,
    {
        match self {
            Self::ClippedSurrogate(config) => Box::new(ClippedSurrogate::new(config.clone())),
            Self::TrustRegion(config) => Box::new(TrustRegion::new(config.clone())),
        }
    }
}

/// `log π_old(a|s)` of every sample of a batch.
#[derive(Clone, Debug)]
pub struct LogProbSnapshot {
    batch_id: u64,
    log_prob: Vec<f32>,
}

impl LogProbSnapshot {
    /// Evaluates the current policy on every `(obs, act)` of `batch`.
    pub fn take<E: Env, P: PolicyModel<E>>(policy: &P, batch: &TrainingBatch<E>) -> Result<Self> {
        let log_prob = policy.log_prob(batch.obs(), batch.act())?;
        StrideError::check_len("policy", batch.len(), log_prob.len())?;
        Ok(Self {
            batch_id: batch.id(),
            log_prob,
        })
    }

    /// Id of the batch the snapshot was taken on.
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// The log-probabilities.
    pub fn log_prob(&self) -> &[f32] {
        &self.log_prob
    }

    /// Fails with [`StrideError::BatchAlignmentError`] unless the snapshot
    /// was taken on `batch`.
    pub fn check_aligned<E: Env>(&self, batch: &TrainingBatch<E>) -> Result<(), StrideError> {
        if self.batch_id != batch.id() {
            return Err(StrideError::BatchAlignmentError(format!(
                "old log-probabilities belong to batch {}, the update runs on batch {}",
                self.batch_id,
                batch.id()
            )));
        }
        if self.log_prob.len() != batch.len() {
            return Err(StrideError::BatchAlignmentError(format!(
                "{} old log-probabilities for {} samples",
                self.log_prob.len(),
                batch.len()
            )));
        }
        Ok(())
    }

    /// Old log-probabilities at `ixs`.
    pub fn gather(&self, ixs: &[usize]) -> Vec<f32> {
        ixs.iter().map(|&i| self.log_prob[i]).collect()
    }
}

/// Fails with [`StrideError::BatchAlignmentError`] if old and new
/// log-probabilities were not computed on the same samples.
pub fn check_log_prob_alignment(old: &[f32], new: &[f32]) -> Result<(), StrideError> {
    match old.len() == new.len() {
        true => Ok(()),
        false => Err(StrideError::BatchAlignmentError(format!(
            "{} old and {} new log-probabilities",
            old.len(),
            new.len()
        ))),
    }
}

/// `mean_i(weights[i] * grads[i])`.
pub(crate) fn weighted_mean(grads: &[Vec<f32>], weights: &[f32]) -> Result<Vec<f32>> {
    StrideError::check_len("policy gradient", weights.len(), grads.len())?;
    let dim = grads.first().map(|g| g.len()).unwrap_or(0);
    let mut out = vec![0.0; dim];
    for (g, w) in grads.iter().zip(weights.iter()) {
        StrideError::check_len("policy gradient", dim, g.len())?;
        for (o, g) in out.iter_mut().zip(g.iter()) {
            *o += w * g;
        }
    }
    let n = grads.len().max(1) as f32;
    out.iter_mut().for_each(|o| *o /= n);
    Ok(out)
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(a, b)| a * b).sum()
}

fn mean(xs: &[f32]) -> f32 {
    match xs.len() {
        0 => 0.0,
        n => xs.iter().sum::<f32>() / n as f32,
    }
}
