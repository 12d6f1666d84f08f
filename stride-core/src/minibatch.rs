//! Flattening of trajectories into training batches.
//!
//! A [`TrainingBatch`] is the `E * H` flat sequence of
//! `(obs, act, advantage, value_target)` tuples of one cycle. Every batch gets
//! a process-unique id, which lets the update engine detect log-probabilities
//! computed on a different batch.
use crate::{error::StrideError, Advantages, Env, Trajectory};
use anyhow::Result;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(0);

/// Floor added to the standard deviation when normalizing advantages.
pub const ADVANTAGE_EPS: f32 = 1e-8;

/// How SGD minibatches are drawn from a [`TrainingBatch`].
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum SampleStrategy {
    /// `len / size` minibatches, each of `size` indices drawn independently
    /// and uniformly with replacement.
    WithReplacement,

    /// A random permutation of all indices cut into chunks of `size`; the
    /// last chunk may be shorter.
    Shuffled,
}

/// Configuration of SGD minibatch sampling.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MinibatchConfig {
    /// Minibatch size. `None` uses the whole batch as a single minibatch.
    pub size: Option<usize>,

    /// Sampling strategy.
    pub strategy: SampleStrategy,
}

impl Default for MinibatchConfig {
    fn default() -> Self {
        Self {
            size: None,
            strategy: SampleStrategy::WithReplacement,
        }
    }
}

impl MinibatchConfig {
    /// Sets the minibatch size.
    pub fn size(mut self, v: usize) -> Self {
        self.size = Some(v);
        self
    }

    /// Sets the sampling strategy.
    pub fn strategy(mut self, v: SampleStrategy) -> Self {
        self.strategy = v;
        self
    }

    /// Draws minibatch indices over a batch of `len` samples.
    pub fn sample_indices<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> Vec<Vec<usize>> {
        if len == 0 {
            return vec![];
        }
        let size = self.size.unwrap_or(len).clamp(1, len);
        match self.strategy {
            SampleStrategy::WithReplacement => (0..len / size)
                .map(|_| (0..size).map(|_| rng.gen_range(0..len)).collect())
                .collect(),
            SampleStrategy::Shuffled => {
                let mut ixs: Vec<usize> = (0..len).collect();
                ixs.shuffle(rng);
                ixs.chunks(size).map(|c| c.to_vec()).collect()
            }
        }
    }
}

/// Normalizes `xs` in place to `(x - mean) / (std + 1e-8)`, where `std` is
/// the population standard deviation of `xs`.
pub fn normalize(xs: &mut [f32]) {
    if xs.is_empty() {
        return;
    }
    let n = xs.len() as f64;
    let mean = xs.iter().map(|&x| x as f64).sum::<f64>() / n;
    let var = xs.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
    let denom = var.sqrt() + ADVANTAGE_EPS as f64;
    for x in xs.iter_mut() {
        *x = ((*x as f64 - mean) / denom) as f32;
    }
}

/// The flattened training data of one cycle.
pub struct TrainingBatch<E: Env> {
    id: u64,
    obs: Vec<E::Obs>,
    act: Vec<E::Act>,
    advantage: Vec<f32>,
    value_target: Vec<f32>,
}

impl<E: Env> TrainingBatch<E> {
    /// Flattens `traj` and its advantages. Slot `e`, step `t` lands at index
    /// `e * H + t`.
    pub fn build(traj: Trajectory<E>, adv: Advantages, normalize_advantages: bool) -> Result<Self> {
        let (n_envs, horizon) = (traj.n_envs(), traj.horizon());
        StrideError::check_len("minibatch builder", n_envs, adv.advantage.len())?;
        StrideError::check_len("minibatch builder", n_envs, adv.value_target.len())?;
        for e in 0..n_envs {
            StrideError::check_len("minibatch builder", horizon, adv.advantage[e].len())?;
            StrideError::check_len("minibatch builder", horizon, adv.value_target[e].len())?;
        }

        let (obs, act) = traj.into_obs_act();
        let mut advantage: Vec<f32> = adv.advantage.into_iter().flatten().collect();
        if normalize_advantages {
            normalize(&mut advantage);
        }

        Ok(Self {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            obs: obs.into_iter().flatten().collect(),
            act: act.into_iter().flatten().collect(),
            advantage,
            value_target: adv.value_target.into_iter().flatten().collect(),
        })
    }

    /// Builds a batch from flat arrays.
    pub fn from_flat(
        obs: Vec<E::Obs>,
        act: Vec<E::Act>,
        advantage: Vec<f32>,
        value_target: Vec<f32>,
    ) -> Result<Self> {
        let n = obs.len();
        StrideError::check_len("minibatch builder", n, act.len())?;
        StrideError::check_len("minibatch builder", n, advantage.len())?;
        StrideError::check_len("minibatch builder", n, value_target.len())?;
        Ok(Self {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            obs,
            act,
            advantage,
            value_target,
        })
    }

    /// Process-unique id of the batch.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.obs.len()
    }

    /// Returns `true` if the batch has no sample.
    pub fn is_empty(&self) -> bool {
        self.obs.is_empty()
    }

    /// Observations.
    pub fn obs(&self) -> &[E::Obs] {
        &self.obs
    }

    /// Actions.
    pub fn act(&self) -> &[E::Act] {
        &self.act
    }

    /// Advantages, normalized if requested at construction.
    pub fn advantage(&self) -> &[f32] {
        &self.advantage
    }

    /// Value targets.
    pub fn value_target(&self) -> &[f32] {
        &self.value_target
    }

    /// Gathers the samples at `ixs` as `(obs, act, advantage)`.
    pub fn gather(&self, ixs: &[usize]) -> (Vec<E::Obs>, Vec<E::Act>, Vec<f32>) {
        (
            ixs.iter().map(|&i| self.obs[i].clone()).collect(),
            ixs.iter().map(|&i| self.act[i].clone()).collect(),
            ixs.iter().map(|&i| self.advantage[i]).collect(),
        )
    }

    /// Gathers `(obs, value_target)` at `ixs`.
    pub fn gather_value(&self, ixs: &[usize]) -> (Vec<E::Obs>, Vec<f32>) {
        (
            ixs.iter().map(|&i| self.obs[i].clone()).collect(),
            ixs.iter().map(|&i| self.value_target[i]).collect(),
        )
    }
}
