//! Trust-region policy optimization.
use super::{check_log_prob_alignment, dot, mean, weighted_mean, LogProbSnapshot, PolicyUpdater};
use crate::{
    error::StrideError,
    record::{Record, RecordValue},
    Env, PolicyModel, TrainingBatch,
};
use anyhow::Result;
use log::{debug, info};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`TrustRegion`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TrustRegionConfig {
    /// Bound `δ` on the KL divergence between the old and the new policy.
    pub max_kl: f32,

    /// Added to the diagonal of the Fisher matrix.
    pub damping: f32,

    /// Iterations of conjugate gradient.
    pub cg_iters: usize,

    /// Conjugate gradient stops once the squared residual falls below this.
    pub cg_tol: f32,

    /// Number of step sizes tried by the line search.
    pub backtrack_iters: usize,

    /// Shrink factor of the step between line search trials.
    pub backtrack_coef: f32,
}

impl Default for TrustRegionConfig {
    fn default() -> Self {
        Self {
            max_kl: 0.01,
            damping: 0.1,
            cg_iters: 10,
            cg_tol: 1e-10,
            backtrack_iters: 10,
            backtrack_coef: 0.5,
        }
    }
}

impl TrustRegionConfig {
    /// Sets the KL bound.
    pub fn max_kl(mut self, v: f32) -> Self {
        self.max_kl = v;
        self
    }

    /// Sets the damping of the Fisher matrix.
    pub fn damping(mut self, v: f32) -> Self {
        self.damping = v;
        self
    }

    /// Sets the number of conjugate gradient iterations.
    pub fn cg_iters(mut self, v: usize) -> Self {
        self.cg_iters = v;
        self
    }

    /// Sets the number of line search trials.
    pub fn backtrack_iters(mut self, v: usize) -> Self {
        self.backtrack_iters = v;
        self
    }

    /// Sets the shrink factor of the line search.
    pub fn backtrack_coef(mut self, v: f32) -> Self {
        self.backtrack_coef = v;
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

/// Approximately solves `A x = b` for a symmetric positive definite `A`
/// given only the product `v -> A v`.
pub fn conjugate_gradient<F>(mut mat_vec: F, b: &[f32], iters: usize, tol: f32) -> Vec<f32>
where
    F: FnMut(&[f32]) -> Vec<f32>,
{
    let mut x = vec![0.0; b.len()];
    let mut r = b.to_vec();
    let mut p = b.to_vec();
    let mut rr = dot(&r, &r);

    for _ in 0..iters {
        if rr < tol {
            break;
        }
        let ap = mat_vec(&p);
        let pap = dot(&p, &ap);
        if pap <= 0.0 {
            break;
        }
        let alpha = rr / pap;
        for i in 0..x.len() {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        let rr_new = dot(&r, &r);
        let beta = rr_new / rr;
        for i in 0..p.len() {
            p[i] = r[i] + beta * p[i];
        }
        rr = rr_new;
    }

    x
}

/// Empirical Fisher-vector product, `mean_i g_i (g_i · v) + damping v`.
fn fisher_vector_product(grads: &[Vec<f32>], v: &[f32], damping: f32) -> Vec<f32> {
    let mut out = vec![0.0; v.len()];
    for g in grads.iter() {
        let gv = dot(g, v);
        for (o, g) in out.iter_mut().zip(g.iter()) {
            *o += g * gv;
        }
    }
    let n = grads.len().max(1) as f32;
    out.iter_mut()
        .zip(v.iter())
        .for_each(|(o, v)| *o = *o / n + damping * v);
    out
}

/// `(mean(r A), mean(old - new))` with `r = exp(new - old)`.
fn surrogate_and_kl(new: &[f32], old: &[f32], adv: &[f32]) -> (f32, f32) {
    let surrogate: Vec<f32> = new
        .iter()
        .zip(old.iter())
        .zip(adv.iter())
        .map(|((n, o), a)| (n - o).exp() * a)
        .collect();
    let kl: Vec<f32> = old.iter().zip(new.iter()).map(|(o, n)| o - n).collect();
    (mean(&surrogate), mean(&kl))
}

/// Natural gradient step with a KL constraint.
///
/// Solves `F x = g` for the surrogate gradient `g` with conjugate gradient
/// on the empirical Fisher matrix, scales `x` to the boundary of the trust
/// region and backtracks until the surrogate improves and the sampled KL
/// divergence stays within `max_kl`. If no trial is accepted the parameters
/// are left unchanged.
pub struct TrustRegion {
    config: TrustRegionConfig,
}

impl TrustRegion {
    /// Constructs the updater.
    pub fn new(config: TrustRegionConfig) -> Self {
        Self { config }
    }

    fn record(loss: f32, kl: f32, step_frac: f32) -> Record {
        Record::from_slice(&[
            ("loss_policy", RecordValue::Scalar(loss)),
            ("approx_kl", RecordValue::Scalar(kl)),
            ("step_fraction", RecordValue::Scalar(step_frac)),
        ])
    }
}

impl<E: Env, P: PolicyModel<E>> PolicyUpdater<E, P> for TrustRegion {
    fn update(&mut self, policy: &mut P, batch: &TrainingBatch<E>, _rng: &mut StdRng) -> Result<Record> {
        let snapshot = LogProbSnapshot::take(policy, batch)?;
        snapshot.check_aligned(batch)?;
        let (obs, act, adv) = (batch.obs(), batch.act(), batch.advantage());
        let old_log_prob = snapshot.log_prob();
        let (surrogate_old, _) = surrogate_and_kl(old_log_prob, old_log_prob, adv);

        let grads = policy.grad_log_prob(obs, act)?;
        StrideError::check_len("policy", batch.len(), grads.len())?;
        let g = weighted_mean(&grads, adv)?;
        if dot(&g, &g) == 0.0 {
            debug!("Trust region: zero surrogate gradient");
            return Ok(Self::record(-surrogate_old, 0.0, 0.0));
        }

        let damping = self.config.damping;
        let x = conjugate_gradient(
            |v| fisher_vector_product(&grads, v, damping),
            &g,
            self.config.cg_iters,
            self.config.cg_tol,
        );
        let xfx = dot(&x, &fisher_vector_product(&grads, &x, damping));
        let scale = (2.0 * self.config.max_kl / xfx.max(f32::EPSILON)).sqrt();

        let old_params = policy.params();
        StrideError::check_len("policy", old_params.len(), x.len())?;

        let mut frac = 1.0;
        for _ in 0..self.config.backtrack_iters {
            let params: Vec<f32> = old_params
                .iter()
                .zip(x.iter())
                .map(|(p, x)| p + frac * scale * x)
                .collect();
            policy.set_params(&params)?;

            let new_log_prob = policy.log_prob(obs, act)?;
            check_log_prob_alignment(old_log_prob, &new_log_prob)?;
            let (surrogate, kl) = surrogate_and_kl(&new_log_prob, old_log_prob, adv);

            if surrogate > surrogate_old && kl <= self.config.max_kl {
                debug!("Trust region: accepted step fraction {}, KL = {}", frac, kl);
                return Ok(Self::record(-surrogate, kl, frac));
            }
            frac *= self.config.backtrack_coef;
        }

        info!("Trust region line search failed, parameters restored");
        policy.set_params(&old_params)?;
        Ok(Self::record(-surrogate_old, 0.0, 0.0))
    }
}
