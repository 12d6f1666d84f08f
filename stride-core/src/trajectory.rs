//! Fixed-horizon rollouts.
//!
//! A [`TrajectoryBuffer`] accumulates `H` consecutive [`TransitionBatch`]es of
//! an `E`-slot [`EnvPool`](crate::EnvPool) and is turned into a
//! [`Trajectory`] by [`TrajectoryBuffer::finalize`]. A trajectory is laid out
//! as structure-of-arrays `[E][H]` and is not modified afterwards; value
//! predictions are attached by [`Trajectory::with_value_predictions`], which
//! consumes the trajectory and returns a new one.
use crate::{error::StrideError, Env, ValueModel};
use anyhow::{bail, Result};

/// One step of every slot of the pool, `(s_t, a_t, r_t, s_t+1, done_t)`.
pub struct TransitionBatch<E: Env> {
    /// Observations `s_t`.
    pub obs: Vec<E::Obs>,

    /// Actions `a_t`.
    pub act: Vec<E::Act>,

    /// Rewards `r_t`.
    pub reward: Vec<f32>,

    /// Next observations `s_t+1`. After the end of an episode this is the
    /// first observation of the next one.
    pub next_obs: Vec<E::Obs>,

    /// Done flags.
    pub done: Vec<bool>,

    /// `V(s_t)`, when predicted while collecting.
    pub v_pred: Option<Vec<f32>>,
}

impl<E: Env> TransitionBatch<E> {
    fn check(&self, n_envs: usize) -> Result<(), StrideError> {
        let c = "trajectory buffer";
        StrideError::check_len(c, n_envs, self.obs.len())?;
        StrideError::check_len(c, n_envs, self.act.len())?;
        StrideError::check_len(c, n_envs, self.reward.len())?;
        StrideError::check_len(c, n_envs, self.next_obs.len())?;
        StrideError::check_len(c, n_envs, self.done.len())?;
        if let Some(v) = &self.v_pred {
            StrideError::check_len(c, n_envs, v.len())?;
        }
        Ok(())
    }
}

/// Collects transition batches until the horizon is reached.
pub struct TrajectoryBuffer<E: Env> {
    n_envs: usize,
    horizon: usize,
    steps: Vec<TransitionBatch<E>>,
}

impl<E: Env> TrajectoryBuffer<E> {
    /// Creates an empty buffer for `n_envs` slots and `horizon` steps.
    pub fn new(n_envs: usize, horizon: usize) -> Self {
        Self {
            n_envs,
            horizon,
            steps: Vec::with_capacity(horizon),
        }
    }

    /// Number of appended steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no step has been appended.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns `true` once `horizon` steps have been appended.
    pub fn is_full(&self) -> bool {
        self.steps.len() == self.horizon
    }

    /// Appends one step of every slot.
    pub fn append(&mut self, batch: TransitionBatch<E>) -> Result<()> {
        if self.is_full() {
            bail!("trajectory buffer already holds {} steps", self.horizon);
        }
        batch.check(self.n_envs)?;
        self.steps.push(batch);
        Ok(())
    }

    /// Closes the rollout.
    ///
    /// Asks `value` for the bootstrap values `V(s_H)` of the final next
    /// observations, since the rollout generally stops in the middle of an
    /// episode. If every step carried in-line predictions, `v_pred` and
    /// `v_pred_next` are filled from them and the bootstrap values.
    pub fn finalize<V: ValueModel<E>>(self, value: &V) -> Result<Trajectory<E>> {
        StrideError::check_len("trajectory buffer", self.horizon, self.steps.len())?;
        let (n_envs, horizon) = (self.n_envs, self.horizon);

        let bootstrap = match self.steps.last() {
            Some(last) => value.predict(&last.next_obs)?,
            None => vec![],
        };
        StrideError::check_len("value function", n_envs, bootstrap.len())?;

        let inline = self.steps.iter().all(|s| s.v_pred.is_some());
        let mut traj = Trajectory::empty(n_envs, horizon);
        let mut v_pred = vec![Vec::with_capacity(horizon); n_envs];

        for step in self.steps.into_iter() {
            for (e, o) in step.obs.into_iter().enumerate() {
                traj.obs[e].push(o);
            }
            for (e, a) in step.act.into_iter().enumerate() {
                traj.act[e].push(a);
            }
            for (e, o) in step.next_obs.into_iter().enumerate() {
                traj.next_obs[e].push(o);
            }
            for e in 0..n_envs {
                traj.reward[e].push(step.reward[e]);
                traj.done[e].push(step.done[e]);
            }
            if let Some(v) = step.v_pred {
                for (e, v) in v.into_iter().enumerate() {
                    v_pred[e].push(v);
                }
            }
        }

        if inline && horizon > 0 {
            let v_pred_next = v_pred
                .iter()
                .zip(bootstrap.iter())
                .map(|(v, b)| v[1..].iter().copied().chain(std::iter::once(*b)).collect())
                .collect();
            traj.v_pred = Some(v_pred);
            traj.v_pred_next = Some(v_pred_next);
        }
        traj.bootstrap = bootstrap;

        Ok(traj)
    }
}

/// A finalized rollout of `E` slots over `H` steps, indexed `[env][t]`.
pub struct Trajectory<E: Env> {
    n_envs: usize,
    horizon: usize,
    obs: Vec<Vec<E::Obs>>,
    act: Vec<Vec<E::Act>>,
    reward: Vec<Vec<f32>>,
    next_obs: Vec<Vec<E::Obs>>,
    done: Vec<Vec<bool>>,
    v_pred: Option<Vec<Vec<f32>>>,
    v_pred_next: Option<Vec<Vec<f32>>>,
    bootstrap: Vec<f32>,
}

impl<E: Env> Trajectory<E> {
    fn empty(n_envs: usize, horizon: usize) -> Self {
        Self {
            n_envs,
            horizon,
            obs: (0..n_envs).map(|_| Vec::with_capacity(horizon)).collect(),
            act: (0..n_envs).map(|_| Vec::with_capacity(horizon)).collect(),
            reward: vec![Vec::with_capacity(horizon); n_envs],
            next_obs: (0..n_envs).map(|_| Vec::with_capacity(horizon)).collect(),
            done: vec![Vec::with_capacity(horizon); n_envs],
            v_pred: None,
            v_pred_next: None,
            bootstrap: vec![],
        }
    }

    /// Builds a trajectory from `[env][t]` arrays.
    ///
    /// Fails with [`StrideError::ShapeMismatch`] if the arrays are ragged.
    pub fn from_parts(
        obs: Vec<Vec<E::Obs>>,
        act: Vec<Vec<E::Act>>,
        reward: Vec<Vec<f32>>,
        next_obs: Vec<Vec<E::Obs>>,
        done: Vec<Vec<bool>>,
        bootstrap: Vec<f32>,
    ) -> Result<Self> {
        let n_envs = reward.len();
        let horizon = reward.first().map(|r| r.len()).unwrap_or(0);
        let c = "trajectory";
        for lens in [obs.len(), act.len(), next_obs.len(), done.len(), bootstrap.len()] {
            StrideError::check_len(c, n_envs, lens)?;
        }
        for e in 0..n_envs {
            for lens in [
                obs[e].len(),
                act[e].len(),
                reward[e].len(),
                next_obs[e].len(),
                done[e].len(),
            ] {
                StrideError::check_len(c, horizon, lens)?;
            }
        }
        Ok(Self {
            n_envs,
            horizon,
            obs,
            act,
            reward,
            next_obs,
            done,
            v_pred: None,
            v_pred_next: None,
            bootstrap,
        })
    }

    /// Attaches `V(s_t)` and `V(s_t+1)` computed by two batched calls over
    /// every observation and next observation of the trajectory.
    ///
    /// In-line predictions, if any, are replaced.
    pub fn with_value_predictions<V: ValueModel<E>>(self, value: &V) -> Result<Self> {
        let n = self.n_envs * self.horizon;
        let flat_obs: Vec<E::Obs> = self.obs.iter().flatten().cloned().collect();
        let flat_next_obs: Vec<E::Obs> = self.next_obs.iter().flatten().cloned().collect();

        let v = value.predict(&flat_obs)?;
        StrideError::check_len("value function", n, v.len())?;
        let v_next = value.predict(&flat_next_obs)?;
        StrideError::check_len("value function", n, v_next.len())?;

        let reshape = |v: Vec<f32>| -> Vec<Vec<f32>> {
            match self.horizon {
                0 => vec![vec![]; self.n_envs],
                h => v.chunks(h).map(|c| c.to_vec()).collect(),
            }
        };
        let (v_pred, v_pred_next) = (reshape(v), reshape(v_next));

        Ok(Self {
            v_pred: Some(v_pred),
            v_pred_next: Some(v_pred_next),
            ..self
        })
    }

    /// Attaches value predictions given as `[env][t]` arrays.
    pub fn with_values(self, v_pred: Vec<Vec<f32>>, v_pred_next: Vec<Vec<f32>>) -> Result<Self> {
        for v in [&v_pred, &v_pred_next] {
            StrideError::check_len("trajectory", self.n_envs, v.len())?;
            for row in v.iter() {
                StrideError::check_len("trajectory", self.horizon, row.len())?;
            }
        }
        Ok(Self {
            v_pred: Some(v_pred),
            v_pred_next: Some(v_pred_next),
            ..self
        })
    }

    /// Number of slots `E`.
    pub fn n_envs(&self) -> usize {
        self.n_envs
    }

    /// Number of steps per slot `H`.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// `E * H`.
    pub fn len(&self) -> usize {
        self.n_envs * self.horizon
    }

    /// Returns `true` if the trajectory has no step.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Observations `[env][t]`.
    pub fn obs(&self) -> &[Vec<E::Obs>] {
        &self.obs
    }

    /// Actions `[env][t]`.
    pub fn act(&self) -> &[Vec<E::Act>] {
        &self.act
    }

    /// Rewards `[env][t]`.
    pub fn reward(&self) -> &[Vec<f32>] {
        &self.reward
    }

    /// Next observations `[env][t]`.
    pub fn next_obs(&self) -> &[Vec<E::Obs>] {
        &self.next_obs
    }

    /// Done flags `[env][t]`.
    pub fn done(&self) -> &[Vec<bool>] {
        &self.done
    }

    /// `V(s_t)`, `[env][t]`.
    pub fn v_pred(&self) -> Option<&[Vec<f32>]> {
        self.v_pred.as_deref()
    }

    /// `V(s_t+1)`, `[env][t]`.
    pub fn v_pred_next(&self) -> Option<&[Vec<f32>]> {
        self.v_pred_next.as_deref()
    }

    /// `V(s_H)` per slot.
    pub fn bootstrap(&self) -> &[f32] {
        &self.bootstrap
    }

    /// Moves out observations and actions, `[env][t]`.
    pub fn into_obs_act(self) -> (Vec<Vec<E::Obs>>, Vec<Vec<E::Act>>) {
        (self.obs, self.act)
    }
}
