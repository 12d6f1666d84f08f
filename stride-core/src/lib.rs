#![warn(missing_docs)]
//! Core of an on-policy reinforcement learning pipeline.
//!
//! Each training cycle flows through the components of this crate in one
//! direction:
//!
//! * [`EnvPool`] steps `E` environment copies in lockstep, resetting
//!   finished episodes automatically.
//! * [`TrajectoryBuffer`] collects `H` steps of the pool into an immutable
//!   [`Trajectory`], closed with bootstrap values of the final observations.
//! * [`AdvantageEstimator`] computes advantages and value targets (GAE or
//!   `n`-step returns).
//! * [`TrainingBatch`] flattens the trajectory and normalizes advantages;
//!   [`MinibatchConfig`] draws SGD minibatches from it.
//! * A [`PolicyUpdater`] ([`ClippedSurrogate`] or [`TrustRegion`]) updates the
//!   policy, [`ValueRegression`] the value function.
//! * [`CheckpointController`] tracks a moving average of scores in a
//!   [`TrainingSession`] and saves parameters on new highs.
//!
//! [`Trainer`] runs the loop. Policies, value functions and environments are
//! plugged in through [`PolicyModel`], [`ValueModel`] and [`Env`].
pub mod dummy;
pub mod error;
pub mod record;

mod base;
pub use base::{Act, Env, Info, Obs, Policy, PolicyModel, Step, ValueModel};

mod pool;
pub use pool::{EnvPool, PoolStep};

mod trajectory;
pub use trajectory::{Trajectory, TrajectoryBuffer, TransitionBatch};

mod advantage;
pub use advantage::{
    discount_with_dones, gae, AdvantageConfig, AdvantageEstimator, Advantages, EstimatorKind,
};

mod minibatch;
pub use minibatch::{normalize, MinibatchConfig, SampleStrategy, TrainingBatch, ADVANTAGE_EPS};

mod updater;
pub use updater::{
    check_log_prob_alignment, clipped_surrogate, conjugate_gradient, ClippedSurrogate,
    ClippedSurrogateConfig, LogProbSnapshot, PolicyUpdateConfig, PolicyUpdater, SurrogateTerms,
    TrustRegion, TrustRegionConfig, ValueRegression, ValueUpdateConfig,
};

mod evaluator;
pub use evaluator::{DefaultEvaluator, Evaluator};

mod checkpoint;
pub use checkpoint::{
    write_atomic, CheckpointConfig, CheckpointController, ScoreEntry, ScoreHistory, ScoreSource,
    TrainingSession, SESSION_FILE,
};

mod trainer;
pub use trainer::{Rollout, Sampler, Trainer, TrainerConfig};
