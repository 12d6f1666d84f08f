//! Train a policy and a value function.
mod config;
mod sampler;
use crate::{
    error::StrideError,
    record::{Record, RecordValue::Scalar, Recorder},
    AdvantageEstimator, CheckpointController, DefaultEvaluator, Env, EnvPool, Evaluator, PolicyModel,
    ScoreSource, TrainingBatch, TrainingSession, ValueModel, ValueRegression,
};
use anyhow::{Context, Result};
pub use config::TrainerConfig;
use log::info;
use rand::{rngs::StdRng, SeedableRng};
pub use sampler::{Rollout, Sampler};

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages the training loop.
///
/// # Training loop
///
/// Each cycle of [`Trainer::train()`] does the following:
///
/// 1. Collect `horizon` steps from each of the `n_envs` environments with
///    [`Sampler`]. The pool is reset only before the first cycle; later
///    cycles continue from where the previous one stopped.
/// 2. Attach value predictions to the trajectory, unless they were
///    predicted while collecting.
/// 3. Estimate advantages and value targets with [`AdvantageEstimator`].
/// 4. Flatten the trajectory into a [`TrainingBatch`].
/// 5. Update the policy with the configured
///    [`PolicyUpdater`](crate::PolicyUpdater), then regress the value
///    function with [`ValueRegression`].
/// 6. Every `eval_interval` cycles, evaluate the policy in evaluation mode.
/// 7. Feed the scores to [`CheckpointController`], which saves the policy and
///    the value function when the moving average of the scores reaches a new
///    high after the warm-up.
/// 8. Store a record of the cycle in the recorder and flush it every
///    `flush_record_interval` cycles, tagged with the global step.
///
/// An error aborts the loop. It carries the index of the cycle and the name
/// of the failing component as context, e.g. `cycle 3: advantage estimator`.
///
/// # Interaction of objects
///
/// ```mermaid
/// graph LR
///     A[EnvPool]-->|TransitionBatch|B[TrajectoryBuffer]
///     B -->|Trajectory|C[AdvantageEstimator]
///     C -->|Advantages|D[TrainingBatch]
///     D -->E[PolicyUpdater]
///     D -->F[ValueRegression]
///     E -->|score|G[CheckpointController]
///     G -.->|evaluation|A
/// ```
pub struct Trainer<E: Env> {
    config: TrainerConfig,
    env_config: E::Config,
}

impl<E> Trainer<E>
where
    E: Env + Send + 'static,
    E::Obs: Send,
    E::Act: Sync,
    E::Info: Send,
{
    /// Constructs a trainer.
    pub fn build(config: TrainerConfig, env_config: E::Config) -> Self {
        Self { config, env_config }
    }

    /// The configuration.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Builds the evaluator described by the configuration, on an
    /// environment seeded with `seed + n_envs`.
    pub fn default_evaluator(&self) -> Result<DefaultEvaluator<E>> {
        let seed = self.config.seed + self.config.n_envs as i64;
        Ok(
            DefaultEvaluator::new(&self.env_config, seed, self.config.n_eval_episodes)?
                .with_max_steps(self.config.eval_max_steps),
        )
    }

    fn start_session<P, V>(
        &self,
        controller: &CheckpointController,
        policy: &mut P,
        value: &mut V,
    ) -> Result<TrainingSession>
    where
        P: PolicyModel<E>,
        V: ValueModel<E>,
    {
        let fresh = TrainingSession::for_rollout(self.config.n_envs, self.config.horizon);
        if !self.config.resume {
            return Ok(fresh);
        }
        match controller.load_session()? {
            Some(session) => {
                StrideError::check_len("env pool", session.n_envs, self.config.n_envs)?;
                StrideError::check_len("trajectory buffer", session.horizon, self.config.horizon)?;
                if session.high_score.is_some() {
                    controller.load::<E, _, _>(policy, value)?;
                }
                info!(
                    "Resumed session at cycle {}, high score {:?}",
                    session.cycle, session.high_score
                );
                Ok(session)
            }
            None => Ok(fresh),
        }
    }

    /// Trains `policy` and `value`, returning the final session.
    pub fn train<P, V, D, R>(
        &mut self,
        policy: &mut P,
        value: &mut V,
        recorder: &mut R,
        evaluator: &mut D,
    ) -> Result<TrainingSession>
    where
        P: PolicyModel<E> + 'static,
        V: ValueModel<E>,
        D: Evaluator<E>,
        R: Recorder + ?Sized,
    {
        let config = &self.config;
        let controller = CheckpointController::new(config.checkpoint.clone());
        let mut session = self
            .start_session(&controller, policy, value)
            .context("checkpoint controller")?;

        let pool = EnvPool::<E>::build(&self.env_config, config.n_envs, config.seed)?;
        let mut sampler = Sampler::new(pool);
        let estimator = AdvantageEstimator::build(&config.advantage)?;
        let mut updater = config.policy_update.build::<E, P>();
        let regression = ValueRegression::new(config.value_update.clone());
        let mut rng = StdRng::seed_from_u64(config.seed as u64 + session.cycle as u64);
        let steps_per_cycle = config.n_envs * config.horizon;

        policy.train();
        info!(
            "Starts training: {} cycles of {} environments x {} steps",
            config.n_cycles, config.n_envs, config.horizon
        );

        while session.cycle < config.n_cycles {
            let cycle = session.cycle;
            let ctx = |component: &str| format!("cycle {}: {}", cycle, component);

            // Rollout
            let rollout = sampler
                .collect(policy, value, config.horizon, config.inline_values)
                .with_context(|| ctx("trajectory buffer"))?;
            session.global_step += steps_per_cycle;
            let trajectory = match config.inline_values {
                true => rollout.trajectory,
                false => rollout
                    .trajectory
                    .with_value_predictions(value)
                    .with_context(|| ctx("value function"))?,
            };

            // Advantages and updates
            let adv = estimator
                .estimate(&trajectory)
                .with_context(|| ctx("advantage estimator"))?;
            let batch = TrainingBatch::build(trajectory, adv, config.normalize_advantages)
                .with_context(|| ctx("minibatch builder"))?;
            let mut record = updater
                .update(policy, &batch, &mut rng)
                .with_context(|| ctx("policy update engine"))?;
            record.merge_inplace(
                regression
                    .update(value, &batch, &mut rng)
                    .with_context(|| ctx("value update"))?,
            );
            session.cycle += 1;

            record.insert("global_step", Scalar(session.global_step as f32));
            if !rollout.episode_returns.is_empty() {
                let n = rollout.episode_returns.len() as f32;
                record.insert(
                    "episode_return",
                    Scalar(rollout.episode_returns.iter().sum::<f32>() / n),
                );
            }

            // Evaluation
            let mut eval_score = None;
            if config.eval_interval > 0 && session.cycle % config.eval_interval == 0 {
                policy.eval();
                let eval_record = evaluator.evaluate(policy).with_context(|| ctx("evaluator"));
                policy.train();
                let eval_record = eval_record?;
                eval_score = Some(
                    eval_record
                        .get_scalar("eval_score")
                        .with_context(|| ctx("evaluator"))?,
                );
                record.merge_inplace(eval_record);
            }

            // Checkpoint
            let scores = match config.checkpoint.score_source {
                ScoreSource::Evaluation => eval_score.into_iter().collect(),
                ScoreSource::TrainingEpisodes => rollout.episode_returns,
            };
            let global_step = session.global_step;
            for score in scores {
                if let Some(ma) = controller.observe(&mut session, global_step, score) {
                    controller
                        .save::<E, _, _>(&mut session, ma, policy, value)
                        .with_context(|| ctx("checkpoint controller"))?;
                }
            }
            controller
                .save_session(&session)
                .with_context(|| ctx("checkpoint controller"))?;
            self.log_cycle(&session, &mut record, eval_score);

            recorder.store(record);
            if session.cycle % config.flush_record_interval.max(1) == 0 || session.cycle == config.n_cycles {
                recorder.flush(session.global_step as i64);
            }
        }

        Ok(session)
    }

    fn log_cycle(&self, session: &TrainingSession, record: &mut Record, eval_score: Option<f32>) {
        let ma = session.history.moving_average(self.config.checkpoint.window);
        if let Some(ma) = ma {
            record.insert("score_moving_average", Scalar(ma));
        }
        if let Some(high) = session.high_score {
            record.insert("high_score", Scalar(high));
        }
        info!(
            "Cycle {}, {}K steps, eval score {:?}, moving average {:?}",
            session.cycle,
            session.global_step / 1000,
            eval_score,
            ma
        );
    }
}
