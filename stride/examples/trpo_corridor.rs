use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::Path;
use stride_core::{
    AdvantageConfig, CheckpointConfig, DefaultEvaluator, Evaluator as _, MinibatchConfig,
    PolicyModel, PolicyUpdateConfig, SampleStrategy, ScoreSource, Trainer, TrainerConfig,
    TrainingSession, TrustRegionConfig, ValueUpdateConfig,
};
use stride_policy_no_backend::{
    LinearSoftmaxPolicy, LinearSoftmaxPolicyConfig, LinearValue, LinearValueConfig,
};
use stride_tensorboard::TensorboardRecorder;
use stride_toy_env::{Corridor, CorridorConfig};

const LENGTH: usize = 6;
const N_ACTIONS: usize = 2;
const LR_VALUE: f32 = 0.1;
const N_ENVS: usize = 4;
const HORIZON: usize = 256;
const N_CYCLES: usize = 50;
const N_EPISODES_PER_EVAL: usize = 1;
const MAX_KL: f32 = 0.01;
const VALUE_BATCH_SIZE: usize = 64;
const VALUE_EPOCHS: usize = 5;
const GAMMA: f32 = 0.99;
const LAMBDA: f32 = 0.98;
const WINDOW: usize = 10;
const WARMUP: usize = 10;
const SEED: i64 = 0;
const MODEL_DIR: &str = "./stride/examples/model/trpo_corridor";

type Env = Corridor;

fn env_config() -> CorridorConfig {
    CorridorConfig::default().length(LENGTH).slip_prob(0.1)
}

fn create_policy() -> LinearSoftmaxPolicy {
    LinearSoftmaxPolicy::build(
        LinearSoftmaxPolicyConfig::default().dims(LENGTH, N_ACTIONS),
        SEED as u64,
    )
}

fn create_value() -> LinearValue {
    LinearValue::build(
        LinearValueConfig::default()
            .obs_dim(LENGTH)
            .learning_rate(LR_VALUE),
    )
}

fn checkpoint_config(model_dir: &str) -> CheckpointConfig {
    CheckpointConfig::default()
        .dir(model_dir)
        .roles("actor", "critic")
        .window(WINDOW)
        .warmup(WARMUP)
        .score_source(ScoreSource::TrainingEpisodes)
}

fn trainer_config(n_cycles: usize, model_dir: &str) -> TrainerConfig {
    let minibatch = MinibatchConfig::default()
        .size(VALUE_BATCH_SIZE)
        .strategy(SampleStrategy::WithReplacement);
    TrainerConfig::default()
        .n_cycles(n_cycles)
        .n_envs(N_ENVS)
        .horizon(HORIZON)
        .seed(SEED)
        .inline_values(true)
        .eval_interval(1)
        .n_eval_episodes(N_EPISODES_PER_EVAL)
        .eval_max_steps(Some(100))
        .advantage(AdvantageConfig::default().gamma(GAMMA).lambda(LAMBDA))
        .policy_update(PolicyUpdateConfig::TrustRegion(
            TrustRegionConfig::default().max_kl(MAX_KL),
        ))
        .value_update(
            ValueUpdateConfig::default()
                .n_epochs(VALUE_EPOCHS)
                .minibatch(minibatch),
        )
        .checkpoint(checkpoint_config(model_dir))
}

/// Train/eval TRPO agent in the corridor environment
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Train the policy, not evaluate
    #[arg(short, long, default_value_t = false)]
    train: bool,

    /// Evaluate the policy, not train
    #[arg(short, long, default_value_t = false)]
    eval: bool,

    /// Resume training from the session saved in the model directory
    #[arg(short, long, default_value_t = false)]
    resume: bool,

    /// Training configuration in YAML, overriding the built-in one
    #[arg(short, long)]
    config: Option<String>,

    /// Directory of checkpoints, tensorboard logs and score history
    #[arg(long, default_value = MODEL_DIR)]
    model_dir: String,
}

fn train(config: TrainerConfig, model_dir: &str) -> Result<TrainingSession> {
    std::fs::create_dir_all(model_dir)?;
    config.save(Path::new(model_dir).join("trainer.yaml"))?;

    let mut trainer = Trainer::<Env>::build(config, env_config());
    let mut policy = create_policy();
    let mut value = create_value();
    let mut recorder = TensorboardRecorder::new(model_dir);
    let mut evaluator = trainer.default_evaluator()?;

    let session = trainer.train(&mut policy, &mut value, &mut recorder, &mut evaluator)?;
    session.history.write_csv(Path::new(model_dir).join("scores.csv"))?;
    info!(
        "P(right) in the first cell: {}",
        policy.probs(&first_cell_obs())[1]
    );
    Ok(session)
}

fn first_cell_obs() -> Vec<f32> {
    let mut obs = vec![0.0; LENGTH];
    obs[0] = 1.0;
    obs
}

fn eval(model_dir: &str) -> Result<f32> {
    let mut policy = create_policy();
    PolicyModel::<Env>::load_params(&mut policy, &checkpoint_config(model_dir).policy_path())?;
    PolicyModel::<Env>::eval(&mut policy);

    let mut evaluator =
        DefaultEvaluator::<Env>::new(&env_config(), SEED, N_EPISODES_PER_EVAL)?.with_max_steps(Some(100));
    let score = evaluator.evaluate(&mut policy)?.get_scalar("eval_score")?;
    info!("Return of the greedy policy: {}", score);
    Ok(score)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => TrainerConfig::load(path)?.checkpoint(checkpoint_config(&args.model_dir)),
        None => trainer_config(N_CYCLES, &args.model_dir),
    }
    .resume(args.resume);

    if args.train {
        train(config, &args.model_dir)?;
    } else if args.eval {
        eval(&args.model_dir)?;
    } else {
        train(config, &args.model_dir)?;
        eval(&args.model_dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_trpo_corridor() -> Result<()> {
        let model_dir = TempDir::new("trpo_corridor")?;
        let model_dir = model_dir.path().to_str().unwrap();
        let session = train(trainer_config(3, model_dir), model_dir)?;
        assert_eq!(session.cycle, 3);
        assert!(session.history.len() > WARMUP);
        assert!(session.high_score.is_some());
        assert!(checkpoint_config(model_dir).value_path().ends_with("critic"));
        eval(model_dir)?;
        Ok(())
    }
}
