use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::Path;
use stride_core::{
    AdvantageConfig, CheckpointConfig, ClippedSurrogateConfig, DefaultEvaluator, Evaluator as _,
    MinibatchConfig, PolicyModel, PolicyUpdateConfig, SampleStrategy, Trainer, TrainerConfig,
    TrainingSession, ValueUpdateConfig,
};
use stride_policy_no_backend::{
    LinearGaussianPolicy, LinearGaussianPolicyConfig, LinearValue, LinearValueConfig,
};
use stride_tensorboard::TensorboardRecorder;
use stride_toy_env::{PointReach, PointReachConfig};

const DIM: usize = 2;
const LR_POLICY: f32 = 0.01;
const LR_VALUE: f32 = 0.01;
const N_ENVS: usize = 8;
const HORIZON: usize = 128;
const N_CYCLES: usize = 200;
const EVAL_INTERVAL: usize = 5;
const N_EPISODES_PER_EVAL: usize = 10;
const MINIBATCH_SIZE: usize = 64;
const CLIP_EPS: f32 = 0.2;
const N_EPOCHS: usize = 4;
const GAMMA: f32 = 0.99;
const LAMBDA: f32 = 0.95;
const WINDOW: usize = 3;
const WARMUP: usize = 3;
const SEED: i64 = 42;
const MODEL_DIR: &str = "./stride/examples/model/ppo_point_reach";

type Env = PointReach;

fn env_config() -> PointReachConfig {
    PointReachConfig::default().dim(DIM)
}

fn create_policy() -> LinearGaussianPolicy {
    let config = LinearGaussianPolicyConfig::default()
        .dims(DIM, DIM)
        .learning_rate(LR_POLICY)
        .max_grad_norm(Some(1.0));
    LinearGaussianPolicy::build(config, SEED as u64)
}

fn create_value() -> LinearValue {
    let config = LinearValueConfig::default()
        .obs_dim(DIM)
        .learning_rate(LR_VALUE)
        .max_grad_norm(Some(10.0));
    LinearValue::build(config)
}

fn checkpoint_config(model_dir: &str) -> CheckpointConfig {
    CheckpointConfig::default()
        .dir(model_dir)
        .window(WINDOW)
        .warmup(WARMUP)
}

fn trainer_config(n_cycles: usize, model_dir: &str, eval_interval: usize) -> TrainerConfig {
    let minibatch = MinibatchConfig::default()
        .size(MINIBATCH_SIZE)
        .strategy(SampleStrategy::Shuffled);
    TrainerConfig::default()
        .n_cycles(n_cycles)
        .n_envs(N_ENVS)
        .horizon(HORIZON)
        .seed(SEED)
        .eval_interval(eval_interval)
        .n_eval_episodes(N_EPISODES_PER_EVAL)
        .advantage(AdvantageConfig::default().gamma(GAMMA).lambda(LAMBDA))
        .policy_update(PolicyUpdateConfig::ClippedSurrogate(
            ClippedSurrogateConfig::default()
                .clip_eps(CLIP_EPS)
                .n_epochs(N_EPOCHS)
                .minibatch(minibatch.clone()),
        ))
        .value_update(ValueUpdateConfig::default().minibatch(minibatch))
        .checkpoint(checkpoint_config(model_dir))
}

/// Train/eval PPO agent in the point reaching environment
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

    /// Directory of checkpoints, tensorboard logs and score history
    #[arg(long, default_value = MODEL_DIR)]
    model_dir: String,
}

fn train(n_cycles: usize, model_dir: &str, eval_interval: usize, resume: bool) -> Result<TrainingSession> {
    std::fs::create_dir_all(model_dir)?;
    let config = trainer_config(n_cycles, model_dir, eval_interval).resume(resume);
    config.save(Path::new(model_dir).join("trainer.yaml"))?;

    let mut trainer = Trainer::<Env>::build(config, env_config());
    let mut policy = create_policy();
    let mut value = create_value();
    let mut recorder = TensorboardRecorder::new(model_dir);
    let mut evaluator = trainer.default_evaluator()?;

    let session = trainer.train(&mut policy, &mut value, &mut recorder, &mut evaluator)?;
    session.history.write_csv(Path::new(model_dir).join("scores.csv"))?;
    info!("High score: {:?}", session.high_score);
    Ok(session)
}

fn eval(n_episodes: usize, model_dir: &str) -> Result<f32> {
    let mut policy = create_policy();
    PolicyModel::<Env>::load_params(&mut policy, &checkpoint_config(model_dir).policy_path())?;
    PolicyModel::<Env>::eval(&mut policy);

    let mut evaluator = DefaultEvaluator::<Env>::new(&env_config(), SEED, n_episodes)?;
    let score = evaluator.evaluate(&mut policy)?.get_scalar("eval_score")?;
    info!("Mean return over {} episodes: {}", n_episodes, score);
    Ok(score)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.train {
        train(N_CYCLES, &args.model_dir, EVAL_INTERVAL, args.resume)?;
    } else if args.eval {
        eval(N_EPISODES_PER_EVAL, &args.model_dir)?;
    } else {
        train(N_CYCLES, &args.model_dir, EVAL_INTERVAL, args.resume)?;
        eval(N_EPISODES_PER_EVAL, &args.model_dir)?;
    }
    Ok(())
}
