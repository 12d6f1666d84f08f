use anyhow::Result;
use stride_core::{
    record::BufferedRecorder, CheckpointConfig, ClippedSurrogateConfig, Evaluator, MinibatchConfig,
    PolicyModel, PolicyUpdateConfig, Trainer, TrainerConfig, ValueUpdateConfig,
};
use stride_policy_no_backend::{
    LinearGaussianPolicy, LinearGaussianPolicyConfig, LinearValue, LinearValueConfig,
};
use stride_toy_env::{PointReach, PointReachConfig};
use tempdir::TempDir;
use test_log::test;

fn config(dir: &TempDir) -> TrainerConfig {
    let minibatch = MinibatchConfig::default().size(64);
    TrainerConfig::default()
        .n_cycles(20)
        .n_envs(4)
        .horizon(64)
        .seed(3)
        .eval_interval(5)
        .n_eval_episodes(8)
        .policy_update(PolicyUpdateConfig::ClippedSurrogate(
            ClippedSurrogateConfig::default().minibatch(minibatch.clone()),
        ))
        .value_update(ValueUpdateConfig::default().minibatch(minibatch))
        .checkpoint(CheckpointConfig::default().dir(dir.path()).window(2).warmup(0))
}

fn models() -> (LinearGaussianPolicy, LinearValue) {
    let policy = LinearGaussianPolicy::build(
        LinearGaussianPolicyConfig::default().dims(1, 1).learning_rate(0.02),
        0,
    );
    let value = LinearValue::build(LinearValueConfig::default().max_grad_norm(Some(10.0)));
    (policy, value)
}

#[test]
fn test_ppo_improves_evaluation_score() -> Result<()> {
    let dir = TempDir::new("ppo_point_reach")?;
    let mut trainer = Trainer::<PointReach>::build(config(&dir), PointReachConfig::default());
    let (mut policy, mut value) = models();
    let mut evaluator = trainer.default_evaluator()?;

    PolicyModel::<PointReach>::eval(&mut policy);
    let before = evaluator.evaluate(&mut policy)?.get_scalar("eval_score")?;

    let mut recorder = BufferedRecorder::new();
    let session = trainer.train(&mut policy, &mut value, &mut recorder, &mut evaluator)?;

    PolicyModel::<PointReach>::eval(&mut policy);
    let after = evaluator.evaluate(&mut policy)?.get_scalar("eval_score")?;
    assert!(after > before, "{} -> {}", before, after);

    // The mean moves along the observation, W > 0
    assert!(PolicyModel::<PointReach>::params(&policy)[0] > 0.0);

    assert_eq!(session.cycle, 20);
    assert_eq!(session.global_step, 20 * 4 * 64);
    assert_eq!(session.history.len(), 4);

    let flushed = recorder.flushed();
    assert_eq!(flushed.len(), 20);
    assert_eq!(flushed[19].0, 20 * 4 * 64);
    for key in ["loss_policy", "loss_value", "clip_fraction", "approx_kl", "global_step"] {
        assert!(flushed[0].1.get_scalar(key).is_ok(), "missing {}", key);
    }
    assert!(flushed[4].1.get_scalar("eval_score").is_ok());
    assert!(flushed[3].1.get_scalar("eval_score").is_err());
    Ok(())
}
