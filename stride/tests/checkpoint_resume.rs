use anyhow::Result;
use std::fs;
use stride_core::{
    record::NullRecorder, CheckpointConfig, PolicyModel, Trainer, TrainerConfig, TrainingSession,
    SESSION_FILE,
};
use stride_policy_no_backend::{
    LinearGaussianPolicy, LinearGaussianPolicyConfig, LinearValue, LinearValueConfig,
};
use stride_toy_env::{PointReach, PointReachConfig};
use tempdir::TempDir;
use test_log::test;

const N_ENVS: usize = 2;
const HORIZON: usize = 16;

fn train(dir: &TempDir, n_cycles: usize, resume: bool) -> Result<(TrainingSession, Vec<f32>)> {
    let config = TrainerConfig::default()
        .n_cycles(n_cycles)
        .n_envs(N_ENVS)
        .horizon(HORIZON)
        .n_eval_episodes(2)
        .resume(resume)
        .checkpoint(CheckpointConfig::default().dir(dir.path()).window(2).warmup(0));
    let mut trainer = Trainer::<PointReach>::build(config, PointReachConfig::default());
    let mut policy = LinearGaussianPolicy::build(LinearGaussianPolicyConfig::default(), 0);
    let mut value = LinearValue::build(LinearValueConfig::default());
    let mut evaluator = trainer.default_evaluator()?;

    let session = trainer.train(&mut policy, &mut value, &mut NullRecorder, &mut evaluator)?;
    Ok((session, PolicyModel::<PointReach>::params(&policy)))
}

#[test]
fn test_resume_continues_session() -> Result<()> {
    let dir = TempDir::new("resume")?;
    let (first, _) = train(&dir, 3, false)?;
    assert!(dir.path().join(SESSION_FILE).exists());
    assert!(dir.path().join("policy").exists());
    assert!(dir.path().join("value").exists());
    assert_eq!(TrainingSession::load(dir.path().join(SESSION_FILE))?, first);

    let (second, _) = train(&dir, 6, true)?;
    assert_eq!(second.cycle, 6);
    assert_eq!(second.global_step, 6 * N_ENVS * HORIZON);
    assert_eq!(second.history.len(), 6);
    assert_eq!(&second.history.entries()[..3], first.history.entries());
    assert!(second.high_score >= first.high_score);

    // nothing left to do
    let (third, _) = train(&dir, 6, true)?;
    assert_eq!(third, second);
    Ok(())
}

#[test]
fn test_resume_without_session_starts_fresh() -> Result<()> {
    let dir = TempDir::new("resume_fresh")?;
    let (session, _) = train(&dir, 2, true)?;
    assert_eq!(session.cycle, 2);
    assert_eq!(session.history.len(), 2);
    Ok(())
}

#[test]
fn test_no_resume_overwrites_session() -> Result<()> {
    let dir = TempDir::new("no_resume")?;
    train(&dir, 3, false)?;
    let (session, _) = train(&dir, 1, false)?;
    assert_eq!(session.cycle, 1);
    assert_eq!(TrainingSession::load(dir.path().join(SESSION_FILE))?.cycle, 1);
    Ok(())
}

#[test]
fn test_score_history_csv() -> Result<()> {
    let dir = TempDir::new("scores_csv")?;
    let (session, _) = train(&dir, 3, false)?;
    let path = dir.path().join("scores.csv");
    session.history.write_csv(&path)?;

    let content = fs::read_to_string(&path)?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "global_step,score");
    assert!(lines[1].starts_with(&format!("{},", N_ENVS * HORIZON)));
    Ok(())
}
