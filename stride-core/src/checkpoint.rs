//! Score tracking and checkpointing.
//!
//! The [`CheckpointController`] appends scores to the [`ScoreHistory`] of a
//! [`TrainingSession`] and saves the policy and value parameters whenever the
//! trailing moving average of the scores strictly exceeds the recorded high
//! score, once a warm-up number of scores has been recorded.
//!
//! Every file is first written to a staging path next to its destination
//! and then renamed over it, so an interrupted write never replaces the last
//! good checkpoint. A checkpoint stages the policy, the value function and the
//! session before renaming any of them, so a failed save leaves the previous
//! checkpoint in place as a whole.
use crate::{error::StrideError, Env, PolicyModel, ValueModel};
use anyhow::{Context, Result};
use csv::WriterBuilder;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

/// File name of the session in the checkpoint directory.
pub const SESSION_FILE: &str = "session.yaml";

/// Where the scores driving checkpoints come from.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ScoreSource {
    /// Mean return of the evaluation episodes run after a cycle.
    Evaluation,

    /// Returns of the training episodes completed during rollouts, one score
    /// per episode.
    TrainingEpisodes,
}

/// Configuration of [`CheckpointController`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CheckpointConfig {
    /// Directory holding the checkpoints.
    pub dir: PathBuf,

    /// File name of the policy parameters, e.g. `policy` or `actor`.
    pub policy_role: String,

    /// File name of the value parameters, e.g. `value` or `critic`.
    pub value_role: String,

    /// Window of the trailing moving average.
    pub window: usize,

    /// Number of scores recorded before checkpoints are considered.
    pub warmup: usize,

    /// Source of the scores.
    pub score_source: ScoreSource,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("checkpoints"),
            policy_role: "policy".to_string(),
            value_role: "value".to_string(),
            window: 10,
            warmup: 10,
            score_source: ScoreSource::Evaluation,
        }
    }
}

impl CheckpointConfig {
    /// Sets the checkpoint directory.
    pub fn dir(mut self, v: impl Into<PathBuf>) -> Self {
        self.dir = v.into();
        self
    }

    /// Sets the file names of the policy and the value parameters.
    pub fn roles(mut self, policy: impl Into<String>, value: impl Into<String>) -> Self {
        self.policy_role = policy.into();
        self.value_role = value.into();
        self
    }

    /// Sets the window of the moving average.
    pub fn window(mut self, v: usize) -> Self {
        self.window = v;
        self
    }

    /// Sets the warm-up.
    pub fn warmup(mut self, v: usize) -> Self {
        self.warmup = v;
        self
    }

    /// Sets the score source.
    pub fn score_source(mut self, v: ScoreSource) -> Self {
        self.score_source = v;
        self
    }

    /// Path of the policy parameters.
    pub fn policy_path(&self) -> PathBuf {
        self.dir.join(&self.policy_role)
    }

    /// Path of the value parameters.
    pub fn value_path(&self) -> PathBuf {
        self.dir.join(&self.value_role)
    }

    /// Path of the session.
    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }
}

/// A score observed at some environment step.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct ScoreEntry {
    /// Environment steps taken when the score was observed.
    pub global_step: usize,

    /// The score.
    pub score: f32,
}

/// Append-only sequence of scores.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ScoreHistory {
    entries: Vec<ScoreEntry>,
}

impl ScoreHistory {
    /// Appends a score.
    pub fn push(&mut self, global_step: usize, score: f32) {
        self.entries.push(ScoreEntry { global_step, score });
    }

    /// Number of scores.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no score has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The recorded scores in order.
    pub fn entries(&self) -> &[ScoreEntry] {
        &self.entries
    }

    /// Mean of the last `min(len, window)` scores, `None` if empty.
    pub fn moving_average(&self, window: usize) -> Option<f32> {
        let n = self.entries.len().min(window.max(1));
        match n {
            0 => None,
            n => {
                let tail = &self.entries[self.entries.len() - n..];
                Some(tail.iter().map(|e| e.score).sum::<f32>() / n as f32)
            }
        }
    }

    /// Writes `global_step,score` rows with a header to a CSV file.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut wtr = WriterBuilder::new()
            .has_headers(true)
            .from_writer(File::create(path)?);
        for entry in self.entries.iter() {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// State of a training run that survives across cycles and restarts.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct TrainingSession {
    /// Highest moving average that triggered a checkpoint. Never decreases.
    pub high_score: Option<f32>,

    /// Completed cycles.
    pub cycle: usize,

    /// Environment steps taken over all slots.
    pub global_step: usize,

    /// Recorded scores.
    pub history: ScoreHistory,

    /// Number of environments of the rollouts.
    pub n_envs: usize,

    /// Steps per environment of the rollouts.
    pub horizon: usize,
}

impl TrainingSession {
    /// A new, empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// A new session of rollouts of `n_envs` environments by `horizon` steps.
    pub fn for_rollout(n_envs: usize, horizon: usize) -> Self {
        Self {
            n_envs,
            horizon,
            ..Self::default()
        }
    }

    /// Loads a session saved in the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let rdr = BufReader::new(File::open(path)?);
        Ok(serde_yaml::from_reader(rdr)?)
    }

    /// Saves the session to `path` with the staging and rename scheme.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_atomic(path.as_ref(), |staging| self.write_yaml(staging))
    }

    fn write_yaml(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        let mut file = File::create(path)?;
        file.write_all(yaml.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

/// Staging path of `path`: the same file name with `.tmp` appended.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Lets `write` produce the file at a staging path, then renames it to
/// `path`.
///
/// If `write` fails, the staging file is removed and `path` is untouched. A
/// failed rename is reported as [`StrideError::CheckpointIoError`].
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let staging = stage(path, write)?;
    commit(&staging, path)
}

/// Lets `write` produce the file at the staging path of `path` and returns
/// the staging path. Nothing is left behind if `write` fails.
fn stage<F>(path: &Path, write: F) -> Result<PathBuf>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| StrideError::CheckpointIoError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let staging = staging_path(path);
    if let Err(e) = write(&staging) {
        let _ = fs::remove_file(&staging);
        return Err(e.context(format!("failed to stage {:?}", staging)));
    }
    Ok(staging)
}

/// Renames a staged file to its destination.
fn commit(staging: &Path, path: &Path) -> Result<()> {
    fs::rename(staging, path).map_err(|source| StrideError::CheckpointIoError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn discard(staged: &[PathBuf]) {
    for path in staged.iter() {
        let _ = fs::remove_file(path);
    }
}

/// Decides when to checkpoint and writes checkpoints.
pub struct CheckpointController {
    config: CheckpointConfig,
}

impl CheckpointController {
    /// Constructs the controller.
    pub fn new(config: CheckpointConfig) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Appends `score` to the history of `session` and returns the moving
    /// average if it qualifies for a checkpoint: the warm-up has elapsed and
    /// the average strictly exceeds the high score.
    pub fn observe(&self, session: &mut TrainingSession, global_step: usize, score: f32) -> Option<f32> {
        session.history.push(global_step, score);
        if session.history.len() <= self.config.warmup {
            return None;
        }
        let ma = session.history.moving_average(self.config.window)?;
        match session.high_score {
            Some(high) if ma <= high => None,
            _ => Some(ma),
        }
    }

    /// Saves the policy, the value function and the session, raising the high
    /// score of `session` to `score` first if it is higher.
    ///
    /// The three files are renamed into place only after all of them have
    /// been staged. On failure, `session` and the files of the previous
    /// checkpoint are left unchanged.
    pub fn save<E, P, V>(&self, session: &mut TrainingSession, score: f32, policy: &P, value: &V) -> Result<()>
    where
        E: Env,
        P: PolicyModel<E>,
        V: ValueModel<E>,
    {
        let mut next = session.clone();
        if next.high_score.map_or(true, |high| score > high) {
            next.high_score = Some(score);
        }

        let targets = [
            self.config.policy_path(),
            self.config.value_path(),
            self.config.session_path(),
        ];
        let mut staged = Vec::with_capacity(targets.len());
        for (ix, path) in targets.iter().enumerate() {
            let result = match ix {
                0 => stage(path, |p| policy.save_params(p))
                    .with_context(|| format!("saving {}", self.config.policy_role)),
                1 => stage(path, |p| value.save_params(p))
                    .with_context(|| format!("saving {}", self.config.value_role)),
                _ => stage(path, |p| next.write_yaml(p)).context("saving session"),
            };
            match result {
                Ok(staging) => staged.push(staging),
                Err(e) => {
                    discard(&staged);
                    return Err(e);
                }
            }
        }
        for (staging, path) in staged.iter().zip(targets.iter()) {
            commit(staging, path)?;
        }

        *session = next;
        info!(
            "Saved checkpoint to {:?} (score = {}, global step = {})",
            self.config.dir, score, session.global_step
        );
        Ok(())
    }

    /// Saves only the session.
    pub fn save_session(&self, session: &TrainingSession) -> Result<()> {
        session.save(self.config.session_path())
    }

    /// Loads the session of the checkpoint directory, if there is one.
    pub fn load_session(&self) -> Result<Option<TrainingSession>> {
        let path = self.config.session_path();
        match path.exists() {
            true => Ok(Some(TrainingSession::load(&path)?)),
            false => Ok(None),
        }
    }

    /// Loads the policy and the value parameters.
    pub fn load<E, P, V>(&self, policy: &mut P, value: &mut V) -> Result<()>
    where
        E: Env,
        P: PolicyModel<E>,
        V: ValueModel<E>,
    {
        policy.load_params(&self.config.policy_path())?;
        value.load_params(&self.config.value_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{ConstantValue, ScalarGaussianPolicy, ScriptedEnv};
    use anyhow::anyhow;
    use tempdir::TempDir;

    #[test]
    fn test_moving_average() {
        let mut history = ScoreHistory::default();
        assert_eq!(history.moving_average(10), None);
        for s in [1.0, 2.0, 3.0] {
            history.push(0, s);
        }
        assert_eq!(history.moving_average(10), Some(2.0));
        assert_eq!(history.moving_average(2), Some(2.5));
    }

    #[test]
    fn test_warmup_and_strict_improvement() {
        let controller = CheckpointController::new(CheckpointConfig::default().warmup(2).window(1));
        let mut session = TrainingSession::new();
        assert_eq!(controller.observe(&mut session, 1, 5.0), None);
        assert_eq!(controller.observe(&mut session, 2, 5.0), None);
        // first score after the warm-up always qualifies, even a negative one
        assert_eq!(controller.observe(&mut session, 3, -1.0), Some(-1.0));
        session.high_score = Some(-1.0);
        assert_eq!(controller.observe(&mut session, 4, -1.0), None);
        assert_eq!(controller.observe(&mut session, 5, 0.0), Some(0.0));
    }

    #[test]
    fn test_high_score_is_monotonic() -> Result<()> {
        let dir = TempDir::new("stride_checkpoint")?;
        let config = CheckpointConfig::default().dir(dir.path()).warmup(3);
        let controller = CheckpointController::new(config);
        let mut session = TrainingSession::new();
        let mut policy = ScalarGaussianPolicy::new(0.0, 0.1, 0);
        let value = ConstantValue::new(0.0);

        let mut high_scores = vec![];
        for cycle in 0..50 {
            // increasing for 25 cycles, then decreasing
            let score = if cycle < 25 { cycle as f32 } else { 50.0 - cycle as f32 };
            policy.mu = cycle as f32;
            session.cycle = cycle + 1;
            if let Some(ma) = controller.observe(&mut session, cycle * 10, score) {
                controller.save::<ScriptedEnv, _, _>(&mut session, ma, &policy, &value)?;
            }
            high_scores.push(session.high_score.unwrap_or(f32::NEG_INFINITY));
        }

        assert!(high_scores.windows(2).all(|w| w[0] <= w[1]));
        let saved = TrainingSession::load(controller.config().session_path())?;
        assert_eq!(saved.high_score, session.high_score);

        // the saved policy is the one of the last improvement
        let mut loaded = ScalarGaussianPolicy::new(-1.0, 0.1, 0);
        let mut value = ConstantValue::new(0.0);
        controller.load::<ScriptedEnv, _, _>(&mut loaded, &mut value)?;
        assert!(loaded.mu >= 24.0 && loaded.mu < 30.0);
        Ok(())
    }

    #[test]
    fn test_failed_write_keeps_last_checkpoint() -> Result<()> {
        let dir = TempDir::new("stride_checkpoint")?;
        let path = dir.path().join("policy");
        write_atomic(&path, |p| Ok(fs::write(p, "good")?))?;

        let result = write_atomic(&path, |p| {
            fs::write(p, "partial")?;
            Err(anyhow!("interrupted"))
        });
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path)?, "good");
        assert!(!staging_path(&path).exists());
        Ok(())
    }

    /// Value function whose parameters cannot be written.
    struct UnwritableValue;

    impl ValueModel<ScriptedEnv> for UnwritableValue {
        fn predict(&self, obs: &[Vec<f32>]) -> Result<Vec<f32>> {
            Ok(vec![0.0; obs.len()])
        }

        fn update(&mut self, _obs: &[Vec<f32>], _targets: &[f32]) -> Result<f32> {
            Ok(0.0)
        }

        fn save_params(&self, path: &Path) -> Result<()> {
            fs::write(path, "partial")?;
            Err(anyhow!("disk full"))
        }

        fn load_params(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_save_keeps_previous_checkpoint() -> Result<()> {
        let dir = TempDir::new("stride_checkpoint")?;
        let controller = CheckpointController::new(CheckpointConfig::default().dir(dir.path()));
        let mut session = TrainingSession::for_rollout(2, 8);
        let mut policy = ScalarGaussianPolicy::new(1.0, 0.1, 0);
        controller.save::<ScriptedEnv, _, _>(&mut session, 1.0, &policy, &ConstantValue::new(5.0))?;

        policy.mu = 99.0;
        let result = controller.save::<ScriptedEnv, _, _>(&mut session, 2.0, &policy, &UnwritableValue);
        assert!(result.is_err());
        assert_eq!(session.high_score, Some(1.0));

        let mut loaded = ScalarGaussianPolicy::new(0.0, 0.1, 0);
        let mut value = ConstantValue::new(0.0);
        controller.load::<ScriptedEnv, _, _>(&mut loaded, &mut value)?;
        assert_eq!(loaded.mu, 1.0);
        assert_eq!(value.value, 5.0);
        assert_eq!(controller.load_session()?, Some(session));

        for path in [
            controller.config().policy_path(),
            controller.config().value_path(),
            controller.config().session_path(),
        ] {
            assert!(!staging_path(&path).exists());
        }
        Ok(())
    }

    #[test]
    fn test_session_round_trip_and_csv() -> Result<()> {
        let dir = TempDir::new("stride_session")?;
        let mut session = TrainingSession::for_rollout(4, 64);
        session.high_score = Some(3.5);
        session.cycle = 7;
        session.global_step = 1792;
        session.history.push(256, 1.0);
        session.history.push(512, 3.5);

        let path = dir.path().join(SESSION_FILE);
        session.save(&path)?;
        assert_eq!(TrainingSession::load(&path)?, session);

        let csv_path = dir.path().join("scores.csv");
        session.history.write_csv(&csv_path)?;
        let content = fs::read_to_string(&csv_path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["global_step,score", "256,1.0", "512,3.5"]);
        Ok(())
    }
}
