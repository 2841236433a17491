//! Session folder layout, settings I/O and session record persistence.

use crate::config::{SessionConfig, UserSettings};
use crate::error::{ConfigError, PersistError};
use crate::sensor::PositionSample;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use whex_core::TrialOutcome;

/// Stimulus displacement seen on one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StimulusSample {
    pub t_ns: u64,
    pub offset_px: f32,
}

/// Frames of one trial during which the stimulus was on screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StimulusTrace {
    pub trial_id: usize,
    pub samples: Vec<StimulusSample>,
}

/// Accumulated results of one session. Outcomes are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    outcomes: Vec<TrialOutcome>,
    wheel_log: Vec<PositionSample>,
    #[serde(default)]
    stimulus_log: Vec<StimulusTrace>,
    aborted: Option<String>,
    /// Grams, weighed once the subject is back in its cage.
    #[serde(default)]
    animal_weight_after: Option<f64>,
}

impl SessionResult {
    pub fn push(&mut self, outcome: TrialOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[TrialOutcome] {
        &self.outcomes
    }

    pub fn completed_trials(&self) -> usize {
        self.outcomes.len()
    }

    pub fn rewarded_trials(&self) -> usize {
        self.outcomes.iter().filter(|o| o.rewarded).count()
    }

    pub fn wheel_log(&self) -> &[PositionSample] {
        &self.wheel_log
    }

    pub fn set_wheel_log(&mut self, log: Vec<PositionSample>) {
        self.wheel_log = log;
    }

    pub fn push_stimulus_trace(&mut self, trial_id: usize, samples: Vec<StimulusSample>) {
        self.stimulus_log.push(StimulusTrace { trial_id, samples });
    }

    pub fn stimulus_log(&self) -> &[StimulusTrace] {
        &self.stimulus_log
    }

    pub fn animal_weight_after(&self) -> Option<f64> {
        self.animal_weight_after
    }

    pub fn set_animal_weight_after(&mut self, grams: f64) {
        self.animal_weight_after = Some(grams);
    }

    /// Reason the session stopped early, if it did.
    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = Some(reason.into());
    }
}

/// Everything written for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub config: SessionConfig,
    pub result: SessionResult,
}

/// Owns the session folder.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    session_folder: PathBuf,
}

impl ParameterStore {
    pub fn new(session_folder: impl Into<PathBuf>) -> Self {
        Self {
            session_folder: session_folder.into(),
        }
    }

    pub fn session_folder(&self) -> &Path {
        &self.session_folder
    }

    /// Reads user settings and derives the session configuration.
    pub fn initialize<R: rand::Rng>(
        &self,
        settings_path: &Path,
        rng: &mut R,
    ) -> Result<SessionConfig, ConfigError> {
        let settings = Self::load_settings(settings_path)?;
        self.configure(&settings, rng)
    }

    /// Derives the session configuration from settings already in memory.
    pub fn configure<R: rand::Rng>(
        &self,
        settings: &UserSettings,
        rng: &mut R,
    ) -> Result<SessionConfig, ConfigError> {
        let config = SessionConfig::from_settings(settings, rng)?;
        info!(
            trials = config.trial_count,
            blocks = config.blocks.len(),
            reward_size = config.reward.size.label(),
            "session configured"
        );
        Ok(config)
    }

    pub fn load_settings(path: &Path) -> Result<UserSettings, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_settings(path: &Path, settings: &UserSettings) -> Result<(), PersistError> {
        let json = serde_json::to_vec_pretty(settings)?;
        write_atomic(path, &json)
    }

    pub fn record_path(&self, session_id: &str) -> PathBuf {
        self.session_folder.join(format!("{session_id}_session.json"))
    }

    /// Writes the record, replacing any earlier write for the same session.
    /// A reader never sees a half-written file.
    pub fn persist(
        &self,
        session_id: &str,
        config: &SessionConfig,
        result: &SessionResult,
    ) -> Result<PathBuf, PersistError> {
        fs::create_dir_all(&self.session_folder).map_err(|source| PersistError::Io {
            path: self.session_folder.clone(),
            source,
        })?;
        #[derive(Serialize)]
        struct RecordRef<'a> {
            session_id: &'a str,
            config: &'a SessionConfig,
            result: &'a SessionResult,
        }
        let json = serde_json::to_vec_pretty(&RecordRef {
            session_id,
            config,
            result,
        })?;
        let path = self.record_path(session_id);
        write_atomic(&path, &json)?;
        info!(
            path = %path.display(),
            trials = result.completed_trials(),
            aborted = result.aborted().is_some(),
            "session record written"
        );
        Ok(path)
    }

    pub fn load(&self, session_id: &str) -> Result<SessionRecord, PersistError> {
        let path = self.record_path(session_id);
        let raw = fs::read(&path).map_err(|source| PersistError::Io { path, source })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Adds the post-session weight to an already written record.
    pub fn record_weight_after(
        &self,
        session_id: &str,
        grams: f64,
    ) -> Result<SessionRecord, PersistError> {
        let mut record = self.load(session_id)?;
        record.result.set_animal_weight_after(grams);
        self.persist(session_id, &record.config, &record.result)?;
        Ok(record)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)?;
    debug!(path = %path.display(), bytes = bytes.len(), "file replaced");
    Ok(())
}
