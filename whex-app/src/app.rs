use crate::subject::SimulatedSubject;
use anyhow::{Context, Result, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{info, warn};
use whex_render::StimulusRenderer;
use whex_task::{
    ChannelEvents, EncoderSettings, LoggedValve, ParameterStore, PositionSensor, RotaryEncoder,
    SessionLoop, SoftwareExecutor, UserSettings,
};
use whex_timing::HighPrecisionTimer;

/// Options for one training session.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: PathBuf,
    pub session_dir: PathBuf,
    pub session_name: Option<String>,
    pub seed: Option<u64>,
    pub trials: Option<usize>,
    pub snapshot: Option<PathBuf>,
}

pub struct App {
    options: RunOptions,
    rng: StdRng,
}

impl App {
    pub fn new(options: RunOptions) -> Result<Self> {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self { options, rng })
    }

    pub fn run(mut self) -> Result<()> {
        info!(
            platform = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            "wheel training rig"
        );
        let store = ParameterStore::new(&self.options.session_dir);
        let mut settings = ParameterStore::load_settings(&self.options.config)
            .with_context(|| format!("loading settings from {}", self.options.config.display()))?;
        if let Some(trials) = self.options.trials {
            if !settings.blocks.is_empty() {
                warn!(trials, "trial count given, configured blocks ignored");
            }
            settings.override_trial_count(trials);
        }
        let config = store
            .configure(&settings, &mut self.rng)
            .with_context(|| format!("invalid settings in {}", self.options.config.display()))?;
        let session_id = self
            .options
            .session_name
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d_%H%M%S").to_string());

        let timer = HighPrecisionTimer::new();
        let subject = SimulatedSubject::new(timer.clone(), StdRng::seed_from_u64(self.rng.random()));
        let (mut encoder, positions) =
            RotaryEncoder::spawn(subject, timer.clone(), EncoderSettings::default());
        let events = encoder
            .events()
            .context("rotary encoder event stream already taken")?;
        let executor = SoftwareExecutor::new(
            timer.clone(),
            ChannelEvents::new(events, timer.clone()),
            LoggedValve::default(),
        );
        let renderer =
            StimulusRenderer::new(config.geometry.clone(), config.thresholds.stim_reached_right)
                .context("creating the stimulus renderer")?;

        let mut session = SessionLoop::new(config, executor, encoder, renderer, timer, self.rng)
            .with_positions(positions);
        watch_stdin(session.stop_handle());
        info!(session_id = %session_id, "type `q` and enter to stop after the current trial");

        let outcome = session.run(&store, &session_id);

        let frames = session.display().calibration_stats();
        info!(
            frames = frames.frames,
            avg_frame_us = frames.average_frame_time_ns / 1e3,
            jitter_us = frames.jitter_ns / 1e3,
            "render timing"
        );
        info!(
            valve_openings = session.executor().valve().openings,
            "reward delivery"
        );
        if let Some(path) = &self.options.snapshot {
            if let Err(err) = session.display().save_png(path) {
                warn!(error = %err, "snapshot not written");
            }
        }

        let result = outcome.context("session ended with an error")?;
        info!(
            session_id = %session_id,
            completed = result.completed_trials(),
            rewarded = result.rewarded_trials(),
            record = %store.record_path(&session_id).display(),
            "done"
        );
        Ok(())
    }
}

/// Raises `stop` when the operator enters `q` on stdin.
fn watch_stdin(stop: Arc<AtomicBool>) {
    let spawned = thread::Builder::new()
        .name("stdin-stop".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if matches!(line.trim(), "q" | "quit" | "stop") {
                    info!("stop requested");
                    stop.store(true, Ordering::Release);
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        warn!(error = %err, "stop key disabled");
    }
}

/// Adds the weight taken after the session to its record.
pub fn record_weight(session_dir: &Path, session_name: &str, grams: f64) -> Result<()> {
    if !(grams.is_finite() && grams > 0.0) {
        bail!("weight must be a positive number of grams, got {grams}");
    }
    let store = ParameterStore::new(session_dir);
    store
        .record_weight_after(session_name, grams)
        .with_context(|| format!("updating the record of session {session_name}"))?;
    info!(session_id = session_name, grams, "weight after session recorded");
    Ok(())
}

/// Writes the default settings file.
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    ParameterStore::save_settings(path, &UserSettings::template())
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "settings template written");
    Ok(())
}
