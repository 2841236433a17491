//! Sequential trial loop tying executor, sensor and display together.

use crate::config::{SessionConfig, SoftcodeTable};
use crate::error::{HardwareError, SessionError};
use crate::executor::{SignalMessage, TrialExecutor, signal_channel};
use crate::graph::build_graph;
use crate::sensor::PositionSensor;
use crate::store::{ParameterStore, SessionResult, StimulusSample};
use crate::trial::TrialPlan;
use rand::Rng;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use whex_core::{Side, Signal, StimulusDisplay, TrialOutcome};
use whex_timing::Timer;

/// Signals one trial can queue before the executor starts dropping them.
pub const SIGNAL_QUEUE_DEPTH: usize = 32;

/// Session-thread side of a running trial: turns executor signals into
/// display and sensor calls and keeps frames coming.
struct SignalRouter<'a, S, D, T> {
    softcodes: &'a SoftcodeTable,
    correct_side: Side,
    sensor: &'a mut S,
    display: &'a mut D,
    positions: Option<&'a Receiver<f32>>,
    timer: &'a T,
    frame_period: Duration,
    stimulus_log: Vec<StimulusSample>,
}

impl<S, D, T> SignalRouter<'_, S, D, T>
where
    S: PositionSensor,
    D: StimulusDisplay,
    T: Timer<Timestamp = u64>,
{
    /// Runs until the executor drops its end of the channel. Every signal
    /// is delivered even after a sensor call failed; the first failure is
    /// returned.
    fn route(&mut self, signals: &Receiver<SignalMessage>) -> Result<(), HardwareError> {
        let mut first_error = None;
        let frame_ns = self.frame_period.as_nanos() as u64;
        let mut next_frame = self.timer.now();
        loop {
            let message = match signals.recv_timeout(self.frame_period) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if let Some(message) = message {
                if let Err(err) = self.dispatch(message) {
                    warn!(error = %err, ?message, "signal delivery failed");
                    first_error.get_or_insert(err);
                }
            }
            let now = self.timer.now();
            if now >= next_frame {
                self.frame();
                next_frame = now + frame_ns;
            }
        }
        self.frame();
        first_error.map_or(Ok(()), Err)
    }

    fn dispatch(&mut self, message: SignalMessage) -> Result<(), HardwareError> {
        let code = match message {
            SignalMessage::ResetSensor => return self.sensor.reset(),
            SignalMessage::Softcode(code) => code,
        };
        let Some(signal) = self.softcodes.signal(code) else {
            warn!(code, "unknown softcode ignored");
            return Ok(());
        };
        debug!(code, ?signal, "signal");
        match signal {
            Signal::PresentStimulus => self.display.present_stimulus(self.correct_side),
            Signal::StartOpenLoop => self.display.start_open_loop(),
            Signal::StopOpenLoop => self.display.stop_open_loop(),
            Signal::HideStimulus => self.display.hide_stimulus(),
            Signal::StartLogging => self.sensor.enable_logging()?,
            Signal::StopLogging => self.sensor.disable_logging()?,
        }
        Ok(())
    }

    fn frame(&mut self) {
        if let Some(position) = self.positions.and_then(|rx| rx.try_iter().last()) {
            self.display.update_position(position);
        }
        self.display.render_frame();
        if let Some(offset_px) = self.display.displacement_px() {
            self.stimulus_log.push(StimulusSample {
                t_ns: self.timer.now(),
                offset_px,
            });
        }
    }
}

/// Runs every trial of one session in order.
pub struct SessionLoop<X, S, D, T, R> {
    config: SessionConfig,
    executor: X,
    sensor: S,
    display: D,
    positions: Option<Receiver<f32>>,
    timer: T,
    rng: R,
    stop: Arc<AtomicBool>,
}

impl<X, S, D, T, R> SessionLoop<X, S, D, T, R>
where
    X: TrialExecutor,
    S: PositionSensor,
    D: StimulusDisplay,
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub fn new(config: SessionConfig, executor: X, sensor: S, display: D, timer: T, rng: R) -> Self {
        Self {
            config,
            executor,
            sensor,
            display,
            positions: None,
            timer,
            rng,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Live wheel position feed forwarded to the display each frame.
    pub fn with_positions(mut self, positions: Receiver<f32>) -> Self {
        self.positions = Some(positions);
        self
    }

    /// Shares an externally owned stop flag, e.g. one raised by a signal
    /// handler.
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Setting the returned flag ends the session after the running trial.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// Runs the session and persists its record under `session_id`.
    ///
    /// A hardware failure ends the session; the trials completed so far are
    /// still written before the error is returned.
    pub fn run(
        &mut self,
        store: &ParameterStore,
        session_id: &str,
    ) -> Result<SessionResult, SessionError> {
        info!(
            session_id,
            trials = self.config.trial_count,
            "session starting"
        );
        self.sensor
            .configure_thresholds(self.config.thresholds)
            .map_err(SessionError::Setup)?;

        let mut result = SessionResult::default();
        let trials = self.run_trials(&mut result);
        self.finish(&mut result);
        if let Err(err) = &trials {
            let reason = describe(err);
            error!(reason = %reason, completed = result.completed_trials(), "session aborted");
            result.abort(reason);
        }

        let persisted = store.persist(session_id, &self.config, &result);
        match (trials, persisted) {
            (Err(err), persisted) => {
                if let Err(persist_err) = persisted {
                    error!(error = %persist_err, "partial session record not written");
                }
                Err(err)
            }
            (Ok(()), Err(persist_err)) => Err(persist_err.into()),
            (Ok(()), Ok(_)) => {
                info!(
                    completed = result.completed_trials(),
                    rewarded = result.rewarded_trials(),
                    "session finished"
                );
                Ok(result)
            }
        }
    }

    fn run_trials(&mut self, result: &mut SessionResult) -> Result<(), SessionError> {
        for trial in 0..self.config.trial_count {
            if self.stop.load(Ordering::Acquire) {
                info!(completed = trial, "stop requested");
                break;
            }
            let (outcome, stimulus) = self
                .run_trial(trial)
                .map_err(|source| SessionError::Hardware { trial, source })?;
            info!(
                trial,
                side = outcome.correct_side.label(),
                branch = ?outcome.branch,
                stopping_failures = outcome.stopping_failures,
                duration_ms = outcome.duration_ns / 1_000_000,
                "trial finished"
            );
            result.push(outcome);
            result.push_stimulus_trace(trial, stimulus);
        }
        Ok(())
    }

    /// Runs one trial: the executor gets its own thread for the lifetime of
    /// the graph while this thread routes its signals and renders frames.
    /// Returns the outcome with the stimulus displacement of every frame
    /// that showed it.
    fn run_trial(
        &mut self,
        trial_id: usize,
    ) -> Result<(TrialOutcome, Vec<StimulusSample>), HardwareError> {
        let plan = TrialPlan::draw(trial_id, &self.config, &mut self.rng);
        debug!(
            trial = trial_id,
            side = plan.correct_side.label(),
            punish_s = plan.punish_time_s,
            block = ?self.config.block_of(trial_id),
            "trial planned"
        );
        self.executor.send_graph(build_graph(&self.config, &plan))?;

        let (signals, signal_rx) = signal_channel(SIGNAL_QUEUE_DEPTH);
        let executor = &mut self.executor;
        let mut router = SignalRouter {
            softcodes: &self.config.softcodes,
            correct_side: plan.correct_side,
            sensor: &mut self.sensor,
            display: &mut self.display,
            positions: self.positions.as_ref(),
            timer: &self.timer,
            frame_period: Duration::from_nanos(self.config.geometry.frame_period_ns()),
            stimulus_log: Vec::new(),
        };

        let (run, routed) = thread::scope(|scope| {
            let worker = scope.spawn(move || executor.run_graph(signals));
            let routed = router.route(&signal_rx);
            (worker.join(), routed)
        });

        let run = run.map_err(|_| HardwareError::ExecutorPanicked)??;
        routed?;
        let outcome = plan.outcome(&run).ok_or_else(|| HardwareError::Device {
            device: "trial executor",
            reason: format!("trial {trial_id} ended without reaching a reward branch"),
        })?;
        Ok((outcome, router.stimulus_log))
    }

    fn finish(&mut self, result: &mut SessionResult) {
        self.display.hide_stimulus();
        if let Err(err) = self.sensor.disable_logging() {
            warn!(error = %err, "could not disable sensor logging");
        }
        match self.sensor.take_log() {
            Ok(log) => {
                debug!(samples = log.len(), "wheel log collected");
                result.set_wheel_log(log);
            }
            Err(err) => warn!(error = %err, "wheel log lost"),
        }
    }
}

fn describe(err: &dyn Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
