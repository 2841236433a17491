//! Session loop runs against software ports on a virtual clock.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::{TempDir, tempdir};
use whex_core::{Side, StimulusDisplay};
use whex_task::executor::SignalSender;
use whex_task::graph::StateGraph;
use whex_task::sensor::{PositionSample, SensorEvents};
use whex_task::{
    HardwareError, LoggedValve, ParameterStore, PositionSensor, ScriptedEvents, SessionConfig,
    SessionError, SessionLoop, SoftwareExecutor, Thresholds, TrialExecutor, TrialRun,
    UserSettings,
};
use whex_timing::VirtualTimer;

type SimExecutor = SoftwareExecutor<VirtualTimer, ScriptedEvents, LoggedValve>;

fn sim_executor(timer: &VirtualTimer) -> SimExecutor {
    SoftwareExecutor::new(
        timer.clone(),
        ScriptedEvents::new(timer.clone(), Vec::new()),
        LoggedValve::default(),
    )
}

fn config(trials: usize) -> SessionConfig {
    let mut settings = UserSettings::template();
    settings.trial_number = Some(trials);
    SessionConfig::from_settings(&settings, &mut StdRng::seed_from_u64(9)).unwrap()
}

/// The directory is removed when the returned guard drops.
fn store() -> (TempDir, ParameterStore) {
    let dir = tempdir().unwrap();
    let store = ParameterStore::new(dir.path());
    (dir, store)
}

#[derive(Default)]
struct RecordingSensor {
    thresholds: Option<Thresholds>,
    logging: bool,
    enables: usize,
    resets: usize,
}

impl PositionSensor for RecordingSensor {
    fn reset(&mut self) -> Result<(), HardwareError> {
        self.resets += 1;
        Ok(())
    }
    fn configure_thresholds(&mut self, thresholds: Thresholds) -> Result<(), HardwareError> {
        self.thresholds = Some(thresholds);
        Ok(())
    }
    fn enable_logging(&mut self) -> Result<(), HardwareError> {
        self.logging = true;
        self.enables += 1;
        Ok(())
    }
    fn disable_logging(&mut self) -> Result<(), HardwareError> {
        self.logging = false;
        Ok(())
    }
    fn events(&mut self) -> Option<SensorEvents> {
        None
    }
    fn take_log(&mut self) -> Result<Vec<PositionSample>, HardwareError> {
        Ok(vec![PositionSample {
            t_ns: 0,
            position_deg: 0.0,
        }])
    }
}

#[derive(Default)]
struct CountingDisplay {
    presented: Vec<Side>,
    hidden: usize,
    frames: usize,
    visible: bool,
}

impl StimulusDisplay for CountingDisplay {
    fn present_stimulus(&mut self, correct_side: Side) {
        self.presented.push(correct_side);
        self.visible = true;
    }
    fn start_open_loop(&mut self) {}
    fn stop_open_loop(&mut self) {}
    fn hide_stimulus(&mut self) {
        self.hidden += 1;
        self.visible = false;
    }
    fn update_position(&mut self, _position_deg: f32) {}
    fn render_frame(&mut self) {
        self.frames += 1;
    }
    fn displacement_px(&self) -> Option<f32> {
        self.visible.then_some(0.0)
    }
}

/// Fails the `fail_on`-th run, or raises the stop flag after `stop_after`.
struct ScriptedFailures<X> {
    inner: X,
    runs: usize,
    fail_on: Option<usize>,
    stop_after: Option<(usize, Arc<AtomicBool>)>,
}

impl<X: TrialExecutor> TrialExecutor for ScriptedFailures<X> {
    fn send_graph(&mut self, graph: StateGraph) -> Result<(), HardwareError> {
        self.inner.send_graph(graph)
    }

    fn run_graph(&mut self, signals: SignalSender) -> Result<TrialRun, HardwareError> {
        let run = self.runs;
        self.runs += 1;
        if self.fail_on == Some(run) {
            return Err(HardwareError::Disconnected {
                device: "state machine",
            });
        }
        if let Some((after, stop)) = &self.stop_after {
            if run + 1 == *after {
                stop.store(true, Ordering::Release);
            }
        }
        self.inner.run_graph(signals)
    }
}

#[test]
fn full_session_persists_every_trial() {
    let timer = VirtualTimer::new();
    let (_dir, store) = store();
    let mut session = SessionLoop::new(
        config(4),
        sim_executor(&timer),
        RecordingSensor::default(),
        CountingDisplay::default(),
        timer.clone(),
        StdRng::seed_from_u64(1),
    );

    let result = session.run(&store, "full").unwrap();
    assert_eq!(result.completed_trials(), 4);
    assert_eq!(result.aborted(), None);
    assert_eq!(result.wheel_log().len(), 1);
    let ids: Vec<usize> = result.outcomes().iter().map(|o| o.trial_id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    let traced: Vec<usize> = result.stimulus_log().iter().map(|t| t.trial_id).collect();
    assert_eq!(traced, ids);
    for trace in result.stimulus_log() {
        assert!(trace.samples.iter().all(|s| s.offset_px == 0.0));
        assert!(trace.samples.windows(2).all(|w| w[0].t_ns <= w[1].t_ns));
    }

    let sensor = session.sensor();
    assert!(sensor.thresholds.is_some());
    assert!(!sensor.logging);
    assert_eq!(sensor.enables, 4);
    assert_eq!(sensor.resets, 8);
    let display = session.display();
    assert_eq!(display.presented.len(), 4);
    assert!(display.hidden >= 4);
    assert!(display.frames > 0);

    let record = store.load("full").unwrap();
    assert_eq!(record.result, result);
    assert_eq!(record.config, *session.config());
}

#[test]
fn presented_side_matches_the_drawn_plan() {
    let timer = VirtualTimer::new();
    let (_dir, store) = store();
    let mut session = SessionLoop::new(
        config(6),
        sim_executor(&timer),
        RecordingSensor::default(),
        CountingDisplay::default(),
        timer.clone(),
        StdRng::seed_from_u64(21),
    );
    let result = session.run(&store, "sides").unwrap();
    let drawn: Vec<Side> = result.outcomes().iter().map(|o| o.correct_side).collect();
    assert_eq!(session.display().presented, drawn);
}

#[test]
fn hardware_failure_persists_partial_session() {
    let timer = VirtualTimer::new();
    let (_dir, store) = store();
    let executor = ScriptedFailures {
        inner: sim_executor(&timer),
        runs: 0,
        fail_on: Some(2),
        stop_after: None,
    };
    let mut session = SessionLoop::new(
        config(5),
        executor,
        RecordingSensor::default(),
        CountingDisplay::default(),
        timer.clone(),
        StdRng::seed_from_u64(1),
    );

    let err = session.run(&store, "abort").unwrap_err();
    assert!(matches!(err, SessionError::Hardware { trial: 2, .. }));

    let record = store.load("abort").unwrap();
    assert_eq!(record.result.completed_trials(), 2);
    assert_eq!(record.result.stimulus_log().len(), 2);
    let reason = record.result.aborted().unwrap();
    assert!(reason.contains("state machine link disconnected"), "{reason}");
    assert!(!session.sensor().logging);
}

#[test]
fn stop_request_ends_session_between_trials() {
    let timer = VirtualTimer::new();
    let (_dir, store) = store();
    let stop = Arc::new(AtomicBool::new(false));
    // raised while the third trial runs; that trial still completes
    let executor = ScriptedFailures {
        inner: sim_executor(&timer),
        runs: 0,
        fail_on: None,
        stop_after: Some((3, Arc::clone(&stop))),
    };
    let mut session = SessionLoop::new(
        config(10),
        executor,
        RecordingSensor::default(),
        CountingDisplay::default(),
        timer.clone(),
        StdRng::seed_from_u64(1),
    )
    .with_stop(stop);

    let result = session.run(&store, "stop").unwrap();
    assert_eq!(result.completed_trials(), 3);
    assert_eq!(result.aborted(), None);
    assert_eq!(store.load("stop").unwrap().result.completed_trials(), 3);
}

#[test]
fn setup_failure_does_not_start_trials() {
    struct DeadSensor;
    impl PositionSensor for DeadSensor {
        fn reset(&mut self) -> Result<(), HardwareError> {
            Ok(())
        }
        fn configure_thresholds(&mut self, _: Thresholds) -> Result<(), HardwareError> {
            Err(HardwareError::Disconnected {
                device: "rotary encoder",
            })
        }
        fn enable_logging(&mut self) -> Result<(), HardwareError> {
            Ok(())
        }
        fn disable_logging(&mut self) -> Result<(), HardwareError> {
            Ok(())
        }
        fn events(&mut self) -> Option<SensorEvents> {
            None
        }
        fn take_log(&mut self) -> Result<Vec<PositionSample>, HardwareError> {
            Ok(Vec::new())
        }
    }

    let timer = VirtualTimer::new();
    let (_dir, store) = store();
    let mut session = SessionLoop::new(
        config(3),
        sim_executor(&timer),
        DeadSensor,
        CountingDisplay::default(),
        timer.clone(),
        StdRng::seed_from_u64(1),
    );
    let err = session.run(&store, "setup").unwrap_err();
    assert!(matches!(err, SessionError::Setup(_)));
    assert!(store.load("setup").is_err());
}
