//! Whole-trial runs of the built graph on a virtual clock.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::Duration;
use whex_core::{Branch, SensorEvent, Side, StateId};
use whex_task::executor::{SignalMessage, signal_channel};
use whex_task::graph::Trigger;
use whex_task::{
    LoggedValve, ScriptedEvents, SessionConfig, SoftwareExecutor, TrialExecutor, TrialPlan,
    TrialRun, UserSettings, build_graph,
};
use whex_timing::VirtualTimer;

const SEC: u64 = 1_000_000_000;

fn config_with(edit: impl FnOnce(&mut UserSettings)) -> SessionConfig {
    let mut settings = UserSettings::template();
    edit(&mut settings);
    SessionConfig::from_settings(&settings, &mut StdRng::seed_from_u64(0)).unwrap()
}

fn plan(correct_side: Side) -> TrialPlan {
    TrialPlan {
        trial_id: 0,
        correct_side,
        punish_time_s: 2.5,
    }
}

struct Finished {
    run: TrialRun,
    signals: Vec<SignalMessage>,
    valve: LoggedValve,
    unused_events: usize,
}

fn run_trial(
    config: &SessionConfig,
    plan: &TrialPlan,
    script: Vec<(Duration, SensorEvent)>,
) -> Finished {
    let timer = VirtualTimer::new();
    let events = ScriptedEvents::new(timer.clone(), script);
    let mut executor = SoftwareExecutor::new(timer, events, LoggedValve::default());
    executor.send_graph(build_graph(config, plan)).unwrap();
    let (signals, rx) = signal_channel(64);
    let run = executor.run_graph(signals).unwrap();
    Finished {
        run,
        signals: rx.try_iter().collect(),
        valve: executor.valve().clone(),
        unused_events: executor.events().remaining(),
    }
}

#[test]
fn idle_wheel_reaches_presentation_after_stopping_check() {
    let config = config_with(|s| s.time_wheel_stopping_check = Some(5.0));
    let done = run_trial(&config, &plan(Side::Left), Vec::new());

    let check = done.run.entered_at(StateId::WheelStoppingCheck).unwrap();
    let present = done.run.entered_at(StateId::PresentStim).unwrap();
    assert_eq!(present - check, 5 * SEC);
    assert_eq!(done.run.count(StateId::WheelStoppingFailedPunish), 0);
}

#[test]
fn untouched_wheel_ends_in_open_loop_failure() {
    let config = config_with(|_| {});
    let done = run_trial(&config, &plan(Side::Left), Vec::new());

    assert_eq!(
        done.run.path(),
        vec![
            StateId::Start,
            StateId::ResetBeforeStoppingCheck,
            StateId::WheelStoppingCheck,
            StateId::PresentStim,
            StateId::ResetBeforeOpenLoop,
            StateId::OpenLoop,
            StateId::OpenLoopFail,
            StateId::OpenLoopFailPunish,
            StateId::InterTrial,
            StateId::End,
        ]
    );
    let punish = done.run.entered_at(StateId::OpenLoopFailPunish).unwrap();
    let inter = done.run.entered_at(StateId::InterTrial).unwrap();
    assert_eq!(inter - punish, 2_500_000_000);
    let outcome = plan(Side::Left).outcome(&done.run).unwrap();
    assert_eq!(outcome.branch, Branch::OpenLoopFail);
    assert!(!outcome.rewarded);
    assert_eq!(done.valve.openings, 0);
}

#[test]
fn moving_wheel_loops_back_through_stopping_punish() {
    let config = config_with(|_| {});
    let done = run_trial(
        &config,
        &plan(Side::Left),
        vec![(Duration::from_millis(800), SensorEvent::LeftStop)],
    );

    assert_eq!(
        done.run.path()[..7],
        [
            StateId::Start,
            StateId::ResetBeforeStoppingCheck,
            StateId::WheelStoppingCheck,
            StateId::WheelStoppingFailedPunish,
            StateId::ResetBeforeStoppingCheck,
            StateId::WheelStoppingCheck,
            StateId::PresentStim,
        ]
    );
    let first_check = &done.run.visits[2];
    assert_eq!(first_check.exit, Some(Trigger::Sensor(SensorEvent::LeftStop)));
    assert_eq!(done.run.visits[3].entered_ns, 800_000_000);
    assert_eq!(done.run.visits[5].entered_ns, 1_800_000_000);
    assert_eq!(done.run.entered_at(StateId::PresentStim), Some(2_800_000_000));

    let resets = done
        .signals
        .iter()
        .filter(|m| **m == SignalMessage::ResetSensor)
        .count();
    assert_eq!(resets, 3);
    let outcome = plan(Side::Left).outcome(&done.run).unwrap();
    assert_eq!(outcome.stopping_failures, 1);
}

#[test]
fn wrong_side_enters_no_reward_and_keeps_valve_shut() {
    let config = config_with(|_| {});
    let done = run_trial(
        &config,
        &plan(Side::Right),
        vec![(Duration::from_secs(3), SensorEvent::StimulusReachedLeft)],
    );

    assert!(done.run.visited(StateId::StopOpenLoop(Side::Left)));
    let no_reward = done.run.entered_at(StateId::NoReward(Side::Left)).unwrap();
    assert_eq!(no_reward, 3_500_000_000);
    let inter = done.run.entered_at(StateId::InterTrial).unwrap();
    assert_eq!(inter - no_reward, 2 * SEC);
    assert!(!done.run.visited(StateId::Reward(Side::Left)));
    assert_eq!(done.valve.openings, 0);

    let outcome = plan(Side::Right).outcome(&done.run).unwrap();
    assert_eq!(outcome.branch, Branch::NoReward(Side::Left));
}

#[test]
fn correct_side_opens_valve_once_and_closes_it() {
    let config = config_with(|_| {});
    let done = run_trial(
        &config,
        &plan(Side::Left),
        vec![(Duration::from_secs(3), SensorEvent::StimulusReachedLeft)],
    );

    assert!(done.run.visited(StateId::Reward(Side::Left)));
    assert!(done.run.visited(StateId::RewardWaiting(Side::Left)));
    assert_eq!(done.valve.openings, 1);
    assert!(!done.valve.is_open);

    let reward = done.run.entered_at(StateId::Reward(Side::Left)).unwrap();
    let inter = done.run.entered_at(StateId::InterTrial).unwrap();
    let window = (inter - reward) as i64;
    assert!((window - 2 * SEC as i64).abs() <= 1_000, "reward window {window} ns");
    assert!(plan(Side::Left).outcome(&done.run).unwrap().rewarded);
}

#[test]
fn events_without_a_transition_are_discarded() {
    let config = config_with(|_| {});
    let done = run_trial(
        &config,
        &plan(Side::Right),
        vec![
            (Duration::from_millis(200), SensorEvent::RightStop),
            (Duration::from_millis(2600), SensorEvent::LeftStop),
            (Duration::from_secs(3), SensorEvent::StimulusReachedRight),
        ],
    );

    assert_eq!(done.run.count(StateId::WheelStoppingFailedPunish), 0);
    assert!(done.run.visited(StateId::Reward(Side::Right)));
    assert_eq!(done.unused_events, 0);
}

#[test]
fn signals_follow_state_order() {
    let config = config_with(|_| {});
    let codes = &config.softcodes;
    let done = run_trial(
        &config,
        &plan(Side::Right),
        vec![(Duration::from_secs(3), SensorEvent::StimulusReachedLeft)],
    );
    assert_eq!(
        done.signals,
        vec![
            SignalMessage::Softcode(codes.start_logging),
            SignalMessage::ResetSensor,
            SignalMessage::Softcode(codes.present_stimulus),
            SignalMessage::ResetSensor,
            SignalMessage::Softcode(codes.start_open_loop),
            SignalMessage::Softcode(codes.stop_open_loop),
            SignalMessage::Softcode(codes.hide_stimulus),
            SignalMessage::Softcode(codes.stop_logging),
        ]
    );
}
