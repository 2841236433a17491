//! Per-trial state graph and the protocol template it is built from.

use crate::config::{SessionConfig, secs};
use crate::error::GraphError;
use crate::trial::TrialPlan;
use std::time::Duration;
use whex_core::{SensorEvent, Side, Signal, StateId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The state timer ran out.
    Timeout,
    Sensor(SensorEvent),
}

/// Actions performed when a state is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputAction {
    Softcode(u8),
    /// Zero the rotary encoder position.
    ResetSensor,
    /// Hold the reward valve open for as long as the state lasts.
    OpenValve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: StateId,
    pub timer: Duration,
    pub transitions: Vec<(Trigger, StateId)>,
    pub outputs: Vec<OutputAction>,
}

impl State {
    pub fn new(id: StateId, timer: Duration) -> Self {
        Self {
            id,
            timer,
            transitions: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn on(mut self, trigger: Trigger, target: StateId) -> Self {
        self.transitions.push((trigger, target));
        self
    }

    pub fn on_timeout(self, target: StateId) -> Self {
        self.on(Trigger::Timeout, target)
    }

    pub fn emit(mut self, output: OutputAction) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn target(&self, trigger: Trigger) -> Option<StateId> {
        self.transitions
            .iter()
            .find(|(t, _)| *t == trigger)
            .map(|(_, target)| *target)
    }

    pub fn timeout_target(&self) -> Option<StateId> {
        self.target(Trigger::Timeout)
    }

    pub fn opens_valve(&self) -> bool {
        self.outputs.contains(&OutputAction::OpenValve)
    }
}

/// Directed graph of named states; the first state added is the entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateGraph {
    states: Vec<State>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self, state: State) {
        self.states.push(state);
    }

    pub fn start(&self) -> Option<StateId> {
        self.states.first().map(|s| s.id)
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.iter().find(|s| s.id == id)
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.state(id).is_some()
    }

    /// Checks the structure a trial needs to always make progress: every
    /// non-terminal state has exactly one timeout transition, and every
    /// transition points at a defined state.
    pub fn validate(&self) -> Result<(), GraphError> {
        for required in [StateId::Start, StateId::End] {
            if !self.contains(required) {
                return Err(GraphError::MissingState(required));
            }
        }
        for (i, state) in self.states.iter().enumerate() {
            if self.states[..i].iter().any(|s| s.id == state.id) {
                return Err(GraphError::DuplicateState(state.id));
            }
            for (_, to) in &state.transitions {
                if !self.contains(*to) {
                    return Err(GraphError::UnknownTarget {
                        from: state.id,
                        to: *to,
                    });
                }
            }
            if state.id.is_terminal() {
                if !state.transitions.is_empty() {
                    return Err(GraphError::TerminalWithExit(state.id));
                }
                continue;
            }
            match state
                .transitions
                .iter()
                .filter(|(t, _)| *t == Trigger::Timeout)
                .count()
            {
                0 => return Err(GraphError::MissingTimeout(state.id)),
                1 => {}
                _ => return Err(GraphError::AmbiguousTimeout(state.id)),
            }
        }
        Ok(())
    }
}

/// What happens after the stimulus was turned to `side`, decided before the
/// graph is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RewardBranch {
    Reward { open_time: f64, waiting: f64 },
    NoReward { wait: f64 },
}

pub fn reward_branch(config: &SessionConfig, plan: &TrialPlan, side: Side) -> RewardBranch {
    if side == plan.correct_side {
        let size = config.reward.size;
        RewardBranch::Reward {
            open_time: config.reward.open_time(size),
            waiting: config.reward.waiting_time(size),
        }
    } else {
        RewardBranch::NoReward {
            wait: config.timings.no_reward,
        }
    }
}

/// Builds the protocol graph for one trial.
pub fn build_graph(config: &SessionConfig, plan: &TrialPlan) -> StateGraph {
    use StateId::*;

    let t = &config.timings;
    let softcode = |signal: Signal| OutputAction::Softcode(config.softcodes.code(signal));
    let mut graph = StateGraph::new();

    graph.add_state(
        State::new(Start, secs(t.start))
            .on_timeout(ResetBeforeStoppingCheck)
            .emit(softcode(Signal::StartLogging)),
    );

    // wheel has to stay still before anything is shown
    graph.add_state(
        State::new(ResetBeforeStoppingCheck, Duration::ZERO)
            .on_timeout(WheelStoppingCheck)
            .emit(OutputAction::ResetSensor),
    );
    graph.add_state(
        State::new(WheelStoppingCheck, secs(t.stopping_check))
            .on_timeout(PresentStim)
            .on(
                Trigger::Sensor(SensorEvent::LeftStop),
                WheelStoppingFailedPunish,
            )
            .on(
                Trigger::Sensor(SensorEvent::RightStop),
                WheelStoppingFailedPunish,
            ),
    );
    graph.add_state(
        State::new(WheelStoppingFailedPunish, secs(t.stopping_punish))
            .on_timeout(ResetBeforeStoppingCheck),
    );

    // open loop
    graph.add_state(
        State::new(PresentStim, secs(t.stim_presentation))
            .on_timeout(ResetBeforeOpenLoop)
            .emit(softcode(Signal::PresentStimulus)),
    );
    graph.add_state(
        State::new(ResetBeforeOpenLoop, Duration::ZERO)
            .on_timeout(OpenLoop)
            .emit(OutputAction::ResetSensor),
    );
    graph.add_state(
        State::new(OpenLoop, secs(t.open_loop))
            .on_timeout(OpenLoopFail)
            .on(
                Trigger::Sensor(SensorEvent::StimulusReachedLeft),
                StopOpenLoop(Side::Left),
            )
            .on(
                Trigger::Sensor(SensorEvent::StimulusReachedRight),
                StopOpenLoop(Side::Right),
            )
            .emit(softcode(Signal::StartOpenLoop)),
    );
    graph.add_state(
        State::new(OpenLoopFail, Duration::ZERO)
            .on_timeout(OpenLoopFailPunish)
            .emit(softcode(Signal::StopOpenLoop)),
    );
    graph.add_state(
        State::new(OpenLoopFailPunish, secs(plan.punish_time_s))
            .on_timeout(InterTrial)
            .emit(softcode(Signal::HideStimulus)),
    );

    for side in Side::BOTH {
        add_side_subgraph(&mut graph, config, side, reward_branch(config, plan, side));
    }

    graph.add_state(State::new(InterTrial, secs(t.inter_trial)).on_timeout(End));
    graph.add_state(State::new(End, Duration::ZERO).emit(softcode(Signal::StopLogging)));

    graph
}

fn add_side_subgraph(
    graph: &mut StateGraph,
    config: &SessionConfig,
    side: Side,
    branch: RewardBranch,
) {
    use StateId::*;

    let hide = OutputAction::Softcode(config.softcodes.code(Signal::HideStimulus));
    graph.add_state(
        State::new(StopOpenLoop(side), secs(config.timings.freeze))
            .on_timeout(CheckReward(side))
            .emit(OutputAction::Softcode(
                config.softcodes.code(Signal::StopOpenLoop),
            )),
    );
    match branch {
        RewardBranch::Reward { open_time, waiting } => {
            graph.add_state(State::new(CheckReward(side), Duration::ZERO).on_timeout(Reward(side)));
            graph.add_state(
                State::new(Reward(side), secs(open_time))
                    .on_timeout(RewardWaiting(side))
                    .emit(hide)
                    .emit(OutputAction::OpenValve),
            );
            graph.add_state(State::new(RewardWaiting(side), secs(waiting)).on_timeout(InterTrial));
        }
        RewardBranch::NoReward { wait } => {
            graph.add_state(
                State::new(CheckReward(side), Duration::ZERO).on_timeout(NoReward(side)),
            );
            graph.add_state(
                State::new(NoReward(side), secs(wait))
                    .on_timeout(InterTrial)
                    .emit(hide),
            );
        }
    }
}
