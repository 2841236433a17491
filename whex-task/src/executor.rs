//! Trial executor port and a software implementation running on a [`Timer`].

use crate::error::{GraphError, HardwareError};
use crate::graph::{OutputAction, State, StateGraph, Trigger};
use crate::sensor::{SensorEvents, SensorMessage};
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::time::Duration;
use tracing::{debug, trace, warn};
use whex_core::{SensorEvent, StateId};
use whex_timing::{Timer, VirtualTimer};

/// Messages the executor emits on state entry for the rest of the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMessage {
    Softcode(u8),
    ResetSensor,
}

/// Fire-and-forget sending half of a trial's signal channel.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: SyncSender<SignalMessage>,
}

/// Bounded channel carrying one trial's signals.
pub fn signal_channel(depth: usize) -> (SignalSender, Receiver<SignalMessage>) {
    let (tx, rx) = sync_channel(depth);
    (SignalSender { tx }, rx)
}

impl SignalSender {
    /// Never blocks; a full queue drops the message.
    pub fn emit(&self, message: SignalMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(?message, "signal queue full, message dropped");
                false
            }
            Err(TrySendError::Disconnected(message)) => {
                debug!(?message, "no signal receiver");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateVisit {
    pub state: StateId,
    pub entered_ns: u64,
    /// What ended the visit; `None` for the terminal state.
    pub exit: Option<Trigger>,
}

/// Trace of one executed trial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialRun {
    pub visits: Vec<StateVisit>,
    pub started_ns: u64,
    pub ended_ns: u64,
}

impl TrialRun {
    pub fn visited(&self, state: StateId) -> bool {
        self.visits.iter().any(|v| v.state == state)
    }

    pub fn count(&self, state: StateId) -> usize {
        self.visits.iter().filter(|v| v.state == state).count()
    }

    /// Entry time of the first visit of `state`.
    pub fn entered_at(&self, state: StateId) -> Option<u64> {
        self.visits
            .iter()
            .find(|v| v.state == state)
            .map(|v| v.entered_ns)
    }

    pub fn path(&self) -> Vec<StateId> {
        self.visits.iter().map(|v| v.state).collect()
    }

    pub fn duration_ns(&self) -> u64 {
        self.ended_ns.saturating_sub(self.started_ns)
    }
}

/// Device that accepts a state graph and runs it to its terminal state.
pub trait TrialExecutor: Send {
    /// Transfers the graph; a rejected graph is a hardware failure.
    fn send_graph(&mut self, graph: StateGraph) -> Result<(), HardwareError>;
    /// Runs the last graph sent, blocking until its terminal state.
    fn run_graph(&mut self, signals: SignalSender) -> Result<TrialRun, HardwareError>;
}

/// Source of sensor events for a software executor.
pub trait EventSource: Send {
    /// Next event arriving no later than `deadline_ns`, or `None` once the
    /// deadline has passed.
    fn next_before(&mut self, deadline_ns: u64) -> Result<Option<SensorEvent>, HardwareError>;
}

/// Reward valve output.
pub trait Valve: Send {
    fn open(&mut self) -> Result<(), HardwareError>;
    fn close(&mut self) -> Result<(), HardwareError>;
}

/// Valve stand-in that only records what it was told.
#[derive(Debug, Clone, Default)]
pub struct LoggedValve {
    pub openings: u32,
    pub is_open: bool,
}

impl Valve for LoggedValve {
    fn open(&mut self) -> Result<(), HardwareError> {
        self.openings += 1;
        self.is_open = true;
        debug!(openings = self.openings, "valve open");
        Ok(())
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.is_open = false;
        debug!("valve closed");
        Ok(())
    }
}

/// Events delivered by the rotary encoder thread, timed against `timer`.
pub struct ChannelEvents<T: Timer<Timestamp = u64>> {
    events: SensorEvents,
    timer: T,
}

impl<T: Timer<Timestamp = u64>> ChannelEvents<T> {
    pub fn new(events: SensorEvents, timer: T) -> Self {
        Self { events, timer }
    }
}

impl<T: Timer<Timestamp = u64>> EventSource for ChannelEvents<T> {
    fn next_before(&mut self, deadline_ns: u64) -> Result<Option<SensorEvent>, HardwareError> {
        loop {
            let now = self.timer.now();
            if now >= deadline_ns {
                return Ok(None);
            }
            match self
                .events
                .recv_timeout(Duration::from_nanos(deadline_ns - now))
            {
                Ok(SensorMessage::Crossing(event)) => return Ok(Some(event)),
                Ok(SensorMessage::LoggingStopped) => continue,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(HardwareError::Disconnected {
                        device: "rotary encoder",
                    });
                }
            }
        }
    }
}

/// Pre-recorded events replayed on a [`VirtualTimer`].
///
/// Waiting advances the shared clock to the next event or to the deadline,
/// so a full trial runs without sleeping.
#[derive(Debug, Clone)]
pub struct ScriptedEvents {
    timer: VirtualTimer,
    script: VecDeque<(u64, SensorEvent)>,
}

impl ScriptedEvents {
    pub fn new(timer: VirtualTimer, script: impl IntoIterator<Item = (Duration, SensorEvent)>) -> Self {
        let mut script: Vec<(u64, SensorEvent)> = script
            .into_iter()
            .map(|(at, event)| (at.as_nanos() as u64, event))
            .collect();
        script.sort_by_key(|(at, _)| *at);
        Self {
            timer,
            script: script.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl EventSource for ScriptedEvents {
    fn next_before(&mut self, deadline_ns: u64) -> Result<Option<SensorEvent>, HardwareError> {
        match self.script.front() {
            Some(&(at, event)) if at <= deadline_ns => {
                self.script.pop_front();
                self.timer.advance_to(at);
                Ok(Some(event))
            }
            _ => {
                self.timer.advance_to(deadline_ns);
                Ok(None)
            }
        }
    }
}

/// Runs state graphs in software, using its own timer as the clock.
pub struct SoftwareExecutor<T, E, V> {
    timer: T,
    events: E,
    valve: V,
    pending: Option<StateGraph>,
}

impl<T, E, V> SoftwareExecutor<T, E, V>
where
    T: Timer<Timestamp = u64>,
    E: EventSource,
    V: Valve,
{
    pub fn new(timer: T, events: E, valve: V) -> Self {
        Self {
            timer,
            events,
            valve,
            pending: None,
        }
    }

    pub fn valve(&self) -> &V {
        &self.valve
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    fn enter(&mut self, state: &State, signals: &SignalSender) -> Result<(), HardwareError> {
        trace!(state = %state.id, timer_ms = state.timer.as_millis() as u64, "enter state");
        for output in &state.outputs {
            match output {
                OutputAction::Softcode(code) => {
                    signals.emit(SignalMessage::Softcode(*code));
                }
                OutputAction::ResetSensor => {
                    signals.emit(SignalMessage::ResetSensor);
                }
                OutputAction::OpenValve => self.valve.open()?,
            }
        }
        Ok(())
    }

    /// Waits for the first handled sensor event or the state timer.
    /// Events the state has no transition for are discarded.
    fn wait_transition(
        &mut self,
        state: &State,
        deadline_ns: u64,
    ) -> Result<(Trigger, StateId), HardwareError> {
        loop {
            match self.events.next_before(deadline_ns)? {
                Some(event) => {
                    let trigger = Trigger::Sensor(event);
                    if let Some(next) = state.target(trigger) {
                        return Ok((trigger, next));
                    }
                    trace!(?event, state = %state.id, "event ignored");
                }
                None => {
                    let next = state
                        .timeout_target()
                        .ok_or(GraphError::MissingTimeout(state.id))?;
                    return Ok((Trigger::Timeout, next));
                }
            }
        }
    }
}

impl<T, E, V> TrialExecutor for SoftwareExecutor<T, E, V>
where
    T: Timer<Timestamp = u64>,
    E: EventSource,
    V: Valve,
{
    fn send_graph(&mut self, graph: StateGraph) -> Result<(), HardwareError> {
        graph.validate()?;
        self.pending = Some(graph);
        Ok(())
    }

    fn run_graph(&mut self, signals: SignalSender) -> Result<TrialRun, HardwareError> {
        let graph = self.pending.take().ok_or(HardwareError::NotSubmitted)?;
        let mut current = graph
            .start()
            .ok_or(GraphError::MissingState(StateId::Start))?;
        let started_ns = self.timer.now();
        let mut visits = Vec::new();

        loop {
            let state = graph
                .state(current)
                .ok_or(GraphError::MissingState(current))?;
            let entered_ns = self.timer.now();
            self.enter(state, &signals)?;

            if state.id.is_terminal() {
                visits.push(StateVisit {
                    state: current,
                    entered_ns,
                    exit: None,
                });
                break;
            }

            let timer_ns = u64::try_from(state.timer.as_nanos()).unwrap_or(u64::MAX);
            let deadline_ns = entered_ns.saturating_add(timer_ns);
            let waited = self.wait_transition(state, deadline_ns);
            if state.opens_valve() {
                self.valve.close()?;
            }
            let (trigger, next) = waited?;
            visits.push(StateVisit {
                state: current,
                entered_ns,
                exit: Some(trigger),
            });
            current = next;
        }

        let run = TrialRun {
            visits,
            started_ns,
            ended_ns: self.timer.now(),
        };
        debug!(
            states = run.visits.len(),
            duration_ms = run.duration_ns() / 1_000_000,
            "state graph finished"
        );
        Ok(run)
    }
}
