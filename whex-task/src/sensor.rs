//! Rotary-position sensor port and a software rotary encoder.

use crate::config::Thresholds;
use crate::error::HardwareError;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{
    Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError, sync_channel,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use whex_core::SensorEvent;
use whex_timing::Timer;

/// One logged wheel position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub t_ns: u64,
    pub position_deg: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorMessage {
    Crossing(SensorEvent),
    /// Logging was disabled; ends the current event stream.
    LoggingStopped,
}

/// Receiving end of the threshold-crossing stream.
#[derive(Debug)]
pub struct SensorEvents {
    rx: Receiver<SensorMessage>,
}

impl SensorEvents {
    pub fn new(rx: Receiver<SensorMessage>) -> Self {
        Self { rx }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<SensorMessage, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

impl Iterator for SensorEvents {
    type Item = SensorEvent;

    /// Blocks for the next crossing; `None` once logging stops or the
    /// sensor goes away.
    fn next(&mut self) -> Option<SensorEvent> {
        match self.rx.recv() {
            Ok(SensorMessage::Crossing(event)) => Some(event),
            Ok(SensorMessage::LoggingStopped) | Err(_) => None,
        }
    }
}

/// Control surface of the rotary-position sensor.
pub trait PositionSensor {
    /// Zero the tracked position.
    fn reset(&mut self) -> Result<(), HardwareError>;
    fn configure_thresholds(&mut self, thresholds: Thresholds) -> Result<(), HardwareError>;
    /// Start recording positions and reporting crossings. Idempotent.
    fn enable_logging(&mut self) -> Result<(), HardwareError>;
    /// Idempotent.
    fn disable_logging(&mut self) -> Result<(), HardwareError>;
    /// Hands out the crossing stream; `None` once it has been taken.
    fn events(&mut self) -> Option<SensorEvents>;
    /// Drains the recorded position log.
    fn take_log(&mut self) -> Result<Vec<PositionSample>, HardwareError>;
}

/// Absolute wheel angle in degrees.
pub trait WheelSource: Send {
    fn read(&mut self) -> f32;
}

const DETECTION_ORDER: [SensorEvent; 4] = [
    SensorEvent::StimulusReachedLeft,
    SensorEvent::StimulusReachedRight,
    SensorEvent::LeftStop,
    SensorEvent::RightStop,
];

fn beyond(event: SensorEvent, boundary: f32, position: f32) -> bool {
    match event {
        SensorEvent::LeftStop | SensorEvent::StimulusReachedLeft => position <= boundary,
        SensorEvent::RightStop | SensorEvent::StimulusReachedRight => position >= boundary,
    }
}

/// Emits each boundary once per crossing; a boundary re-arms when the
/// position comes back inside it.
#[derive(Debug, Clone, Default)]
pub struct ThresholdDetector {
    thresholds: Option<Thresholds>,
    outside: [bool; 4],
}

impl ThresholdDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        let mut detector = Self::default();
        detector.configure(thresholds);
        detector
    }

    pub fn configure(&mut self, thresholds: Thresholds) {
        self.thresholds = Some(thresholds);
        self.rearm(0.0);
    }

    pub fn rearm(&mut self, position: f32) {
        let Some(thresholds) = self.thresholds else {
            return;
        };
        for (i, boundary) in thresholds.as_array().into_iter().enumerate() {
            self.outside[i] = beyond(DETECTION_ORDER[i], boundary, position);
        }
    }

    pub fn update(&mut self, position: f32) -> Vec<SensorEvent> {
        let Some(thresholds) = self.thresholds else {
            return Vec::new();
        };
        let mut crossed = Vec::new();
        for (i, boundary) in thresholds.as_array().into_iter().enumerate() {
            let event = DETECTION_ORDER[i];
            let now_outside = beyond(event, boundary, position);
            if now_outside && !self.outside[i] {
                crossed.push(event);
            }
            self.outside[i] = now_outside;
        }
        crossed
    }
}

enum Command {
    Reset,
    Configure(Thresholds),
    EnableLogging,
    DisableLogging,
    TakeLog(SyncSender<Vec<PositionSample>>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub sample_period: Duration,
    pub event_capacity: usize,
    pub position_capacity: usize,
    pub reply_timeout: Duration,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_millis(1),
            event_capacity: 64,
            position_capacity: 256,
            reply_timeout: Duration::from_secs(1),
        }
    }
}

/// Software rotary encoder sampling a [`WheelSource`] on its own thread.
pub struct RotaryEncoder<W, T> {
    source: W,
    timer: T,
    detector: ThresholdDetector,
    offset: f32,
    logging: bool,
    log: Vec<PositionSample>,
    events: SyncSender<SensorMessage>,
    positions: SyncSender<f32>,
}

impl<W, T> RotaryEncoder<W, T>
where
    W: WheelSource + 'static,
    T: Timer<Timestamp = u64> + 'static,
{
    /// Starts the sampling thread.
    ///
    /// Returns the control handle and the live position feed for the
    /// display.
    pub fn spawn(source: W, timer: T, settings: EncoderSettings) -> (EncoderHandle, Receiver<f32>) {
        let (events_tx, events_rx) = sync_channel(settings.event_capacity);
        let (positions_tx, positions_rx) = sync_channel(settings.position_capacity);
        let (commands_tx, commands_rx) = sync_channel(64);

        let encoder = RotaryEncoder {
            source,
            timer,
            detector: ThresholdDetector::default(),
            offset: 0.0,
            logging: false,
            log: Vec::new(),
            events: events_tx,
            positions: positions_tx,
        };
        let period = settings.sample_period;
        let thread = thread::spawn(move || encoder.run(commands_rx, period));

        let handle = EncoderHandle {
            commands: commands_tx,
            events: Some(SensorEvents::new(events_rx)),
            thread: Some(thread),
            reply_timeout: settings.reply_timeout,
        };
        (handle, positions_rx)
    }

    fn run(mut self, commands: Receiver<Command>, period: Duration) {
        debug!(period_us = period.as_micros() as u64, "rotary encoder started");
        loop {
            loop {
                match commands.try_recv() {
                    Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => {
                        debug!("rotary encoder stopped");
                        return;
                    }
                    Ok(command) => self.apply(command),
                    Err(TryRecvError::Empty) => break,
                }
            }
            self.sample();
            self.timer.sleep(period);
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Reset => {
                self.offset = self.source.read();
                self.detector.rearm(0.0);
            }
            Command::Configure(thresholds) => {
                info!(?thresholds, "thresholds configured");
                self.detector.configure(thresholds);
                let position = self.source.read() - self.offset;
                self.detector.rearm(position);
            }
            Command::EnableLogging => self.logging = true,
            Command::DisableLogging => {
                if self.logging {
                    self.logging = false;
                    self.send(SensorMessage::LoggingStopped);
                }
            }
            Command::TakeLog(reply) => {
                let _ = reply.send(std::mem::take(&mut self.log));
            }
            Command::Shutdown => {}
        }
    }

    fn sample(&mut self) {
        let position = self.source.read() - self.offset;
        let crossed = self.detector.update(position);
        if self.logging {
            self.log.push(PositionSample {
                t_ns: self.timer.now(),
                position_deg: position,
            });
            for event in crossed {
                debug!(event = event.wire_name(), position, "threshold crossed");
                self.send(SensorMessage::Crossing(event));
            }
        }
        // display takes the latest value; a full feed just skips a sample
        let _ = self.positions.try_send(position);
    }

    fn send(&self, message: SensorMessage) {
        if let Err(TrySendError::Full(message)) = self.events.try_send(message) {
            warn!(?message, "sensor event queue full, event dropped");
        }
    }
}

/// Handle to a running [`RotaryEncoder`]. Dropping it stops the thread.
pub struct EncoderHandle {
    commands: SyncSender<Command>,
    events: Option<SensorEvents>,
    thread: Option<JoinHandle<()>>,
    reply_timeout: Duration,
}

impl EncoderHandle {
    fn command(&self, command: Command) -> Result<(), HardwareError> {
        self.commands
            .send(command)
            .map_err(|_| HardwareError::Disconnected {
                device: "rotary encoder",
            })
    }
}

impl PositionSensor for EncoderHandle {
    fn reset(&mut self) -> Result<(), HardwareError> {
        self.command(Command::Reset)
    }

    fn configure_thresholds(&mut self, thresholds: Thresholds) -> Result<(), HardwareError> {
        self.command(Command::Configure(thresholds))
    }

    fn enable_logging(&mut self) -> Result<(), HardwareError> {
        self.command(Command::EnableLogging)
    }

    fn disable_logging(&mut self) -> Result<(), HardwareError> {
        self.command(Command::DisableLogging)
    }

    fn events(&mut self) -> Option<SensorEvents> {
        self.events.take()
    }

    fn take_log(&mut self) -> Result<Vec<PositionSample>, HardwareError> {
        let (tx, rx) = sync_channel(1);
        self.command(Command::TakeLog(tx))?;
        rx.recv_timeout(self.reply_timeout)
            .map_err(|_| HardwareError::Unresponsive {
                device: "rotary encoder",
                timeout_ms: self.reply_timeout.as_millis() as u64,
            })
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::DisableLogging);
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("rotary encoder thread panicked");
            }
        }
    }
}
