use std::path::PathBuf;
use thiserror::Error;
use whex_core::StateId;

/// Missing or invalid configuration. Fatal: the session does not start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting `{0}` is missing")]
    Missing(&'static str),
    #[error("setting `{field}` must be a non-negative duration a timer can hold, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("setting `{field}` must be given in whole hundredths of a second, got {value}")]
    Resolution { field: &'static str, value: f64 },
    #[error("setting `{field}` must be a finite, non-negative amount, got {value}")]
    InvalidAmount { field: &'static str, value: f64 },
    #[error("range `{field}` is inverted: min {min} > max {max}")]
    InvertedRange {
        field: &'static str,
        min: f64,
        max: f64,
    },
    #[error("{size} reward valve open time {open_time}s exceeds the reward window {reward_time}s")]
    RewardExceedsWindow {
        size: &'static str,
        open_time: f64,
        reward_time: f64,
    },
    #[error("threshold `{field}` is invalid: {reason}")]
    Threshold { field: &'static str, reason: String },
    #[error("softcode {code} is assigned to more than one signal")]
    DuplicateSoftcode { code: u8 },
    #[error("reward probability {0} is outside 0..=100")]
    Probability(u8),
    #[error("the session has no trials")]
    NoTrials,
    #[error("failed to read settings from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings")]
    Parse(#[from] serde_json::Error),
}

/// A graph was rejected or the link to a device failed. Fatal to the trial.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("state graph rejected: {0}")]
    Rejected(#[from] GraphError),
    #[error("no state graph has been sent")]
    NotSubmitted,
    #[error("{device} link disconnected")]
    Disconnected { device: &'static str },
    #[error("{device} did not answer within {timeout_ms} ms")]
    Unresponsive {
        device: &'static str,
        timeout_ms: u64,
    },
    #[error("{device} failed: {reason}")]
    Device {
        device: &'static str,
        reason: String,
    },
    #[error("trial executor panicked")]
    ExecutorPanicked,
}

/// Structural problems found when validating a state graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("state `{0}` is defined twice")]
    DuplicateState(StateId),
    #[error("state `{from}` transitions to undefined state `{to}`")]
    UnknownTarget { from: StateId, to: StateId },
    #[error("non-terminal state `{0}` has no timeout transition")]
    MissingTimeout(StateId),
    #[error("state `{0}` has more than one timeout transition")]
    AmbiguousTimeout(StateId),
    #[error("terminal state `{0}` must not have transitions")]
    TerminalWithExit(StateId),
    #[error("graph has no `{0}` state")]
    MissingState(StateId),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("session record I/O failed at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session record is not valid JSON")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("trial {trial} aborted the session")]
    Hardware {
        trial: usize,
        #[source]
        source: HardwareError,
    },
    #[error("sensor setup failed")]
    Setup(#[source] HardwareError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}
