pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod sensor;
pub mod session;
pub mod store;
pub mod trial;

pub use config::{SessionConfig, Thresholds, UserSettings};
pub use error::{ConfigError, GraphError, HardwareError, PersistError, SessionError};
pub use executor::{
    ChannelEvents, LoggedValve, ScriptedEvents, SignalMessage, SoftwareExecutor, TrialExecutor,
    TrialRun,
};
pub use graph::{StateGraph, build_graph};
pub use sensor::{EncoderHandle, EncoderSettings, PositionSensor, RotaryEncoder, WheelSource};
pub use session::SessionLoop;
pub use store::{ParameterStore, SessionRecord, SessionResult, StimulusSample, StimulusTrace};
pub use trial::TrialPlan;
