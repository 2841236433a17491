pub mod signal;
pub mod state;
pub mod stimulus;
pub mod trial;

pub use signal::{SensorEvent, Signal};
pub use state::StateId;
pub use stimulus::{Side, StimulusDisplay, StimulusGeometry};
pub use trial::{Branch, TrialOutcome};
