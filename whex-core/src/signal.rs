use serde::{Deserialize, Serialize};

/// Cross-component signals emitted by the trial executor as softcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    PresentStimulus,
    StartOpenLoop,
    StopOpenLoop,
    HideStimulus,
    StartLogging,
    StopLogging,
}

impl Signal {
    pub const ALL: [Signal; 6] = [
        Signal::PresentStimulus,
        Signal::StartOpenLoop,
        Signal::StopOpenLoop,
        Signal::HideStimulus,
        Signal::StartLogging,
        Signal::StopLogging,
    ];
}

/// Threshold crossings reported by the rotary encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorEvent {
    /// Wheel moved past the left "must stay still" boundary.
    LeftStop,
    /// Wheel moved past the right "must stay still" boundary.
    RightStop,
    /// Stimulus was turned all the way to the left target.
    StimulusReachedLeft,
    /// Stimulus was turned all the way to the right target.
    StimulusReachedRight,
}

impl SensorEvent {
    pub const ALL: [SensorEvent; 4] = [
        SensorEvent::LeftStop,
        SensorEvent::RightStop,
        SensorEvent::StimulusReachedLeft,
        SensorEvent::StimulusReachedRight,
    ];

    /// Event name as the encoder module reports it.
    pub fn wire_name(&self) -> &'static str {
        match self {
            SensorEvent::StimulusReachedRight => "RotaryEncoder1_1",
            SensorEvent::StimulusReachedLeft => "RotaryEncoder1_2",
            SensorEvent::RightStop => "RotaryEncoder1_3",
            SensorEvent::LeftStop => "RotaryEncoder1_4",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.wire_name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_names_decode_to_their_events() {
        assert_eq!(
            SensorEvent::from_wire_name("RotaryEncoder1_4"),
            Some(SensorEvent::LeftStop)
        );
        for event in SensorEvent::ALL {
            assert_eq!(SensorEvent::from_wire_name(event.wire_name()), Some(event));
        }
        assert_eq!(SensorEvent::from_wire_name("RotaryEncoder1_9"), None);
    }
}
