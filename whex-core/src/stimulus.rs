use serde::{Deserialize, Serialize};

/// Side of the screen the stimulus has to be turned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Direction of travel on the screen and on the wheel axis.
    pub fn sign(self) -> f32 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// Screen layout of the moving stimulus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusGeometry {
    pub screen_width: u32,
    pub screen_height: u32,
    pub fps: u32,
    /// Displacement from the centre, in pixels, at which the stimulus has
    /// reached its target.
    pub end_position_px: f32,
    pub radius_px: f32,
    pub color: [u8; 4],
}

impl Default for StimulusGeometry {
    fn default() -> Self {
        Self {
            screen_width: 6144,
            screen_height: 1536,
            fps: 120,
            end_position_px: 2880.0,
            radius_px: 120.0,
            color: [255, 255, 255, 255],
        }
    }
}

impl StimulusGeometry {
    pub fn center(&self) -> (f32, f32) {
        (
            self.screen_width as f32 / 2.0,
            self.screen_height as f32 / 2.0,
        )
    }

    pub fn frame_period_ns(&self) -> u64 {
        1_000_000_000 / u64::from(self.fps.max(1))
    }
}

/// Receiver side of the display signals.
///
/// Every call is a fire-and-forget notification: implementations must not
/// block the caller on rendering work.
pub trait StimulusDisplay {
    /// Show the stimulus at its start position without letting it move.
    fn present_stimulus(&mut self, correct_side: Side);
    /// Start mapping live wheel position onto stimulus displacement.
    fn start_open_loop(&mut self);
    /// Freeze the displacement at its current value.
    fn stop_open_loop(&mut self);
    fn hide_stimulus(&mut self);
    /// Latest wheel position in degrees, relative to the last sensor reset.
    fn update_position(&mut self, position_deg: f32);
    /// Draw one frame.
    fn render_frame(&mut self);
    /// Horizontal displacement from the centre in pixels, `None` while
    /// nothing is shown.
    fn displacement_px(&self) -> Option<f32>;
}
