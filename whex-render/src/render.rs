use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, PixmapPaint, Transform};
use tracing::{debug, info, warn};
use whex_core::{Side, StimulusDisplay, StimulusGeometry};
use whex_timing::{CalibrationStats, HighPrecisionTimer, Timer};

const BACKGROUND: [u8; 4] = [0, 0, 0, 255];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot allocate a {width}x{height} canvas")]
    Canvas { width: u32, height: u32 },
    #[error("stimulus radius {0} px cannot be drawn")]
    Radius(f32),
    #[error("wheel reach must be a positive angle, got {0} degrees")]
    Reach(f32),
    #[error("failed to write snapshot {path}: {reason}")]
    Snapshot { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub clear: Duration,
    pub draw: Duration,
    pub total: Duration,
    pub dirty_count: usize,
}

/// What the stimulus is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StimulusMode {
    Hidden,
    /// Shown at the centre; wheel movement is ignored.
    Presented,
    /// Follows the wheel.
    OpenLoop,
    /// Shown at the last open-loop position.
    Frozen,
}

/// Pixel rectangle already clipped to the canvas, end-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

/// Off-screen renderer for the single moving stimulus.
///
/// Only the area the stimulus covered in the previous frame is cleared, so
/// a frame costs roughly two stimulus-sized blits regardless of screen size.
pub struct StimulusRenderer {
    geometry: StimulusGeometry,
    gain_px_per_deg: f32,
    canvas: Pixmap,
    stimulus: Pixmap,
    dirty: Vec<Region>,
    mode: StimulusMode,
    side: Option<Side>,
    position_deg: f32,
    offset_px: f32,
    timer: HighPrecisionTimer,
    frames: u64,
    last_stats: FrameStats,
}

impl StimulusRenderer {
    /// `reach_deg` is the wheel turn that carries the stimulus to
    /// `end_position_px`.
    pub fn new(geometry: StimulusGeometry, reach_deg: f32) -> Result<Self, RenderError> {
        if !(reach_deg.is_finite() && reach_deg > 0.0) {
            return Err(RenderError::Reach(reach_deg));
        }
        let (width, height) = (geometry.screen_width, geometry.screen_height);
        let mut canvas = Pixmap::new(width, height).ok_or(RenderError::Canvas { width, height })?;
        canvas.fill(Color::from_rgba8(
            BACKGROUND[0],
            BACKGROUND[1],
            BACKGROUND[2],
            BACKGROUND[3],
        ));
        let stimulus = circle_pixmap(geometry.radius_px, geometry.color)?;
        let gain_px_per_deg = geometry.end_position_px / reach_deg;
        debug!(width, height, gain_px_per_deg, "stimulus renderer ready");

        Ok(Self {
            geometry,
            gain_px_per_deg,
            canvas,
            stimulus,
            dirty: Vec::with_capacity(2),
            mode: StimulusMode::Hidden,
            side: None,
            position_deg: 0.0,
            offset_px: 0.0,
            timer: HighPrecisionTimer::new(),
            frames: 0,
            last_stats: FrameStats::default(),
        })
    }

    pub fn mode(&self) -> StimulusMode {
        self.mode
    }

    /// Side the current stimulus has to be turned to.
    pub fn presented_side(&self) -> Option<Side> {
        self.side
    }

    /// Horizontal displacement from the centre in pixels; negative is left.
    pub fn offset_px(&self) -> f32 {
        self.offset_px
    }

    /// Last wheel position received, in degrees.
    pub fn wheel_position_deg(&self) -> f32 {
        self.position_deg
    }

    pub fn gain_px_per_deg(&self) -> f32 {
        self.gain_px_per_deg
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    pub fn calibration_stats(&self) -> CalibrationStats {
        self.timer.calibration_stats()
    }

    pub fn canvas(&self) -> &Pixmap {
        &self.canvas
    }

    /// Straight RGBA of one canvas pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let px = self.canvas.pixel(x, y)?.demultiply();
        Some([px.red(), px.green(), px.blue(), px.alpha()])
    }

    /// Writes the last rendered frame as PNG.
    pub fn save_png(&self, path: &Path) -> Result<(), RenderError> {
        self.canvas
            .save_png(path)
            .map_err(|e| RenderError::Snapshot {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        info!(path = %path.display(), "frame snapshot written");
        Ok(())
    }

    /// Clears what the previous frame drew and draws the stimulus at its
    /// current position.
    pub fn render(&mut self) -> FrameStats {
        let start = self.timer.now();

        let old = std::mem::take(&mut self.dirty);
        for region in &old {
            self.clear_region(*region);
        }
        let clear = self.timer.elapsed(start);

        let draw_start = self.timer.now();
        if self.mode != StimulusMode::Hidden {
            self.blit_stimulus();
        }
        let draw = self.timer.elapsed(draw_start);

        let total = self.timer.elapsed(start);
        self.timer.record_frame(total);
        self.frames += 1;
        self.last_stats = FrameStats {
            clear,
            draw,
            total,
            dirty_count: old.len() + self.dirty.len(),
        };
        self.last_stats
    }

    fn stimulus_center(&self) -> (f32, f32) {
        let (cx, cy) = self.geometry.center();
        (cx + self.offset_px, cy)
    }

    fn clip(&self, x: i32, y: i32, w: u32, h: u32) -> Option<Region> {
        let (cw, ch) = (self.canvas.width() as i64, self.canvas.height() as i64);
        let x0 = i64::from(x).clamp(0, cw);
        let y0 = i64::from(y).clamp(0, ch);
        let x1 = (i64::from(x) + i64::from(w)).clamp(0, cw);
        let y1 = (i64::from(y) + i64::from(h)).clamp(0, ch);
        (x1 > x0 && y1 > y0).then_some(Region {
            x0: x0 as usize,
            y0: y0 as usize,
            x1: x1 as usize,
            y1: y1 as usize,
        })
    }

    fn clear_region(&mut self, region: Region) {
        let stride = self.canvas.width() as usize * 4;
        let data = self.canvas.data_mut();
        for y in region.y0..region.y1 {
            let row = &mut data[y * stride + region.x0 * 4..y * stride + region.x1 * 4];
            for px in row.chunks_exact_mut(4) {
                px.copy_from_slice(&BACKGROUND);
            }
        }
    }

    fn blit_stimulus(&mut self) {
        let (cx, cy) = self.stimulus_center();
        let (w, h) = (self.stimulus.width(), self.stimulus.height());
        let x = (cx - w as f32 * 0.5).floor() as i32;
        let y = (cy - h as f32 * 0.5).floor() as i32;
        let Some(region) = self.clip(x, y, w, h) else {
            return;
        };
        self.canvas.draw_pixmap(
            x,
            y,
            self.stimulus.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        self.dirty.push(region);
    }
}

fn circle_pixmap(radius: f32, color: [u8; 4]) -> Result<Pixmap, RenderError> {
    if !(radius.is_finite() && radius > 0.0) {
        return Err(RenderError::Radius(radius));
    }
    let side = (radius * 2.0).ceil() as u32 + 2;
    let mut pixmap = Pixmap::new(side, side).ok_or(RenderError::Radius(radius))?;
    let center = side as f32 / 2.0;
    let path = PathBuilder::from_circle(center, center, radius).ok_or(RenderError::Radius(radius))?;
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
    paint.anti_alias = true;
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    Ok(pixmap)
}

impl StimulusDisplay for StimulusRenderer {
    fn present_stimulus(&mut self, correct_side: Side) {
        debug!(side = correct_side.label(), "present stimulus");
        self.mode = StimulusMode::Presented;
        self.side = Some(correct_side);
        self.offset_px = 0.0;
    }

    fn start_open_loop(&mut self) {
        match self.mode {
            StimulusMode::Presented | StimulusMode::Frozen => {
                self.mode = StimulusMode::OpenLoop;
                self.position_deg = 0.0;
            }
            StimulusMode::OpenLoop => {}
            StimulusMode::Hidden => warn!("open loop requested without a stimulus"),
        }
    }

    fn stop_open_loop(&mut self) {
        if self.mode == StimulusMode::OpenLoop {
            self.mode = StimulusMode::Frozen;
            debug!(offset_px = self.offset_px, "stimulus frozen");
        }
    }

    fn hide_stimulus(&mut self) {
        self.mode = StimulusMode::Hidden;
        self.side = None;
    }

    fn update_position(&mut self, position_deg: f32) {
        self.position_deg = position_deg;
        if self.mode == StimulusMode::OpenLoop {
            let limit = self.geometry.end_position_px;
            self.offset_px = (position_deg * self.gain_px_per_deg).clamp(-limit, limit);
        }
    }

    fn render_frame(&mut self) {
        self.render();
    }

    fn displacement_px(&self) -> Option<f32> {
        (self.mode != StimulusMode::Hidden).then_some(self.offset_px)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> StimulusGeometry {
        StimulusGeometry {
            screen_width: 400,
            screen_height: 100,
            fps: 60,
            end_position_px: 180.0,
            radius_px: 10.0,
            color: [255, 255, 255, 255],
        }
    }

    fn renderer() -> StimulusRenderer {
        StimulusRenderer::new(geometry(), 90.0).unwrap()
    }

    const WHITE: [u8; 4] = [255, 255, 255, 255];

    #[test]
    fn hidden_stimulus_draws_nothing() {
        let mut r = renderer();
        r.render();
        assert_eq!(r.pixel(200, 50), Some(BACKGROUND));
        assert_eq!(r.last_stats().dirty_count, 0);
    }

    #[test]
    fn presented_stimulus_sits_at_centre_and_ignores_wheel() {
        let mut r = renderer();
        assert_eq!(r.displacement_px(), None);
        r.present_stimulus(Side::Left);
        r.update_position(45.0);
        r.render();
        assert_eq!(r.wheel_position_deg(), 45.0);
        assert_eq!(r.offset_px(), 0.0);
        assert_eq!(r.displacement_px(), Some(0.0));
        assert_eq!(r.pixel(200, 50), Some(WHITE));
        assert_eq!(r.presented_side(), Some(Side::Left));
    }

    #[test]
    fn open_loop_follows_wheel_and_clears_old_position() {
        let mut r = renderer();
        r.present_stimulus(Side::Right);
        r.render();
        r.start_open_loop();
        r.update_position(-45.0);
        r.render();

        assert_eq!(r.offset_px(), -90.0);
        assert_eq!(r.pixel(110, 50), Some(WHITE));
        assert_eq!(r.pixel(200, 50), Some(BACKGROUND));
        assert_eq!(r.last_stats().dirty_count, 2);
    }

    #[test]
    fn displacement_is_clamped_at_end_position() {
        let mut r = renderer();
        r.present_stimulus(Side::Right);
        r.start_open_loop();
        r.update_position(500.0);
        assert_eq!(r.offset_px(), 180.0);
        r.update_position(-500.0);
        assert_eq!(r.offset_px(), -180.0);
    }

    #[test]
    fn frozen_stimulus_keeps_its_place() {
        let mut r = renderer();
        r.present_stimulus(Side::Right);
        r.start_open_loop();
        r.update_position(30.0);
        r.stop_open_loop();
        r.update_position(-80.0);
        assert_eq!(r.mode(), StimulusMode::Frozen);
        assert_eq!(r.offset_px(), 60.0);
        assert_eq!(r.displacement_px(), Some(60.0));
        r.hide_stimulus();
        assert_eq!(r.displacement_px(), None);
    }

    #[test]
    fn hide_clears_on_next_frame() {
        let mut r = renderer();
        r.present_stimulus(Side::Left);
        r.render();
        r.hide_stimulus();
        r.render();
        assert_eq!(r.pixel(200, 50), Some(BACKGROUND));
        assert_eq!(r.frames(), 2);
        assert_eq!(r.calibration_stats().frames, 2);
    }

    #[test]
    fn open_loop_needs_a_visible_stimulus() {
        let mut r = renderer();
        r.start_open_loop();
        assert_eq!(r.mode(), StimulusMode::Hidden);
    }

    #[test]
    fn stimulus_past_the_edge_is_clipped() {
        let mut g = geometry();
        g.end_position_px = 250.0;
        let mut r = StimulusRenderer::new(g, 90.0).unwrap();
        r.present_stimulus(Side::Right);
        r.start_open_loop();
        r.update_position(90.0);
        r.render();
        assert_eq!(r.last_stats().dirty_count, 0);
    }

    #[test]
    fn invalid_reach_is_rejected() {
        assert!(matches!(
            StimulusRenderer::new(geometry(), 0.0),
            Err(RenderError::Reach(_))
        ));
    }

    #[test]
    fn snapshot_is_written() {
        let mut r = renderer();
        r.present_stimulus(Side::Left);
        r.render();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        r.save_png(&path).unwrap();
        assert!(path.exists());
    }
}
