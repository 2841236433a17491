use crate::error::ConfigError;
use crate::trial::round_hundredths;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use whex_core::{Signal, StimulusGeometry};

pub const WHEEL_DIAMETER_CM: f64 = 6.3;

/// User-editable settings as read from the settings file.
///
/// Every field the session cannot run without is optional here so that a
/// missing entry is reported as a [`ConfigError::Missing`] rather than a
/// parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub time_start: Option<f64>,
    pub time_wheel_stopping_check: Option<f64>,
    pub time_wheel_stopping_punish: Option<f64>,
    pub time_present_stim: Option<f64>,
    pub time_open_loop: Option<f64>,
    /// `[min, max]` of the randomized open-loop-fail punishment.
    pub time_open_loop_fail_punish: Option<[f64; 2]>,
    pub time_stim_freeze: Option<f64>,
    /// Valve open time plus the time the subject gets to drink.
    pub reward_time: Option<f64>,
    /// Falls back to `reward_time` when absent.
    pub no_reward_time: Option<f64>,
    pub inter_trial_time: Option<f64>,

    /// Reward volumes in ml.
    pub big_reward: Option<f64>,
    pub small_reward: Option<f64>,
    pub reward_size: RewardSize,
    pub last_calibration: Option<String>,

    /// Wheel thresholds in degrees:
    /// `[stimulus_left, stimulus_right, stop_left, stop_right]`.
    pub thresholds: Option<[f32; 4]>,
    pub stimulus: Option<StimulusGeometry>,

    pub trial_number: Option<usize>,
    pub blocks: Vec<BlockSpec>,
    pub softcodes: SoftcodeTable,

    pub animal_weight: Option<f64>,
    pub notes: Option<String>,
}

impl UserSettings {
    /// Settings a new rig starts from.
    pub fn template() -> Self {
        Self {
            time_start: Some(0.5),
            time_wheel_stopping_check: Some(1.0),
            time_wheel_stopping_punish: Some(1.0),
            time_present_stim: Some(1.0),
            time_open_loop: Some(10.0),
            time_open_loop_fail_punish: Some([2.0, 4.0]),
            time_stim_freeze: Some(0.5),
            reward_time: Some(2.0),
            no_reward_time: Some(2.0),
            inter_trial_time: Some(1.5),
            big_reward: Some(0.1),
            small_reward: Some(0.05),
            reward_size: RewardSize::Big,
            last_calibration: None,
            thresholds: Some([-90.0, 90.0, -1.0, 1.0]),
            stimulus: Some(StimulusGeometry::default()),
            trial_number: Some(100),
            blocks: Vec::new(),
            softcodes: SoftcodeTable::default(),
            animal_weight: None,
            notes: None,
        }
    }

    /// Runs exactly `trials` trials. Block lengths are drawn to sum to the
    /// trial count, so a fixed count replaces the configured blocks.
    pub fn override_trial_count(&mut self, trials: usize) {
        self.trial_number = Some(trials);
        self.blocks.clear();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardSize {
    #[default]
    Big,
    Small,
}

impl RewardSize {
    pub fn label(self) -> &'static str {
        match self {
            RewardSize::Big => "big",
            RewardSize::Small => "small",
        }
    }
}

/// A run of trials sharing one reward probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSpec {
    /// `[min, max]` trial count; the actual length is drawn once per session.
    pub trial_range: [usize; 2],
    /// Reward probability in percent.
    pub reward_probability: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub trials: usize,
    pub reward_probability: u8,
}

/// Softcode identifiers of the cross-component signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftcodeTable {
    pub present_stimulus: u8,
    pub start_open_loop: u8,
    pub stop_open_loop: u8,
    pub hide_stimulus: u8,
    pub start_logging: u8,
    pub stop_logging: u8,
}

impl Default for SoftcodeTable {
    fn default() -> Self {
        Self {
            present_stimulus: 1,
            start_open_loop: 2,
            stop_open_loop: 3,
            hide_stimulus: 4,
            start_logging: 5,
            stop_logging: 6,
        }
    }
}

impl SoftcodeTable {
    pub fn code(&self, signal: Signal) -> u8 {
        match signal {
            Signal::PresentStimulus => self.present_stimulus,
            Signal::StartOpenLoop => self.start_open_loop,
            Signal::StopOpenLoop => self.stop_open_loop,
            Signal::HideStimulus => self.hide_stimulus,
            Signal::StartLogging => self.start_logging,
            Signal::StopLogging => self.stop_logging,
        }
    }

    pub fn signal(&self, code: u8) -> Option<Signal> {
        Signal::ALL.into_iter().find(|s| self.code(*s) == code)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = Vec::with_capacity(Signal::ALL.len());
        for signal in Signal::ALL {
            let code = self.code(signal);
            if seen.contains(&code) {
                return Err(ConfigError::DuplicateSoftcode { code });
            }
            seen.push(code);
        }
        Ok(())
    }
}

/// State durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub start: f64,
    pub stopping_check: f64,
    pub stopping_punish: f64,
    pub stim_presentation: f64,
    pub open_loop: f64,
    pub open_loop_fail_punish: [f64; 2],
    pub freeze: f64,
    pub reward: f64,
    pub no_reward: f64,
    pub inter_trial: f64,
}

/// Longest state duration a timer can hold, in seconds.
pub const MAX_DURATION_S: f64 = u64::MAX as f64 / 1e9;

/// Converts a validated duration in seconds; out-of-range values saturate.
pub fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s.max(0.0)).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub big_reward_ml: f64,
    pub small_reward_ml: f64,
    pub size: RewardSize,
    pub open_time_big: f64,
    pub open_time_small: f64,
    pub waiting_big: f64,
    pub waiting_small: f64,
}

impl RewardConfig {
    pub fn open_time(&self, size: RewardSize) -> f64 {
        match size {
            RewardSize::Big => self.open_time_big,
            RewardSize::Small => self.open_time_small,
        }
    }

    pub fn waiting_time(&self, size: RewardSize) -> f64 {
        match size {
            RewardSize::Big => self.waiting_big,
            RewardSize::Small => self.waiting_small,
        }
    }
}

/// Wheel position boundaries in degrees; negative is left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub stim_reached_left: f32,
    pub stim_reached_right: f32,
    pub left_stop: f32,
    pub right_stop: f32,
}

impl Thresholds {
    pub fn from_array([stim_reached_left, stim_reached_right, left_stop, right_stop]: [f32; 4]) -> Self {
        Self {
            stim_reached_left,
            stim_reached_right,
            left_stop,
            right_stop,
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [
            self.stim_reached_left,
            self.stim_reached_right,
            self.left_stop,
            self.right_stop,
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("stim_reached_left", self.stim_reached_left),
            ("stim_reached_right", self.stim_reached_right),
            ("left_stop", self.left_stop),
            ("right_stop", self.right_stop),
        ];
        for (field, value) in named {
            if !value.is_finite() {
                return Err(ConfigError::Threshold {
                    field,
                    reason: format!("{value} is not a finite angle"),
                });
            }
        }
        if self.left_stop >= self.right_stop {
            return Err(ConfigError::Threshold {
                field: "left_stop",
                reason: "must lie left of right_stop".into(),
            });
        }
        if self.stim_reached_left >= self.left_stop {
            return Err(ConfigError::Threshold {
                field: "stim_reached_left",
                reason: "must lie outside the stopping band".into(),
            });
        }
        if self.stim_reached_right <= self.right_stop {
            return Err(ConfigError::Threshold {
                field: "stim_reached_right",
                reason: "must lie outside the stopping band".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub animal_weight: Option<f64>,
    pub notes: Option<String>,
    pub last_calibration: Option<String>,
}

/// Immutable per-session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub timings: Timings,
    pub reward: RewardConfig,
    pub thresholds: Thresholds,
    pub softcodes: SoftcodeTable,
    pub geometry: StimulusGeometry,
    pub blocks: Vec<Block>,
    pub trial_count: usize,
    pub wheel_diameter_cm: f64,
    pub subject: SubjectInfo,
}

/// Valve open time per reward volume.
///
/// Linear identity until a calibration curve is available.
pub fn compute_valve_times(big_reward: f64, small_reward: f64) -> (f64, f64) {
    (big_reward, small_reward)
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Missing(field))
}

fn duration(value: Option<f64>, field: &'static str) -> Result<f64, ConfigError> {
    let value = required(value, field)?;
    let representable = Duration::try_from_secs_f64(value)
        .is_ok_and(|d| u64::try_from(d.as_nanos()).is_ok());
    if !representable {
        return Err(ConfigError::InvalidDuration { field, value });
    }
    Ok(value)
}

/// Bound of a range that per-trial draws are rounded into.
fn hundredths(value: f64, field: &'static str) -> Result<f64, ConfigError> {
    if round_hundredths(value) != value {
        return Err(ConfigError::Resolution { field, value });
    }
    Ok(value)
}

fn amount(value: Option<f64>, field: &'static str) -> Result<f64, ConfigError> {
    let value = required(value, field)?;
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidAmount { field, value });
    }
    Ok(value)
}

impl SessionConfig {
    /// Validates user settings, fills defaults and computes derived values.
    ///
    /// `rng` draws the per-block trial counts.
    pub fn from_settings<R: Rng>(settings: &UserSettings, rng: &mut R) -> Result<Self, ConfigError> {
        let [punish_min, punish_max] = required(
            settings.time_open_loop_fail_punish,
            "time_open_loop_fail_punish",
        )?;
        let field = "time_open_loop_fail_punish";
        let punish_min = hundredths(duration(Some(punish_min), field)?, field)?;
        let punish_max = hundredths(duration(Some(punish_max), field)?, field)?;
        if punish_min > punish_max {
            return Err(ConfigError::InvertedRange {
                field: "time_open_loop_fail_punish",
                min: punish_min,
                max: punish_max,
            });
        }

        let reward_time = duration(settings.reward_time, "reward_time")?;
        let no_reward = match settings.no_reward_time {
            Some(v) => duration(Some(v), "no_reward_time")?,
            None => reward_time,
        };

        let timings = Timings {
            start: duration(settings.time_start, "time_start")?,
            stopping_check: duration(settings.time_wheel_stopping_check, "time_wheel_stopping_check")?,
            stopping_punish: duration(
                settings.time_wheel_stopping_punish,
                "time_wheel_stopping_punish",
            )?,
            stim_presentation: duration(settings.time_present_stim, "time_present_stim")?,
            open_loop: duration(settings.time_open_loop, "time_open_loop")?,
            open_loop_fail_punish: [punish_min, punish_max],
            freeze: duration(settings.time_stim_freeze, "time_stim_freeze")?,
            reward: reward_time,
            no_reward,
            inter_trial: duration(settings.inter_trial_time, "inter_trial_time")?,
        };

        let big = amount(settings.big_reward, "big_reward")?;
        let small = amount(settings.small_reward, "small_reward")?;
        let (open_time_big, open_time_small) = compute_valve_times(big, small);
        for (size, open_time) in [("big", open_time_big), ("small", open_time_small)] {
            if open_time > reward_time {
                return Err(ConfigError::RewardExceedsWindow {
                    size,
                    open_time,
                    reward_time,
                });
            }
        }
        let reward = RewardConfig {
            big_reward_ml: big,
            small_reward_ml: small,
            size: settings.reward_size,
            open_time_big,
            open_time_small,
            waiting_big: reward_time - open_time_big,
            waiting_small: reward_time - open_time_small,
        };

        let thresholds = Thresholds::from_array(required(settings.thresholds, "thresholds")?);
        thresholds.validate()?;
        settings.softcodes.validate()?;

        let blocks = draw_blocks(&settings.blocks, rng)?;
        let trial_count = if blocks.is_empty() {
            required(settings.trial_number, "trial_number")?
        } else {
            blocks.iter().map(|b| b.trials).sum()
        };
        if trial_count == 0 {
            return Err(ConfigError::NoTrials);
        }

        Ok(SessionConfig {
            timings,
            reward,
            thresholds,
            softcodes: settings.softcodes.clone(),
            geometry: settings.stimulus.clone().unwrap_or_default(),
            blocks,
            trial_count,
            wheel_diameter_cm: WHEEL_DIAMETER_CM,
            subject: SubjectInfo {
                animal_weight: settings.animal_weight,
                notes: settings.notes.clone(),
                last_calibration: settings.last_calibration.clone(),
            },
        })
    }

    /// Block the given trial index falls into.
    pub fn block_of(&self, trial: usize) -> Option<usize> {
        let mut end = 0;
        for (i, block) in self.blocks.iter().enumerate() {
            end += block.trials;
            if trial < end {
                return Some(i);
            }
        }
        None
    }
}

fn draw_blocks<R: Rng>(specs: &[BlockSpec], rng: &mut R) -> Result<Vec<Block>, ConfigError> {
    specs
        .iter()
        .map(|block| {
            let [min, max] = block.trial_range;
            if min > max {
                return Err(ConfigError::InvertedRange {
                    field: "blocks.trial_range",
                    min: min as f64,
                    max: max as f64,
                });
            }
            if block.reward_probability > 100 {
                return Err(ConfigError::Probability(block.reward_probability));
            }
            Ok(Block {
                trials: rng.random_range(min..=max),
                reward_probability: block.reward_probability,
            })
        })
        .collect()
}
