use crate::Side;
use serde::{Deserialize, Serialize};

/// Terminal branch a trial ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "side")]
pub enum Branch {
    /// Stimulus reached the correct side, the valve was opened.
    Reward(Side),
    /// Stimulus reached the wrong side.
    NoReward(Side),
    /// The open-loop window ran out before any target was reached.
    OpenLoopFail,
}

impl Branch {
    pub fn is_reward(&self) -> bool {
        matches!(self, Branch::Reward(_))
    }

    pub fn chosen_side(&self) -> Option<Side> {
        match self {
            Branch::Reward(s) | Branch::NoReward(s) => Some(*s),
            Branch::OpenLoopFail => None,
        }
    }
}

/// Recorded result per trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub trial_id: usize,
    pub correct_side: Side,
    pub rewarded: bool,
    /// Open-loop-fail punishment drawn for this trial, in seconds.
    pub punish_time_s: f64,
    pub branch: Branch,
    /// How many times the wheel-stopping check failed before the stimulus
    /// was presented.
    pub stopping_failures: u32,
    pub duration_ns: u64,
}
