use crate::config::SessionConfig;
use crate::executor::TrialRun;
use rand::Rng;
use serde::{Deserialize, Serialize};
use whex_core::{Branch, Side, StateId, TrialOutcome};

/// Outcome-determining parameters drawn before a trial's graph is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialPlan {
    pub trial_id: usize,
    pub correct_side: Side,
    pub punish_time_s: f64,
}

pub fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl TrialPlan {
    /// Unbiased coin flip for the side, uniform punishment time rounded to
    /// hundredths of a second and kept inside the configured range.
    pub fn draw<R: Rng>(trial_id: usize, config: &SessionConfig, rng: &mut R) -> Self {
        let correct_side = if rng.random_bool(0.5) {
            Side::Right
        } else {
            Side::Left
        };
        let [min, max] = config.timings.open_loop_fail_punish;
        let punish_time_s = round_hundredths(rng.random_range(min..=max)).clamp(min, max);
        Self {
            trial_id,
            correct_side,
            punish_time_s,
        }
    }

    /// Summarizes a finished run of this plan's graph.
    ///
    /// Returns `None` when the run never reached one of the trial branches.
    pub fn outcome(&self, run: &TrialRun) -> Option<TrialOutcome> {
        let branch = run.visits.iter().find_map(|visit| match visit.state {
            StateId::Reward(side) => Some(Branch::Reward(side)),
            StateId::NoReward(side) => Some(Branch::NoReward(side)),
            StateId::OpenLoopFailPunish => Some(Branch::OpenLoopFail),
            _ => None,
        })?;
        Some(TrialOutcome {
            trial_id: self.trial_id,
            correct_side: self.correct_side,
            rewarded: branch.is_reward(),
            punish_time_s: self.punish_time_s,
            branch,
            stopping_failures: run.count(StateId::WheelStoppingFailedPunish) as u32,
            duration_ns: run.duration_ns(),
        })
    }
}
