use crate::Side;
use std::fmt;

/// Named states of the per-trial protocol.
///
/// The side-specific states come from a single template parameterized by
/// the side the stimulus was moved to.
#[derive(Copy, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum StateId {
    #[default]
    Start,
    ResetBeforeStoppingCheck,
    WheelStoppingCheck,
    WheelStoppingFailedPunish,
    PresentStim,
    ResetBeforeOpenLoop,
    OpenLoop,
    OpenLoopFail,
    OpenLoopFailPunish,
    StopOpenLoop(Side),
    CheckReward(Side),
    Reward(Side),
    RewardWaiting(Side),
    NoReward(Side),
    InterTrial,
    End,
}

impl StateId {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StateId::End)
    }

    /// The side a state belongs to, if it is part of a reward subgraph.
    pub fn side(&self) -> Option<Side> {
        use StateId::*;
        match self {
            StopOpenLoop(s) | CheckReward(s) | Reward(s) | RewardWaiting(s) | NoReward(s) => {
                Some(*s)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        use StateId::*;
        let base = match self {
            Start => "start",
            ResetBeforeStoppingCheck => "reset_before_stopping_check",
            WheelStoppingCheck => "wheel_stopping_check",
            WheelStoppingFailedPunish => "wheel_stopping_failed_punish",
            PresentStim => "present_stim",
            ResetBeforeOpenLoop => "reset_before_open_loop",
            OpenLoop => "open_loop",
            OpenLoopFail => "open_loop_fail",
            OpenLoopFailPunish => "open_loop_fail_punish",
            StopOpenLoop(_) => "stop_open_loop",
            CheckReward(_) => "check_reward",
            Reward(_) => "reward",
            RewardWaiting(_) => "reward_waiting",
            NoReward(_) => "no_reward",
            InterTrial => "inter_trial",
            End => "end",
        };
        match self.side() {
            Some(side) => format!("{}_{}", base, side.label()),
            None => base.to_string(),
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
