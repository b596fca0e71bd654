//! Operator action policy.
//!
//! Built once from the command line and the config file, then passed by
//! reference to the monitor and the workflows. Nothing mutates it afterwards.

use crate::analysis::Detection;
use crate::output::IgnoreList;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    /// Permit clean and mitigate side effects.
    pub active: bool,
    /// Additionally permit `mitigate` when active.
    pub mitigate: bool,
    /// Show repeat detections as duplicate-tagged lines.
    pub duplicates: bool,
    /// Event headers whose raw lines are not shown.
    pub ignore: IgnoreList,
}

impl Policy {
    /// Read-only policy: report, never act.
    pub fn passive() -> Self {
        Self::default()
    }

    pub fn may_clean(&self, det: &Detection) -> bool {
        self.active && !det.artifacts.is_empty()
    }

    pub fn may_mitigate(&self) -> bool {
        self.active && self.mitigate
    }

    /// Mitigation in response to a live detection also needs evidence.
    pub fn may_mitigate_for(&self, det: &Detection) -> bool {
        self.may_mitigate() && !det.artifacts.is_empty()
    }
}
