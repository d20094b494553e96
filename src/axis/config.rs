use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cadence and budget knobs for the per-axis state machine and the bulk
/// fan-out. Defaults follow the hardware's own pace: a 100 ms status poll
/// and a 300 ms settle for motion states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    pub poll_interval: Duration,
    /// Pause after each transition step before re-reading the state.
    pub settle: Duration,
    /// Wait used when a motion state just needs to run its course.
    pub motion_settle: Duration,
    pub transition_attempts: u32,
    /// Deadline a waiting caller holds against the transition worker.
    pub transition_deadline: Duration,
    pub reset_timeout: Duration,
    pub reset_retries: u32,
    /// Used when the device's own home-search timeout cannot be read.
    pub default_home_timeout: Duration,
    pub home_margin: Duration,
    pub move_timeout: Duration,
    pub parse_retries: u32,
    pub parse_pause: Duration,
    /// Deadline for bulk fan-out joins across all axes.
    pub aggregate_deadline: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            settle: Duration::from_millis(100),
            motion_settle: Duration::from_millis(300),
            transition_attempts: 50,
            transition_deadline: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(5),
            reset_retries: 3,
            default_home_timeout: Duration::from_secs(30),
            home_margin: Duration::from_secs(2),
            move_timeout: Duration::from_secs(120),
            parse_retries: 3,
            parse_pause: Duration::from_millis(100),
            aggregate_deadline: Duration::from_secs(120),
        }
    }
}
