use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serial line settings. The port name itself is chosen by the caller at
/// connect time; device discovery is not this crate's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Revision-dependent on the hardware side (56700 on older firmware).
    pub baud: u32,
    pub write_timeout: Duration,
    pub write_retries: u32,
    pub retry_pause: Duration,
    /// How long one read snapshot waits for already-buffered data.
    pub read_poll: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud: 57600,
            write_timeout: Duration::from_secs(2),
            write_retries: 2,
            retry_pause: Duration::from_millis(100),
            read_poll: Duration::from_millis(100),
        }
    }
}
