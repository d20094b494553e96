use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Resend budget for an unanswered query.
    pub query_retries: u32,
    /// How long one query attempt waits for its correlated reply.
    pub reply_timeout: Duration,
    /// Pause between reply-table checks while waiting.
    pub poll_interval: Duration,
    /// Retry budget for a failed write, on top of the transport's own.
    pub write_retries: u32,
    pub retry_pause: Duration,
    /// Bound on the reply-correlation table.
    pub reply_capacity: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            query_retries: 3,
            reply_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            write_retries: 2,
            retry_pause: Duration::from_millis(100),
            reply_capacity: 256,
        }
    }
}
