pub mod config;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::correlator::ReplyCorrelator;
use crate::error::{Error, Result};
use crate::transport::Transport;
use config::ChannelConfig;

/// The addressed Write/Query primitive every axis shares. One channel-wide
/// lock covers each send-plus-correlate exchange, so two axes' frames never
/// interleave on the wire.
pub struct CommandChannel {
    io: Mutex<Option<Box<dyn Transport>>>,
    replies: ReplyCorrelator,
    config: ChannelConfig,
}

impl CommandChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            io: Mutex::new(None),
            replies: ReplyCorrelator::new(config.reply_capacity),
            config,
        }
    }

    pub async fn attach(&self, transport: Box<dyn Transport>) {
        let mut io = self.io.lock().await;
        if let Some(mut old) = io.replace(transport) {
            let _ = old.close().await;
        }
    }

    pub async fn detach(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        match io.take() {
            Some(mut transport) => transport.close().await,
            None => Ok(()),
        }
    }

    pub async fn is_attached(&self) -> bool {
        self.io.lock().await.is_some()
    }

    /// Sends `"{address}{command}"` as one frame.
    pub async fn write(&self, address: u8, command: &str) -> Result<()> {
        self.write_raw(&format!("{}{}", address, command)).await
    }

    /// Sends an address-less frame. The broadcast stop goes out this way.
    pub async fn write_raw(&self, frame: &str) -> Result<()> {
        let mut io = self.io.lock().await;
        let transport = io.as_mut().ok_or(Error::NotConnected)?;
        self.write_locked(transport.as_mut(), frame).await
    }

    async fn write_locked(&self, transport: &mut dyn Transport, frame: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            match transport.write_frame(frame).await {
                Ok(()) => return Ok(()),
                Err(Error::Closed) => return Err(Error::Closed),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.config.write_retries {
                        return Err(err);
                    }
                    warn!("Write {:?} failed ({}), retrying ({})", frame, err, attempt);
                    tokio::time::sleep(self.config.retry_pause).await;
                }
            }
        }
    }

    /// Sends `"{address}{mnemonic}?"` and waits for the echoed reply,
    /// resending up to the retry budget. The cached entry for the prefix is
    /// invalidated first so a stale reply can never satisfy this query.
    pub async fn query(&self, address: u8, mnemonic: &str) -> Result<String> {
        let prefix = format!("{}{}", address, mnemonic);
        let request = format!("{}?", prefix);

        let mut io = self.io.lock().await;
        let transport = io.as_mut().ok_or(Error::NotConnected)?;
        self.replies.invalidate(&prefix).await;

        let mut attempts = 0;
        while attempts < self.config.query_retries {
            attempts += 1;
            self.write_locked(transport.as_mut(), &request).await?;
            match self.wait_for(transport.as_mut(), &prefix).await {
                Ok(payload) => return Ok(payload),
                Err(Error::ReadTimeout { .. }) => {
                    debug!("No reply for {} on attempt {}", prefix, attempts);
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::QueryFailed { prefix, attempts })
    }

    async fn wait_for(&self, transport: &mut dyn Transport, prefix: &str) -> Result<String> {
        let deadline = Instant::now() + self.config.reply_timeout;
        loop {
            let lines = transport.read_available().await?;
            self.replies.ingest(lines).await;
            if let Some(payload) = self.replies.lookup(prefix).await {
                return Ok(payload);
            }
            if Instant::now() >= deadline {
                return Err(Error::ReadTimeout {
                    prefix: prefix.to_string(),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Reads the device's advisory error memory. Informational only; the
    /// transition drivers never consult it.
    pub async fn last_error(&self, address: u8) -> Result<String> {
        self.query(address, "TB").await
    }

    pub async fn check_error(&self, address: u8) -> Result<()> {
        let code = self.last_error(address).await?;
        if code.starts_with('0') {
            Ok(())
        } else {
            Err(Error::Protocol(code))
        }
    }
}
