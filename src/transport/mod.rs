pub mod config;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use config::PortConfig;

/// Replies are short echo lines; anything longer is line noise.
const MAX_LINE_LEN: usize = 256;

pub trait SerialIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialIo for T {}

/// One physical channel shared by every axis on the bus. Implementations
/// frame outgoing commands and split inbound bytes into discrete lines;
/// correlation happens a layer up.
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn write_frame(&mut self, frame: &str) -> Result<()>;

    /// Non-blocking snapshot: drains whatever is already buffered within a
    /// short poll window and returns the complete non-empty lines. Never
    /// waits for a specific reply.
    async fn read_available(&mut self) -> Result<Vec<String>>;

    async fn close(&mut self) -> Result<()>;
}

pub struct SerialTransport {
    framed: Option<Framed<Box<dyn SerialIo>, LinesCodec>>,
    config: PortConfig,
}

impl SerialTransport {
    /// Opens the serial device at 8N1 with DTR driven low, so the open
    /// itself cannot pulse a device reset.
    pub fn open(port_name: &str, config: &PortConfig) -> Result<Self> {
        let mut stream = tokio_serial::new(port_name, config.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;
        stream.write_data_terminal_ready(false)?;

        debug!("Opened serial port {} at {} baud", port_name, config.baud);
        Ok(Self::over(Box::new(stream), config.clone()))
    }

    /// Wraps any async byte stream. Tests and demos run the full framing
    /// stack over an in-memory duplex this way.
    pub fn over(io: Box<dyn SerialIo>, config: PortConfig) -> Self {
        Self {
            framed: Some(Framed::new(io, LinesCodec::new_with_max_length(MAX_LINE_LEN))),
            config,
        }
    }
}

#[async_trait::async_trait]
impl Transport for SerialTransport {
    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        let framed = self.framed.as_mut().ok_or(Error::Closed)?;
        let bytes = format!("{}\r\n", frame);

        let mut attempt = 0;
        loop {
            let write = async {
                let io = framed.get_mut();
                io.write_all(bytes.as_bytes()).await?;
                io.flush().await
            };
            match timeout(self.config.write_timeout, write).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => return Err(Error::Transport(err.to_string())),
                Err(_) => {
                    attempt += 1;
                    if attempt > self.config.write_retries {
                        return Err(Error::Transport(format!(
                            "write of {:?} timed out after {} attempts",
                            frame, attempt
                        )));
                    }
                    warn!("Write timeout for {:?}, retrying ({})", frame, attempt);
                    tokio::time::sleep(self.config.retry_pause).await;
                }
            }
        }
    }

    async fn read_available(&mut self) -> Result<Vec<String>> {
        let framed = self.framed.as_mut().ok_or(Error::Closed)?;
        let mut lines = Vec::new();
        loop {
            match timeout(self.config.read_poll, framed.next()).await {
                Ok(Some(Ok(line))) => {
                    // The codec splits on LF; a bare CR inside a line still
                    // separates replies.
                    for part in line.split('\r') {
                        if !part.is_empty() {
                            lines.push(part.to_string());
                        }
                    }
                }
                Ok(Some(Err(err))) => return Err(Error::Transport(err.to_string())),
                Ok(None) => break,
                Err(_) => break,
            }
        }
        Ok(lines)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(framed) = self.framed.take() {
            let mut io = framed.into_inner();
            let _ = io.shutdown().await;
        }
        Ok(())
    }
}
