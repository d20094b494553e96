pub mod config;

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::axis::{self, state::ControllerState, Axis};
use crate::channel::CommandChannel;
use crate::error::{Error, Result};
use crate::transport::{SerialTransport, Transport};
use config::BusConfig;

/// Highest controller address the bus protocol can carry.
pub const ADDRESS_MAX: u8 = 31;

/// Root controller for one physical bus: owns the command channel (and
/// through it the transport plus reply table) and every axis created on it.
/// Axes live exactly as long as the bus.
pub struct Bus {
    channel: Arc<CommandChannel>,
    axes: RwLock<Vec<Arc<Axis>>>,
    config: BusConfig,
}

impl Bus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            channel: Arc::new(CommandChannel::new(config.channel.clone())),
            axes: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Creates the axis at `address` and registers it with the bus. The
    /// address must be in range and not already taken; two axes sharing an
    /// address would silently answer each other's queries.
    pub async fn new_axis(&self, address: u8) -> Result<Arc<Axis>> {
        if address > ADDRESS_MAX {
            return Err(Error::InvalidAddress(address));
        }
        let mut axes = self.axes.write().await;
        if axes.iter().any(|axis| axis.address() == address) {
            return Err(Error::DuplicateAddress(address));
        }
        let axis = Arc::new(Axis::new(
            address,
            self.channel.clone(),
            self.config.timing.clone(),
        ));
        axes.push(axis.clone());
        Ok(axis)
    }

    pub async fn axes(&self) -> Vec<Arc<Axis>> {
        self.axes.read().await.clone()
    }

    pub async fn is_all_connected(&self) -> bool {
        self.axes.read().await.iter().all(|axis| axis.is_connected())
    }

    /// Opens the serial device and attaches it to the channel. A no-op when
    /// a transport is already attached.
    pub async fn open(&self, port_name: &str) -> Result<()> {
        if self.channel.is_attached().await {
            return Ok(());
        }
        let transport = SerialTransport::open(port_name, &self.config.port)?;
        self.channel.attach(Box::new(transport)).await;
        info!("Bus open on {}", port_name);
        Ok(())
    }

    /// Attaches an already-built transport instead of opening a serial
    /// device. Demos and tests drive the full stack this way.
    pub async fn open_with(&self, transport: Box<dyn Transport>) {
        self.channel.attach(transport).await;
    }

    /// Marks every axis disconnected and closes the transport. The axes
    /// stay registered but are unusable until the next open.
    pub async fn disconnect(&self) -> Result<()> {
        for axis in self.axes.read().await.iter() {
            axis.disconnect();
        }
        self.channel.detach().await
    }

    /// Address-less stop: every controller on the bus decelerates and
    /// halts whatever move is in progress.
    pub async fn abort(&self) -> Result<()> {
        self.channel.write_raw("ST").await
    }

    /// Opens the port and connects every known axis concurrently, one
    /// worker per axis. With `wait` the join is bounded by the aggregate
    /// deadline; stragglers are left running and their outcome shows in
    /// each axis's connectivity flag.
    pub async fn connect_all(
        &self,
        port_name: &str,
        home_is_hardware_defined: bool,
        wait: bool,
    ) -> Result<()> {
        self.open(port_name).await?;
        let axes = self.axes().await;
        info!("Connecting {} axes", axes.len());
        let workers = axes
            .into_iter()
            .map(|axis| {
                tokio::spawn(async move {
                    let address = axis.address();
                    let outcome = axis.connect(home_is_hardware_defined, true).await;
                    (address, outcome)
                })
            })
            .collect();
        self.join_fleet("connect_all", workers, wait).await
    }

    /// Drives every known axis toward `target` concurrently. Per-axis
    /// failures never cancel the siblings; partial outcomes are observable
    /// by re-reading each axis's state.
    pub async fn set_all_state(&self, target: ControllerState, wait: bool) -> Result<()> {
        axis::drivable(target)?;
        let axes = self.axes().await;
        let workers = axes
            .into_iter()
            .map(|axis| {
                tokio::spawn(async move {
                    let address = axis.address();
                    let outcome = axis.set_state(target, true).await;
                    (address, outcome)
                })
            })
            .collect();
        self.join_fleet("set_all_state", workers, wait).await
    }

    async fn join_fleet(
        &self,
        op: &'static str,
        workers: Vec<JoinHandle<(u8, Result<()>)>>,
        wait: bool,
    ) -> Result<()> {
        if !wait {
            return Ok(());
        }
        match tokio::time::timeout(self.config.timing.aggregate_deadline, join_all(workers)).await
        {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome {
                        Ok((_, Ok(()))) => {}
                        Ok((address, Err(err))) => {
                            warn!("{}: axis {} failed: {}", op, address, err);
                        }
                        Err(err) => warn!("{}: worker failed: {}", op, err),
                    }
                }
                Ok(())
            }
            // Stragglers keep running past the deadline; nothing forces
            // them off the channel lock.
            Err(_) => Err(Error::AggregateTimeout(op)),
        }
    }
}
