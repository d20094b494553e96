pub mod config;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::CommandChannel;
use crate::error::{Error, Result};
use config::TimingConfig;
use state::ControllerState;

pub(crate) fn drivable(target: ControllerState) -> Result<()> {
    match target {
        ControllerState::NotReferenced
        | ControllerState::Configuration
        | ControllerState::Ready
        | ControllerState::Disable => Ok(()),
        other => Err(Error::UnsupportedTarget(other)),
    }
}

/// One addressed positioning unit on the shared bus. Axes are created by
/// [`crate::bus::Bus::new_axis`] and do all their I/O through the bus's
/// command channel; the transition lock admits one drive sequence at a time.
pub struct Axis {
    address: u8,
    channel: Arc<CommandChannel>,
    timing: TimingConfig,
    connected: AtomicBool,
    transition: Mutex<()>,
}

impl Axis {
    pub(crate) fn new(address: u8, channel: Arc<CommandChannel>, timing: TimingConfig) -> Self {
        Self {
            address,
            channel,
            timing,
            connected: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Sends an addressed command frame. Informational writes not modeled
    /// here (stage-database selection and the like) go through this.
    pub async fn write(&self, command: &str) -> Result<()> {
        self.channel.write(self.address, command).await
    }

    /// Addressed query for a two-letter mnemonic, returning the raw
    /// payload. Identity, firmware and stage reads are one-liners on top.
    pub async fn query(&self, mnemonic: &str) -> Result<String> {
        self.channel.query(self.address, mnemonic).await
    }

    /// Reads the operational state. Every failure, including an unmapped
    /// status code, comes back as `Unknown` rather than an error.
    pub async fn state(&self) -> ControllerState {
        match self.channel.query(self.address, "TS").await {
            Ok(payload) => match payload
                .len()
                .checked_sub(2)
                .and_then(|start| payload.get(start..))
            {
                Some(code) => ControllerState::from_code(code),
                None => ControllerState::Unknown,
            },
            Err(_) => ControllerState::Unknown,
        }
    }

    /// Drives the axis toward `target` on a background worker. With `wait`
    /// the caller joins the worker against the transition deadline; on
    /// expiry the worker is cancelled best-effort and keeps honoring the
    /// channel lock until it notices.
    pub async fn set_state(self: Arc<Self>, target: ControllerState, wait: bool) -> Result<()> {
        drivable(target)?;
        let cancel = CancellationToken::new();
        let worker = {
            let axis = self.clone();
            let token = cancel.clone();
            tokio::spawn(async move { axis.run_transition(target, token).await })
        };
        if !wait {
            return Ok(());
        }
        self.join_worker(worker, cancel, target).await
    }

    /// Applies the home-type setting, then drives to Ready. The
    /// connectivity flag only flips once the drive has succeeded, so a
    /// worker still fighting its way to Ready reads as not connected.
    pub async fn connect(
        self: Arc<Self>,
        home_is_hardware_defined: bool,
        wait: bool,
    ) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.clone()
            .set_home_is_hardware_defined(home_is_hardware_defined)
            .await?;

        let cancel = CancellationToken::new();
        let worker = {
            let axis = self.clone();
            let token = cancel.clone();
            tokio::spawn(async move {
                let result = axis.clone().run_transition(ControllerState::Ready, token).await;
                match &result {
                    Ok(()) => {
                        axis.connected.store(true, Ordering::SeqCst);
                        info!("Axis {} connected", axis.address);
                    }
                    Err(err) => warn!("Axis {} failed to connect: {}", axis.address, err),
                }
                result
            })
        };
        if !wait {
            return Ok(());
        }
        self.join_worker(worker, cancel, ControllerState::Ready).await
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn join_worker(
        &self,
        worker: JoinHandle<Result<()>>,
        cancel: CancellationToken,
        target: ControllerState,
    ) -> Result<()> {
        match tokio::time::timeout(self.timing.transition_deadline, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                cancel.cancel();
                Err(Error::StateTransitionTimeout(target))
            }
        }
    }

    async fn run_transition(
        self: Arc<Self>,
        target: ControllerState,
        cancel: CancellationToken,
    ) -> Result<()> {
        // One drive sequence per axis; the guard releases on every exit
        // path, cancellation included.
        let _guard = self.transition.lock().await;
        debug!("Axis {} driving toward {:?}", self.address, target);

        for _ in 0..self.timing.transition_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let current = self.state().await;
            if current == target {
                debug!("Axis {} reached {:?}", self.address, target);
                return Ok(());
            }
            self.step_toward(target, current, &cancel).await?;
            tokio::time::sleep(self.timing.settle).await;
        }
        warn!("Axis {} never reached {:?}", self.address, target);
        Err(Error::StateTransitionTimeout(target))
    }

    /// Issues the single device action that moves `current` one step
    /// closer to `target`; the caller re-reads the state afterwards.
    async fn step_toward(
        &self,
        target: ControllerState,
        current: ControllerState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match target {
            ControllerState::NotReferenced => self.reset_inner().await?,
            ControllerState::Configuration => {
                if current != ControllerState::NotReferenced {
                    self.reset_inner().await?;
                }
                self.write("PW1").await?;
            }
            ControllerState::Ready => match current {
                ControllerState::Configuration => self.write("PW0").await?,
                ControllerState::NotReferenced => self.home_inner(cancel).await?,
                ControllerState::Disable => self.write("MM1").await?,
                ControllerState::Homing | ControllerState::Moving | ControllerState::Jogging => {
                    tokio::time::sleep(self.timing.motion_settle).await;
                }
                _ => {}
            },
            ControllerState::Disable => self.write("MM0").await?,
            other => return Err(Error::UnsupportedTarget(other)),
        }
        Ok(())
    }

    /// Resets the controller and waits for it to report NotReferenced,
    /// resending within a bounded retry budget.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.reset_inner().await
    }

    async fn reset_inner(&self) -> Result<()> {
        for attempt in 0..=self.timing.reset_retries {
            if attempt > 0 {
                debug!("Axis {} reset attempt {}", self.address, attempt + 1);
            }
            self.write("RS").await?;
            let deadline = Instant::now() + self.timing.reset_timeout;
            while Instant::now() < deadline {
                tokio::time::sleep(self.timing.poll_interval).await;
                if self.state().await == ControllerState::NotReferenced {
                    return Ok(());
                }
            }
        }
        Err(Error::StateTransitionTimeout(ControllerState::NotReferenced))
    }

    /// Starts the home search. When waiting, the budget comes from the
    /// device's own home-search timeout; completion is the state leaving
    /// Homing/Moving, not any particular position.
    pub async fn go_home(&self, wait: bool) -> Result<()> {
        let _guard = self.transition.lock().await;
        if wait {
            self.home_inner(&CancellationToken::new()).await
        } else {
            self.write("OR").await
        }
    }

    async fn home_inner(&self, cancel: &CancellationToken) -> Result<()> {
        let budget = match self.home_search_timeout().await {
            Ok(secs) if secs > 0.0 => Duration::from_secs_f64(secs) + self.timing.home_margin,
            Ok(_) => self.timing.default_home_timeout,
            Err(err) => {
                debug!(
                    "Axis {}: home-search timeout unreadable ({}), using default",
                    self.address, err
                );
                self.timing.default_home_timeout
            }
        };
        self.write("OR").await?;
        let deadline = Instant::now() + budget;
        tokio::time::sleep(self.timing.poll_interval).await;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.state().await {
                ControllerState::Homing | ControllerState::Moving => {}
                _ => return Ok(()),
            }
            if Instant::now() >= deadline {
                return Err(Error::HomeTimeout);
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }

    /// Absolute move. With `validate` the target is checked against the
    /// device's travel limits first and nothing is written when it falls
    /// outside them.
    pub async fn go_to(&self, position: f64, wait: bool, validate: bool) -> Result<()> {
        if validate {
            let min = self.min_position().await?;
            let max = self.max_position().await?;
            if !(min..=max).contains(&position) {
                return Err(Error::OutOfRange { position, min, max });
            }
        }
        self.write(&format!("PA{}", position)).await?;
        if !wait {
            return Ok(());
        }
        let deadline = Instant::now() + self.timing.move_timeout;
        tokio::time::sleep(self.timing.poll_interval).await;
        while self.state().await == ControllerState::Moving {
            if Instant::now() >= deadline {
                return Err(Error::MoveTimeout);
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
        Ok(())
    }

    /// Decelerates and stops any move in progress.
    pub async fn stop(&self) -> Result<()> {
        self.write("ST").await
    }

    /// Current encoder position. In the Moving state this changes on every
    /// read; in Ready it sits at or very near the target.
    pub async fn position(&self) -> Result<f64> {
        self.query_f64("TP").await
    }

    pub async fn min_position(&self) -> Result<f64> {
        self.query_f64("SL").await
    }

    pub async fn max_position(&self) -> Result<f64> {
        self.query_f64("SR").await
    }

    pub async fn velocity(&self) -> Result<f64> {
        self.query_f64("VA").await
    }

    /// The device's configured home-search timeout, in seconds.
    pub async fn home_search_timeout(&self) -> Result<f64> {
        self.query_f64("OT").await
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        let payload = self.query("MM").await?;
        Ok(payload.trim_start().starts_with('1'))
    }

    pub async fn home_is_hardware_defined(&self) -> Result<bool> {
        let mut last = String::new();
        for _ in 0..self.timing.parse_retries {
            let payload = self.query("HT").await?;
            match payload.trim() {
                "1" => return Ok(false),
                "2" => return Ok(true),
                other => last = other.to_string(),
            }
            tokio::time::sleep(self.timing.parse_pause).await;
        }
        Err(Error::Parse {
            prefix: format!("{}HT", self.address),
            payload: last,
        })
    }

    /// Changing the home type requires Configuration mode, so this drives
    /// the axis there first. No-op when the setting already matches.
    pub async fn set_home_is_hardware_defined(self: Arc<Self>, value: bool) -> Result<()> {
        if self.home_is_hardware_defined().await? == value {
            return Ok(());
        }
        self.clone()
            .set_state(ControllerState::Configuration, true)
            .await?;
        self.write(if value { "HT2" } else { "HT1" }).await
    }

    /// Last error reported by the device's advisory error memory.
    pub async fn last_error(&self) -> Result<String> {
        self.channel.last_error(self.address).await
    }

    pub async fn check_error(&self) -> Result<()> {
        self.channel.check_error(self.address).await
    }

    async fn query_f64(&self, mnemonic: &str) -> Result<f64> {
        let mut last = String::new();
        for attempt in 1..=self.timing.parse_retries {
            let payload = self.query(mnemonic).await?;
            if let Some(value) = leading_float(&payload) {
                return Ok(value);
            }
            debug!(
                "Axis {}: non-numeric {:?} for {} (attempt {})",
                self.address, payload, mnemonic, attempt
            );
            last = payload;
            tokio::time::sleep(self.timing.parse_pause).await;
        }
        Err(Error::Parse {
            prefix: format!("{}{}", self.address, mnemonic),
            payload: last,
        })
    }
}

/// Parses the leading numeric part of a reply; trailing unit or status
/// text is tolerated.
fn leading_float(payload: &str) -> Option<f64> {
    let s = payload.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return None;
    }
    s[..end].parse().ok()
}
