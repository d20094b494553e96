//! Scripted multi-axis device used by the unit tests. Speaks the echoed
//! request/reply protocol directly behind the `Transport` trait; motion
//! completes after a fixed number of status polls so tests stay
//! deterministic without real sleeps.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::axis::config::TimingConfig;
use crate::axis::state::ControllerState;
use crate::bus::{config::BusConfig, Bus};
use crate::channel::config::ChannelConfig;
use crate::error::{Error, Result};
use crate::transport::Transport;

pub(crate) type SimHandle = Arc<Mutex<SimState>>;

pub(crate) struct SimAxis {
    pub code: String,
    pub position: f64,
    pub min: f64,
    pub max: f64,
    pub home_type: char,
    pub velocity: f64,
    pub home_timeout_s: f64,
    pub motion_ticks: u32,
    /// Never answers queries.
    pub silent: bool,
    /// Ignores every command; queries still answer.
    pub sticky: bool,
    /// Scripted per-mnemonic payloads, consumed before the defaults.
    pub overrides: HashMap<String, VecDeque<String>>,
}

impl SimAxis {
    fn new() -> Self {
        Self {
            code: "0A".to_string(),
            position: 0.0,
            min: -5.0,
            max: 25.0,
            home_type: '1',
            velocity: 1.5,
            home_timeout_s: 1.0,
            motion_ticks: 0,
            silent: false,
            sticky: false,
            overrides: HashMap::new(),
        }
    }

    fn group(&self) -> ControllerState {
        ControllerState::from_code(&self.code)
    }

    fn tick(&mut self) {
        if self.motion_ticks > 0 {
            self.motion_ticks -= 1;
            if self.motion_ticks == 0 {
                self.code = "32".to_string();
            }
        }
    }
}

struct Pending {
    line: String,
    delay: u32,
}

pub(crate) struct SimState {
    pub axes: HashMap<u8, SimAxis>,
    /// Every frame written to the wire, in order.
    pub frames: Vec<String>,
    /// Read passes a reply sits out before becoming visible.
    pub reply_delay: u32,
    pub closed: bool,
    outbox: VecDeque<Pending>,
}

impl SimState {
    pub fn axis_mut(&mut self, address: u8) -> &mut SimAxis {
        self.axes.get_mut(&address).expect("axis not simulated")
    }

    fn push_reply(&mut self, line: String) {
        let delay = self.reply_delay;
        self.outbox.push_back(Pending { line, delay });
    }

    fn on_frame(&mut self, frame: &str) {
        self.frames.push(frame.to_string());

        let digits = frame.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            // Address-less broadcast; only the safety stop is modeled.
            if frame == "ST" {
                for axis in self.axes.values_mut() {
                    if axis.group().is_motion() {
                        axis.code = "32".to_string();
                        axis.motion_ticks = 0;
                    }
                }
            }
            return;
        }
        let Ok(address) = frame[..digits].parse::<u8>() else {
            return;
        };
        let body = &frame[digits..];

        if let Some(request) = body.strip_suffix('?') {
            let line = {
                let Some(axis) = self.axes.get_mut(&address) else {
                    return;
                };
                if axis.silent {
                    return;
                }
                if let Some(payload) =
                    axis.overrides.get_mut(request).and_then(|q| q.pop_front())
                {
                    Some(format!("{}{}{}", address, request, payload))
                } else {
                    let payload = match request {
                        "TS" => {
                            let code = axis.code.clone();
                            axis.tick();
                            Some(format!("0000{}", code))
                        }
                        "TP" => Some(axis.position.to_string()),
                        "SL" => Some(axis.min.to_string()),
                        "SR" => Some(axis.max.to_string()),
                        "VA" => Some(axis.velocity.to_string()),
                        "OT" => Some(axis.home_timeout_s.to_string()),
                        "HT" => Some(axis.home_type.to_string()),
                        "MM" => Some(
                            if axis.group() == ControllerState::Disable { "0" } else { "1" }
                                .to_string(),
                        ),
                        "TB" => Some("0".to_string()),
                        _ => None,
                    };
                    payload.map(|p| format!("{}{}{}", address, request, p))
                }
            };
            if let Some(line) = line {
                self.push_reply(line);
            }
        } else {
            let Some(axis) = self.axes.get_mut(&address) else {
                return;
            };
            if axis.sticky || body.len() < 2 {
                return;
            }
            let (mnemonic, arg) = body.split_at(2);
            match mnemonic {
                "RS" => {
                    axis.code = "0A".to_string();
                    axis.motion_ticks = 0;
                }
                "PW" => match arg {
                    "1" if axis.group() == ControllerState::NotReferenced => {
                        axis.code = "14".to_string();
                    }
                    "0" if axis.group() == ControllerState::Configuration => {
                        axis.code = "0A".to_string();
                    }
                    _ => {}
                },
                "MM" => match arg {
                    "0" if axis.group() == ControllerState::Ready => {
                        axis.code = "3C".to_string();
                    }
                    "1" if axis.group() == ControllerState::Disable => {
                        axis.code = "32".to_string();
                    }
                    _ => {}
                },
                "OR" if axis.group() == ControllerState::NotReferenced => {
                    axis.code = "1E".to_string();
                    axis.motion_ticks = 2;
                }
                "PA" if axis.group() == ControllerState::Ready => {
                    if let Ok(target) = arg.parse::<f64>() {
                        axis.position = target.clamp(axis.min, axis.max);
                        axis.code = "28".to_string();
                        axis.motion_ticks = 2;
                    }
                }
                "ST" => {
                    if axis.group().is_motion() {
                        axis.code = "32".to_string();
                        axis.motion_ticks = 0;
                    }
                }
                "HT" => {
                    if let Some(kind) = arg.chars().next() {
                        axis.home_type = kind;
                    }
                }
                _ => {}
            }
        }
    }
}

pub(crate) struct SimDevice {
    state: SimHandle,
}

impl SimDevice {
    pub fn new(addresses: &[u8]) -> (Self, SimHandle) {
        let mut axes = HashMap::new();
        for address in addresses {
            axes.insert(*address, SimAxis::new());
        }
        let state = Arc::new(Mutex::new(SimState {
            axes,
            frames: Vec::new(),
            reply_delay: 0,
            closed: false,
            outbox: VecDeque::new(),
        }));
        (Self { state: state.clone() }, state)
    }
}

#[async_trait::async_trait]
impl Transport for SimDevice {
    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::Closed);
        }
        state.on_frame(frame);
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::Closed);
        }
        let mut ready = Vec::new();
        let mut waiting = VecDeque::new();
        while let Some(mut pending) = state.outbox.pop_front() {
            if pending.delay == 0 {
                ready.push(pending.line);
            } else {
                pending.delay -= 1;
                waiting.push_back(pending);
            }
        }
        state.outbox = waiting;
        Ok(ready)
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

pub(crate) fn fast_channel_config() -> ChannelConfig {
    ChannelConfig {
        query_retries: 3,
        reply_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(1),
        write_retries: 1,
        retry_pause: Duration::from_millis(2),
        reply_capacity: 64,
    }
}

pub(crate) fn fast_config() -> BusConfig {
    BusConfig {
        port: Default::default(),
        channel: fast_channel_config(),
        timing: TimingConfig {
            poll_interval: Duration::from_millis(2),
            settle: Duration::from_millis(2),
            motion_settle: Duration::from_millis(5),
            transition_attempts: 200,
            transition_deadline: Duration::from_secs(1),
            reset_timeout: Duration::from_millis(100),
            reset_retries: 2,
            default_home_timeout: Duration::from_millis(500),
            home_margin: Duration::from_millis(100),
            move_timeout: Duration::from_secs(1),
            parse_retries: 3,
            parse_pause: Duration::from_millis(1),
            aggregate_deadline: Duration::from_millis(300),
        },
    }
}

/// A bus wired to a fresh simulator, with one registered axis per address.
pub(crate) async fn test_bus(addresses: &[u8]) -> (Bus, SimHandle) {
    let (device, handle) = SimDevice::new(addresses);
    let bus = Bus::new(fast_config());
    for address in addresses {
        bus.new_axis(*address).await.unwrap();
    }
    bus.open_with(Box::new(device)).await;
    (bus, handle)
}
