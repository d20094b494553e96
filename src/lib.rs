//! Async driver for addressed motion-axis controllers multiplexed over one
//! shared serial line: a framed command channel with reply correlation,
//! per-axis operational state transitions, and bulk fan-out across the bus.

pub mod axis;
pub mod bus;
pub mod channel;
pub mod correlator;
pub mod error;
pub mod transport;

#[cfg(test)]
pub(crate) mod sim;

pub use axis::state::ControllerState;
pub use axis::Axis;
pub use bus::config::BusConfig;
pub use bus::Bus;
pub use channel::CommandChannel;
pub use error::{Error, Result};
