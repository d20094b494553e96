use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::axis::config::TimingConfig;
use crate::channel::config::ChannelConfig;
use crate::error::{Error, Result};
use crate::transport::config::PortConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub port: PortConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl BusConfig {
    /// Loads a JSON config file; missing sections fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(file).map_err(|err| Error::Config(err.to_string()))
    }
}
