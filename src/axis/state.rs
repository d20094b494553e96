use serde::{Deserialize, Serialize};

/// Operational state of one controller. Several raw status codes collapse
/// onto each named state; `Unknown` is the local sentinel for a status that
/// could not be read or parsed, never something the device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    NotReferenced,
    Configuration,
    Homing,
    Moving,
    Ready,
    Disable,
    Jogging,
    Unknown,
}

impl ControllerState {
    /// Maps the two-character code terminating a status reply.
    pub fn from_code(code: &str) -> Self {
        match code {
            "0A" | "0B" | "0C" | "0D" | "0E" | "0F" | "10" | "11" => Self::NotReferenced,
            "14" => Self::Configuration,
            "1E" | "1F" => Self::Homing,
            "28" => Self::Moving,
            "32" | "33" | "34" | "35" => Self::Ready,
            "3C" | "3D" | "3E" => Self::Disable,
            "46" | "47" => Self::Jogging,
            _ => Self::Unknown,
        }
    }

    pub fn is_motion(self) -> bool {
        matches!(self, Self::Homing | Self::Moving | Self::Jogging)
    }
}
