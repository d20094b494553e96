use crate::axis::state::ControllerState;

#[derive(Debug)]
pub enum Error {
    /// Physical link failure, write retries included.
    Transport(String),
    /// Operation attempted before a transport was attached.
    NotConnected,
    /// The transport has been closed.
    Closed,
    /// No correlated reply arrived within one attempt window.
    ReadTimeout { prefix: String },
    /// Every query attempt timed out.
    QueryFailed { prefix: String, attempts: u32 },
    /// A reply arrived but could not be parsed, retries included.
    Parse { prefix: String, payload: String },
    StateTransitionTimeout(ControllerState),
    UnsupportedTarget(ControllerState),
    HomeTimeout,
    MoveTimeout,
    AggregateTimeout(&'static str),
    /// Non-zero error code reported by the device's advisory error query.
    Protocol(String),
    OutOfRange { position: f64, min: f64, max: f64 },
    InvalidAddress(u8),
    DuplicateAddress(u8),
    Cancelled,
    Config(String),
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Transport(msg) => write!(f, "Transport failure: {}", msg),
            Error::NotConnected => write!(f, "Not connected: no transport attached"),
            Error::Closed => write!(f, "Transport is closed"),
            Error::ReadTimeout { prefix } => {
                write!(f, "No reply for {} within the attempt window", prefix)
            }
            Error::QueryFailed { prefix, attempts } => {
                write!(f, "Query {} unanswered after {} attempts", prefix, attempts)
            }
            Error::Parse { prefix, payload } => {
                write!(f, "Unparsable reply for {}: {:?}", prefix, payload)
            }
            Error::StateTransitionTimeout(target) => {
                write!(f, "Timed out driving axis to {:?}", target)
            }
            Error::UnsupportedTarget(target) => {
                write!(f, "{:?} is not a drivable target state", target)
            }
            Error::HomeTimeout => write!(f, "Home search did not complete in time"),
            Error::MoveTimeout => write!(f, "Move did not complete in time"),
            Error::AggregateTimeout(op) => {
                write!(f, "Bulk operation {} incomplete at the deadline", op)
            }
            Error::Protocol(code) => write!(f, "Device reported error: {}", code),
            Error::OutOfRange { position, min, max } => {
                write!(f, "Position {} outside [{}, {}]", position, min, max)
            }
            Error::InvalidAddress(addr) => write!(f, "Address {} outside 0..=31", addr),
            Error::DuplicateAddress(addr) => {
                write!(f, "Address {} already has an axis", addr)
            }
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Config(msg) => write!(f, "Invalid config: {}", msg),
            Error::IoError(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<tokio_serial::Error> for Error {
    fn from(err: tokio_serial::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
