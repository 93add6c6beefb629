use std::{error::Error, fmt, io};

use crate::{Rank, Tag};

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommsErr>;

/// Transport and framing failures.
#[derive(Debug)]
pub enum CommsErr {
    /// The peer's channel was closed before or during the exchange.
    ChannelClosed { peer: Rank },
    /// Every peer channel of the group is closed.
    Disconnected,
    /// The destination or source rank is not a member of the group.
    UnknownPeer { peer: Rank },
    /// The next frame from the peer carried an unexpected tag.
    TagMismatch { expected: Tag, got: Tag },
    /// A payload body could not be decoded as the expected type.
    InvalidPayload { what: &'static str, len: usize },
    Json(serde_json::Error),
}

impl fmt::Display for CommsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsErr::ChannelClosed { peer } => {
                write!(f, "channel to peer {peer} is closed")
            }
            CommsErr::Disconnected => write!(f, "every peer channel is closed"),
            CommsErr::UnknownPeer { peer } => {
                write!(f, "rank {peer} is not a member of this group")
            }
            CommsErr::TagMismatch { expected, got } => {
                write!(f, "expected a {expected} frame, got {got}")
            }
            CommsErr::InvalidPayload { what, len } => {
                write!(f, "payload of {len} bytes is not a valid {what}")
            }
            CommsErr::Json(e) => write!(f, "json payload error: {e}"),
        }
    }
}

impl Error for CommsErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommsErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CommsErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CommsErr> for io::Error {
    fn from(value: CommsErr) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}
