use std::{error::Error, fmt, io};

use comms::{CommsErr, Tag};
use machine_learning::MlErr;

/// The orchestra module's result type.
pub type Result<T> = std::result::Result<T, OrchestraErr>;

/// Synchronization-protocol failures.
#[derive(Debug)]
pub enum OrchestraErr {
    /// A process tried to train or coordinate before its model info was
    /// fully set.
    NotConfigured { field: &'static str },
    /// The serving loop dispatched a message type it does not understand;
    /// indicates a peer or version mismatch.
    Protocol { tag: Tag },
    /// A parent-facing exchange was attempted by a process with no parent.
    MissingParent { tag: Tag },
    /// An array payload does not fit the shape fixed at tree setup.
    ArraySize {
        index: usize,
        got: usize,
        expected: usize,
    },
    InvalidConfig { what: &'static str },
    Comms(CommsErr),
    Ml(MlErr),
}

impl fmt::Display for OrchestraErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestraErr::NotConfigured { field } => {
                write!(f, "{field} not set, the process is not fully configured")
            }
            OrchestraErr::Protocol { tag } => {
                write!(f, "unrecognized message type {tag} in serving loop")
            }
            OrchestraErr::MissingParent { tag } => {
                write!(f, "attempted to exchange {tag} with parent, but no parent is configured")
            }
            OrchestraErr::ArraySize {
                index,
                got,
                expected,
            } => write!(
                f,
                "array {index} carries {got} elements, expected {expected}"
            ),
            OrchestraErr::InvalidConfig { what } => write!(f, "invalid configuration: {what}"),
            OrchestraErr::Comms(e) => write!(f, "transport error: {e}"),
            OrchestraErr::Ml(e) => write!(f, "model error: {e}"),
        }
    }
}

impl Error for OrchestraErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OrchestraErr::Comms(e) => Some(e),
            OrchestraErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommsErr> for OrchestraErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}

impl From<MlErr> for OrchestraErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<OrchestraErr> for io::Error {
    fn from(value: OrchestraErr) -> Self {
        match value {
            OrchestraErr::Comms(e) => e.into(),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
