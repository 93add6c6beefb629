pub mod codec;
mod error;
mod group;
pub mod tag;
mod transport;

pub use error::{CommsErr, Result};
pub use group::{LocalLink, local_group};
pub use tag::Tag;
pub use transport::{Transport, TransportTemplate, broadcast};

/// Identifier of a process inside a communication group.
pub type Rank = usize;
