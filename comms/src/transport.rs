//! The substrate seam: reliable, ordered, group-addressable messaging.

use crate::{Rank, Result, Tag};

/// Point-to-point and any-source messaging inside one communication group.
///
/// Delivery is FIFO per ordered peer pair; nothing is guaranteed across
/// pairs. `recv_any` is the sole multiplexing primitive: it suspends until
/// exactly one frame from exactly one peer is available.
#[trait_variant::make(Transport: Send)]
pub trait TransportTemplate {
    /// This endpoint's rank inside the group.
    fn rank(&self) -> Rank;

    /// Total number of group members, this endpoint included.
    fn size(&self) -> usize;

    /// Sends one tagged frame to `dest`.
    async fn send(&mut self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()>;

    /// Waits for the next frame from `source`, which must carry `tag`.
    ///
    /// # Returns
    /// The payload bytes, or `CommsErr::TagMismatch` if the peer sent
    /// something else.
    async fn recv(&mut self, source: Rank, tag: Tag) -> Result<Vec<u8>>;

    /// Waits for the next frame from any peer.
    ///
    /// # Returns
    /// The source rank, the frame's tag and its payload.
    async fn recv_any(&mut self) -> Result<(Rank, Tag, Vec<u8>)>;
}

/// Collective broadcast built on the point-to-point primitives.
///
/// The root's `bytes` end up at every member; every caller returns the
/// root's value. Non-root callers may pass an empty buffer.
pub async fn broadcast<T: Transport>(
    link: &mut T,
    root: Rank,
    tag: Tag,
    bytes: Vec<u8>,
) -> Result<Vec<u8>> {
    if link.rank() == root {
        for dest in 0..link.size() {
            if dest != root {
                link.send(dest, tag, bytes.clone()).await?;
            }
        }
        Ok(bytes)
    } else {
        link.recv(root, tag).await
    }
}
