//! In-memory fully-connected group, one mpsc channel per ordered peer pair.

use std::{
    future::poll_fn,
    task::Poll,
};

use tokio::sync::mpsc;

use crate::{CommsErr, Rank, Result, Tag, Transport};

#[derive(Debug)]
struct Frame {
    tag: Tag,
    payload: Vec<u8>,
}

/// One endpoint of a [`local_group`].
///
/// Each ordered pair of endpoints owns a private unbounded channel, so
/// delivery is reliable and FIFO per pair while nothing orders frames
/// across different peers.
pub struct LocalLink {
    rank: Rank,
    /// `txs[dest]`; `None` at this endpoint's own rank.
    txs: Vec<Option<mpsc::UnboundedSender<Frame>>>,
    /// `rxs[source]`; `None` at this endpoint's own rank.
    rxs: Vec<Option<mpsc::UnboundedReceiver<Frame>>>,
    /// Rotation cursor so `recv_any` does not starve high-ranked peers.
    cursor: usize,
}

/// Creates `n` fully-connected endpoints forming one communication group.
///
/// # Arguments
/// * `n` - The group size; endpoint `i` of the returned vector has rank `i`.
pub fn local_group(n: usize) -> Vec<LocalLink> {
    let mut txs: Vec<Vec<Option<mpsc::UnboundedSender<Frame>>>> =
        (0..n).map(|_| Vec::with_capacity(n)).collect();
    let mut rxs: Vec<Vec<Option<mpsc::UnboundedReceiver<Frame>>>> =
        (0..n).map(|_| (0..n).map(|_| None).collect()).collect();

    for src in 0..n {
        for dst in 0..n {
            if src == dst {
                txs[src].push(None);
                continue;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            txs[src].push(Some(tx));
            rxs[dst][src] = Some(rx);
        }
    }

    txs.into_iter()
        .zip(rxs)
        .enumerate()
        .map(|(rank, (txs, rxs))| LocalLink {
            rank,
            txs,
            rxs,
            cursor: 0,
        })
        .collect()
}

impl LocalLink {
    fn outbox(&self, dest: Rank) -> Result<&mpsc::UnboundedSender<Frame>> {
        self.txs
            .get(dest)
            .and_then(Option::as_ref)
            .ok_or(CommsErr::UnknownPeer { peer: dest })
    }

    fn inbox(&mut self, source: Rank) -> Result<&mut mpsc::UnboundedReceiver<Frame>> {
        self.rxs
            .get_mut(source)
            .and_then(Option::as_mut)
            .ok_or(CommsErr::UnknownPeer { peer: source })
    }
}

impl Transport for LocalLink {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.txs.len()
    }

    async fn send(&mut self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        self.outbox(dest)?
            .send(Frame { tag, payload })
            .map_err(|_| CommsErr::ChannelClosed { peer: dest })
    }

    async fn recv(&mut self, source: Rank, tag: Tag) -> Result<Vec<u8>> {
        let frame = self
            .inbox(source)?
            .recv()
            .await
            .ok_or(CommsErr::ChannelClosed { peer: source })?;

        if frame.tag != tag {
            return Err(CommsErr::TagMismatch {
                expected: tag,
                got: frame.tag,
            });
        }
        Ok(frame.payload)
    }

    async fn recv_any(&mut self) -> Result<(Rank, Tag, Vec<u8>)> {
        let n = self.rxs.len();
        poll_fn(|cx| {
            let mut open = 0;
            for offset in 0..n {
                let peer = (self.cursor + offset) % n;
                let Some(rx) = self.rxs[peer].as_mut() else {
                    continue;
                };
                match rx.poll_recv(cx) {
                    Poll::Ready(Some(frame)) => {
                        self.cursor = (peer + 1) % n;
                        return Poll::Ready(Ok((peer, frame.tag, frame.payload)));
                    }
                    Poll::Ready(None) => {}
                    Poll::Pending => open += 1,
                }
            }
            if open == 0 {
                return Poll::Ready(Err(CommsErr::Disconnected));
            }
            Poll::Pending
        })
        .await
    }
}
