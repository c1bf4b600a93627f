use std::io;

use tokio::sync::{
    Mutex,
    mpsc::{self, UnboundedReceiver, UnboundedSender},
};

use super::{ROOT_RANK, Transport, check_len, no_link};

#[derive(Debug)]
enum Frame {
    Block(Vec<f32>),
    Barrier,
}

/// Builds the endpoints of an in-host fabric where every pair of ranks is
/// connected by a dedicated pair of channels.
pub struct Fabric;

impl Fabric {
    /// Creates a fully connected fabric.
    ///
    /// # Arguments
    /// * `world_size` - The amount of participants.
    ///
    /// # Returns
    /// One transport per rank, ordered by rank.
    pub fn new(world_size: usize) -> Vec<FabricTransport> {
        let mut outboxes: Vec<Vec<Option<UnboundedSender<Frame>>>> =
            (0..world_size).map(|_| (0..world_size).map(|_| None).collect()).collect();
        let mut inboxes: Vec<Vec<Option<Mutex<UnboundedReceiver<Frame>>>>> =
            (0..world_size).map(|_| (0..world_size).map(|_| None).collect()).collect();

        for from in 0..world_size {
            for to in 0..world_size {
                if from == to {
                    continue;
                }

                let (tx, rx) = mpsc::unbounded_channel();
                outboxes[from][to] = Some(tx);
                inboxes[to][from] = Some(Mutex::new(rx));
            }
        }

        outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| FabricTransport {
                rank,
                world_size,
                outboxes,
                inboxes,
            })
            .collect()
    }
}

/// One rank's endpoint of a `Fabric`.
///
/// Dropping an endpoint closes all of its channels, so peers blocked on it
/// fail instead of waiting forever.
pub struct FabricTransport {
    rank: usize,
    world_size: usize,
    outboxes: Vec<Option<UnboundedSender<Frame>>>,
    inboxes: Vec<Option<Mutex<UnboundedReceiver<Frame>>>>,
}

impl FabricTransport {
    fn push(&self, to: usize, frame: Frame) -> io::Result<()> {
        let outbox = self
            .outboxes
            .get(to)
            .and_then(Option::as_ref)
            .ok_or_else(|| no_link(self.rank, to))?;

        outbox.send(frame).map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("rank {to} left the fabric"),
            )
        })
    }

    async fn pull(&self, from: usize) -> io::Result<Frame> {
        let inbox = self
            .inboxes
            .get(from)
            .and_then(Option::as_ref)
            .ok_or_else(|| no_link(self.rank, from))?;

        inbox.lock().await.recv().await.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionAborted,
                format!("rank {from} left the fabric"),
            )
        })
    }

    fn unexpected(from: usize, frame: &Frame) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected frame from rank {from}: {frame:?}"),
        )
    }
}

impl Transport for FabricTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn send(&self, to: usize, block: &[f32]) -> io::Result<()> {
        self.push(to, Frame::Block(block.to_vec()))
    }

    async fn recv(&self, from: usize, block: &mut [f32]) -> io::Result<()> {
        match self.pull(from).await? {
            Frame::Block(nums) => {
                check_len(from, nums.len(), block.len())?;
                block.copy_from_slice(&nums);
                Ok(())
            }
            frame => Err(Self::unexpected(from, &frame)),
        }
    }

    async fn barrier(&self) -> io::Result<()> {
        if self.rank != ROOT_RANK {
            self.push(ROOT_RANK, Frame::Barrier)?;
            return match self.pull(ROOT_RANK).await? {
                Frame::Barrier => Ok(()),
                frame => Err(Self::unexpected(ROOT_RANK, &frame)),
            };
        }

        for peer in 1..self.world_size {
            match self.pull(peer).await? {
                Frame::Barrier => {}
                frame => return Err(Self::unexpected(peer, &frame)),
            }
        }

        for peer in 1..self.world_size {
            self.push(peer, Frame::Barrier)?;
        }

        Ok(())
    }

    async fn broadcast(&self, root: usize, block: &mut [f32]) -> io::Result<()> {
        if self.rank != root {
            return self.recv(root, block).await;
        }

        for peer in (0..self.world_size).filter(|&peer| peer != root) {
            self.push(peer, Frame::Block(block.to_vec()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_rank() {
        let mut ranks = Fabric::new(3).into_iter();
        let (root, one, two) = (
            ranks.next().unwrap(),
            ranks.next().unwrap(),
            ranks.next().unwrap(),
        );

        let mut src = [1.0, 2.0];
        let (mut a, mut b) = ([0.0; 2], [0.0; 2]);
        tokio::try_join!(
            root.broadcast(0, &mut src),
            one.broadcast(0, &mut a),
            two.broadcast(0, &mut b),
        )
        .unwrap();

        assert_eq!(a, src);
        assert_eq!(b, src);
    }

    #[tokio::test]
    async fn dropped_peer_fails_pending_receive() {
        let mut ranks = Fabric::new(2);
        let leaf = ranks.pop().unwrap();
        let root = ranks.pop().unwrap();
        drop(leaf);

        let mut block = [0.0; 1];
        let err = root.recv(1, &mut block).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
