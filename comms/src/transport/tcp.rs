use std::{io, net::SocketAddr, time::Duration};

use futures::future;
use log::{debug, info};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
    time,
};

use super::{ROOT_RANK, Transport, check_len, no_link};
use crate::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};

const STARTING_RX_BUF_SIZE: usize = 1028;
const CONNECT_ATTEMPTS: usize = 50;
const CONNECT_DELAY: Duration = Duration::from_millis(100);

struct Link {
    rx: Mutex<(OnoReceiver<OwnedReadHalf>, Vec<f32>)>,
    tx: Mutex<OnoSender<OwnedWriteHalf>>,
}

impl Link {
    fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = crate::channel(rx, tx);

        Ok(Self {
            rx: Mutex::new((rx, vec![0.0; STARTING_RX_BUF_SIZE])),
            tx: Mutex::new(tx),
        })
    }

    async fn send(&self, msg: &Msg<'_>) -> io::Result<()> {
        self.tx.lock().await.send(msg).await
    }

    async fn recv_block(&self, from: usize, block: &mut [f32]) -> io::Result<()> {
        let mut guard = self.rx.lock().await;
        let (rx, buf) = &mut *guard;

        match rx.recv_into(buf).await? {
            Msg::Data(Payload::Params(nums) | Payload::Grad(nums)) => {
                check_len(from, nums.len(), block.len())?;
                block.copy_from_slice(nums);
                Ok(())
            }
            Msg::Err(detail) => Err(io::Error::other(format!("rank {from} failed: {detail}"))),
            msg => Err(unexpected(from, &msg)),
        }
    }

    async fn recv_command(&self, from: usize) -> io::Result<Command> {
        let mut guard = self.rx.lock().await;
        let (rx, buf) = &mut *guard;

        match rx.recv_into(buf).await? {
            Msg::Control(cmd) => Ok(cmd),
            Msg::Err(detail) => Err(io::Error::other(format!("rank {from} failed: {detail}"))),
            msg => Err(unexpected(from, &msg)),
        }
    }
}

fn unexpected(from: usize, msg: &Msg<'_>) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected {} message from rank {from}", msg.kind()),
    )
}

/// A star of TCP links: the root holds one link per leaf and every leaf holds a
/// single link to the root.
pub struct TcpTransport {
    rank: usize,
    world_size: usize,
    links: Vec<Option<Link>>,
}

impl TcpTransport {
    /// Joins a run, binding `addr` on the root or connecting to it on a leaf.
    ///
    /// # Arguments
    /// * `rank` - This participant's rank.
    /// * `world_size` - The amount of participants.
    /// * `addr` - The root's listening address.
    ///
    /// # Returns
    /// A transport with every link established.
    pub async fn establish(rank: usize, world_size: usize, addr: SocketAddr) -> io::Result<Self> {
        if rank == ROOT_RANK {
            let listener = TcpListener::bind(addr).await?;
            Self::accept(listener, world_size).await
        } else {
            Self::connect(rank, world_size, addr).await
        }
    }

    /// Creates the root's transport, accepting a connection from every leaf.
    ///
    /// # Arguments
    /// * `listener` - An already bound listener.
    /// * `world_size` - The amount of participants, including the root.
    pub async fn accept(listener: TcpListener, world_size: usize) -> io::Result<Self> {
        let mut links: Vec<Option<Link>> = (0..world_size).map(|_| None).collect();
        info!("waiting for {} peer(s) at {}", world_size.saturating_sub(1), listener.local_addr()?);

        for _ in 1..world_size {
            let (stream, addr) = listener.accept().await?;
            let link = Link::new(stream)?;

            let rank = match link.recv_command(usize::MAX).await? {
                Command::Hello { rank } => rank,
                cmd => {
                    let text = format!("expected hello from {addr}, got {cmd:?}");
                    return Err(io::Error::new(io::ErrorKind::InvalidData, text));
                }
            };

            if rank == ROOT_RANK || rank >= world_size || links[rank].is_some() {
                let text = format!("peer at {addr} announced an invalid rank {rank}");
                return Err(io::Error::new(io::ErrorKind::InvalidData, text));
            }

            debug!(rank = rank; "peer connected from {addr}");
            links[rank] = Some(link);
        }

        Ok(Self {
            rank: ROOT_RANK,
            world_size,
            links,
        })
    }

    /// Creates a leaf's transport, connecting to the root at `addr`.
    ///
    /// The root might still be starting up, so the connection is attempted a
    /// bounded amount of times before giving up.
    pub async fn connect(rank: usize, world_size: usize, addr: SocketAddr) -> io::Result<Self> {
        if rank == ROOT_RANK || rank >= world_size {
            let text = format!("rank {rank} is not a leaf of a run of size {world_size}");
            return Err(io::Error::new(io::ErrorKind::InvalidInput, text));
        }

        let mut attempt = 0;
        let stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if attempt + 1 < CONNECT_ATTEMPTS => {
                    debug!(rank = rank; "root at {addr} not reachable yet: {e}");
                    attempt += 1;
                    time::sleep(CONNECT_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        };

        let link = Link::new(stream)?;
        link.send(&Msg::Control(Command::Hello { rank })).await?;
        info!(rank = rank; "connected to root at {addr}");

        let mut links: Vec<Option<Link>> = (0..world_size).map(|_| None).collect();
        links[ROOT_RANK] = Some(link);

        Ok(Self {
            rank,
            world_size,
            links,
        })
    }

    fn link(&self, peer: usize) -> io::Result<&Link> {
        self.links
            .get(peer)
            .and_then(Option::as_ref)
            .ok_or_else(|| no_link(self.rank, peer))
    }

    fn leaves(&self) -> impl Iterator<Item = (usize, &Link)> {
        self.links
            .iter()
            .enumerate()
            .filter_map(|(rank, link)| link.as_ref().map(|link| (rank, link)))
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn send(&self, to: usize, block: &[f32]) -> io::Result<()> {
        let msg = Msg::Data(Payload::Params(block));
        self.link(to)?.send(&msg).await
    }

    async fn recv(&self, from: usize, block: &mut [f32]) -> io::Result<()> {
        self.link(from)?.recv_block(from, block).await
    }

    async fn barrier(&self) -> io::Result<()> {
        let token = Msg::Control(Command::Barrier);

        if self.rank != ROOT_RANK {
            let root = self.link(ROOT_RANK)?;
            root.send(&token).await?;

            return match root.recv_command(ROOT_RANK).await? {
                Command::Barrier => Ok(()),
                cmd => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected barrier release, got {cmd:?}"),
                )),
            };
        }

        let arrivals = self.leaves().map(async |(rank, link)| {
            match link.recv_command(rank).await? {
                Command::Barrier => Ok(()),
                cmd => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected barrier from rank {rank}, got {cmd:?}"),
                )),
            }
        });
        future::try_join_all(arrivals).await?;

        let releases = self.leaves().map(|(_, link)| link.send(&token));
        future::try_join_all(releases).await?;
        Ok(())
    }

    async fn broadcast(&self, root: usize, block: &mut [f32]) -> io::Result<()> {
        if root != ROOT_RANK {
            let text = format!("the tcp star can only broadcast from rank {ROOT_RANK}, got {root}");
            return Err(io::Error::new(io::ErrorKind::Unsupported, text));
        }

        if self.rank != ROOT_RANK {
            return self.recv(ROOT_RANK, block).await;
        }

        let msg = Msg::Data(Payload::Params(block));
        let sends = self.leaves().map(|(_, link)| link.send(&msg));
        future::try_join_all(sends).await?;
        Ok(())
    }
}
