//! Serves the training batches of a solver's dataset to remote clients.

use std::{borrow::Cow, io, net::SocketAddr, sync::Arc, time::Duration};

use comms::msg::{Command, Msg, Payload};
use log::{debug, info, warn};
use machine_learning::{LayerKind, Solver, SolverAction, SolverConfig, layers::DataLayer};
use parking_lot::Mutex;
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime,
    task::JoinSet,
    time,
};

use super::{devices, solver_config};
use crate::{
    OrchestratorError, Result,
    cli::Flags,
    lifecycle::{InitSource, SolverLifecycle},
    signal::{ActionToken, SignalBindings, SignalGuard},
};

const ACTION_POLL: Duration = Duration::from_millis(100);

/// Sets up the solver as `train` does, then serves its batches at `--listen_address`.
pub fn data_server(flags: &Flags) -> Result<()> {
    let config = solver_config(flags)?;
    let source = InitSource::from_flags(&flags.snapshot, &flags.weights)?;
    let bindings = SignalBindings::parse(&flags.sigint_effect, &flags.sighup_effect)?;

    let mut lifecycle = SolverLifecycle::configure(config, devices(flags)?)?;
    let token = ActionToken::new();
    let _guard = SignalGuard::install(bindings, token.clone())?;
    lifecycle.initialize(&source, token.action_fn())?;

    let server = DataServer::new(dataset(lifecycle.solver().config())?, token);
    let runtime = runtime::Builder::new_multi_thread()
        .worker_threads(flags.comm_threads.max(1))
        .enable_all()
        .build()?;

    info!("starting data server");
    let served = runtime.block_on(async {
        let listener = TcpListener::bind(flags.listen_address).await?;
        server.serve(listener, lifecycle.solver_mut()).await
    })?;

    info!("data server done, {served} batches served");
    Ok(())
}

/// The data layer of the solver's train net.
fn dataset(config: &SolverConfig) -> Result<DataLayer> {
    let (name, data) = config
        .net
        .layers
        .iter()
        .find_map(|layer| match &layer.kind {
            LayerKind::Data(data) => Some((layer.name.clone(), data.clone())),
            _ => None,
        })
        .ok_or_else(|| OrchestratorError::InvalidConfig(format!("net {} has no data layer", config.net.name)))?;

    Ok(DataLayer::new(name, data)?)
}

/// Hands out consecutive batches of one dataset to every connected client.
pub struct DataServer {
    layer: Arc<Mutex<DataLayer>>,
    token: ActionToken,
}

impl DataServer {
    /// Creates a new `DataServer`.
    ///
    /// # Arguments
    /// * `layer` - The dataset to serve.
    /// * `token` - Polled for `Stop` and `Snapshot` requests.
    pub fn new(layer: DataLayer, token: ActionToken) -> Self {
        Self {
            layer: Arc::new(Mutex::new(layer)),
            token,
        }
    }

    /// Serves clients until a `Stop` action or until every client that
    /// connected has disconnected.
    ///
    /// # Arguments
    /// * `listener` - A bound listener.
    /// * `solver` - Snapshotted on `Snapshot` actions.
    ///
    /// # Returns
    /// The amount of batches served to clients that disconnected.
    pub async fn serve(self, listener: TcpListener, solver: &mut dyn Solver) -> Result<usize> {
        info!("serving batches at {}", listener.local_addr()?);

        let mut clients = JoinSet::new();
        let mut served = 0;
        let mut poll = time::interval(ACTION_POLL);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    info!("client connected from {addr}");
                    clients.spawn(handle_client(stream, addr, Arc::clone(&self.layer)));
                }
                Some(joined) = clients.join_next() => {
                    match joined {
                        Ok(Ok(n)) => served += n,
                        Ok(Err(e)) => warn!("client failed: {e}"),
                        Err(e) => warn!("client task failed: {e}"),
                    }

                    if clients.is_empty() {
                        info!("every client disconnected");
                        break;
                    }
                }
                _ = poll.tick() => match self.token.query() {
                    SolverAction::Stop => {
                        info!("stop requested, closing {} client(s)", clients.len());
                        break;
                    }
                    SolverAction::Snapshot => snapshot(solver),
                    SolverAction::None => {}
                },
            }
        }

        Ok(served)
    }
}

fn snapshot(solver: &mut dyn Solver) {
    if solver.config().snapshot_prefix.is_none() {
        warn!("snapshot requested but no snapshot_prefix is set");
        return;
    }

    match solver.snapshot() {
        Ok(path) => info!("snapshot written to {}", path.display()),
        Err(e) => warn!("snapshot failed: {e}"),
    }
}

async fn handle_client(stream: TcpStream, addr: SocketAddr, layer: Arc<Mutex<DataLayer>>) -> io::Result<usize> {
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);

    let (samples_len, labels_len) = layer.lock().batch_sizes();
    let mut samples = vec![0.0; samples_len];
    let mut labels = vec![0.0; labels_len];
    let mut rx_buf: Vec<f32> = Vec::new();
    let mut served = 0;

    loop {
        let Some(msg) = rx.recv_or_close::<Msg, _>(&mut rx_buf).await? else {
            break;
        };

        match msg {
            Msg::Control(Command::RequestBatch) => {
                layer.lock().next_batch(&mut samples, &mut labels);
                let batch = [
                    Msg::Data(Payload::Samples(&samples)),
                    Msg::Data(Payload::Labels(&labels)),
                ];
                tx.send_all(&batch).await?;
                served += 1;
            }
            Msg::Control(Command::Disconnect) => break,
            other => {
                let detail = format!("unexpected {} message", other.kind());
                tx.send(&Msg::Err(Cow::Borrowed(detail.as_str()))).await?;
                return Err(io::Error::new(io::ErrorKind::InvalidData, detail));
            }
        }
    }

    debug!("client {addr} disconnected after {served} batches");
    Ok(served)
}

/// A remote consumer of a `DataServer`.
pub struct DataClient {
    rx: comms::OnoReceiver<OwnedReadHalf>,
    tx: comms::OnoSender<OwnedWriteHalf>,
    rx_buf: Vec<f32>,
}

impl DataClient {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);

        Ok(Self {
            rx,
            tx,
            rx_buf: Vec::new(),
        })
    }

    /// Requests the next batch.
    ///
    /// # Returns
    /// The batch's samples and labels.
    pub async fn next_batch(&mut self) -> io::Result<(Vec<f32>, Vec<f32>)> {
        self.tx.send(&Msg::Control(Command::RequestBatch)).await?;
        let samples = self.recv_nums().await?;
        let labels = self.recv_nums().await?;
        Ok((samples, labels))
    }

    pub async fn disconnect(mut self) -> io::Result<()> {
        self.tx.send(&Msg::Control(Command::Disconnect)).await
    }

    async fn recv_nums(&mut self) -> io::Result<Vec<f32>> {
        match self.rx.recv_into(&mut self.rx_buf).await? {
            Msg::Data(payload) => Ok(payload.nums().to_vec()),
            Msg::Err(detail) => Err(io::Error::other(detail.into_owned())),
            msg => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected {} message", msg.kind()),
            )),
        }
    }
}
