mod common;

use std::{path::Path, path::PathBuf, thread};

use comms::transport::{Fabric, TcpTransport, Transport, TransportKind};
use machine_learning::{
    ActionFn, MlErr, Net, NoHooks, SgdSolver, SolveOutcome, Solver, SolverAction, SolverConfig,
    SolverHooks,
};
use orchestrator::{
    ActionToken, DistributedOptions, OrchestratorError, SolverLifecycle, SyncStrategy,
    sync::{DistributedSync, PeerToPeerSync},
};
use tokio::{net::TcpListener, runtime};

use common::solver_config;

fn assert_same_params(a: &dyn Solver, b: &dyn Solver) {
    let (a, b) = (a.net().params(), b.net().params());
    assert_eq!(a.len(), b.len());
    for (a, b) in a.iter().zip(&b) {
        let a: Vec<u32> = a.data().iter().map(|x| x.to_bits()).collect();
        let b: Vec<u32> = b.data().iter().map(|x| x.to_bits()).collect();
        assert_eq!(a, b);
    }
}

#[test]
fn local_strategy_runs_the_solver_loop() {
    let mut solver = SgdSolver::new(solver_config(5)).unwrap();
    let outcome = SyncStrategy::Local
        .run(&mut solver, &DistributedOptions::default())
        .unwrap();

    assert_eq!(outcome, SolveOutcome::Completed);
    assert_eq!(solver.iter(), 5);
}

#[test]
fn peer_to_peer_replicas_stay_bit_identical() {
    let devices = vec![0, 1, 2];
    let mut lifecycle = SolverLifecycle::configure(solver_config(20), devices.clone()).unwrap();
    assert_eq!(lifecycle.solver().config().solver_count(), 3);

    let p2p = PeerToPeerSync::new(devices);
    let root = lifecycle.solver_mut();
    let before = root.net().params()[0].data().to_vec();

    let mut replicas = p2p.replicate(root).unwrap();
    let outcome = p2p.run_group(root, &mut replicas).unwrap();

    assert_eq!(outcome, SolveOutcome::Completed);
    assert_ne!(root.net().params()[0].data(), before.as_slice());
    for replica in &replicas {
        assert_eq!(replica.iter(), 20);
        assert_same_params(root, replica.as_ref());
    }
}

/// A solver whose loop fails right after the group starts.
struct FailingSolver(SgdSolver);

impl Solver for FailingSolver {
    fn config(&self) -> &SolverConfig {
        self.0.config()
    }

    fn iter(&self) -> usize {
        self.0.iter()
    }

    fn net(&self) -> &Net {
        self.0.net()
    }

    fn net_mut(&mut self) -> &mut Net {
        self.0.net_mut()
    }

    fn test_nets_mut(&mut self) -> &mut [Net] {
        self.0.test_nets_mut()
    }

    fn set_action_fn(&mut self, action_fn: ActionFn) {
        self.0.set_action_fn(action_fn);
    }

    fn restore(&mut self, path: &Path) -> machine_learning::Result<()> {
        self.0.restore(path)
    }

    fn snapshot(&mut self) -> machine_learning::Result<PathBuf> {
        self.0.snapshot()
    }

    fn replicate(&self, rank: usize, device: Option<u32>) -> machine_learning::Result<Box<dyn Solver>> {
        self.0.replicate(rank, device)
    }

    fn solve(&mut self, hooks: &mut dyn SolverHooks) -> machine_learning::Result<SolveOutcome> {
        hooks.on_start(self.0.net_mut())?;
        Err(MlErr::InvalidConfig("device lost".into()))
    }
}

#[test]
fn failing_replica_aborts_the_whole_group() {
    let mut config = solver_config(50);
    config.solver_count = Some(2);
    let mut root = SgdSolver::new(config).unwrap();

    let mut config = root.config().clone();
    config.solver_rank = 1;
    let failing = FailingSolver(SgdSolver::new(config).unwrap());
    let mut replicas: Vec<Box<dyn Solver>> = vec![Box::new(failing)];

    let err = PeerToPeerSync::new(vec![0, 1])
        .run_group(&mut root, &mut replicas)
        .unwrap_err();

    assert!(err.to_string().contains("device lost"), "{err}");
    assert!(root.iter() < 50);
}

fn replicas(world_size: usize, max_iter: usize) -> Vec<Box<dyn Solver>> {
    let mut config = solver_config(max_iter);
    config.solver_count = Some(world_size);
    let root = SgdSolver::new(config).unwrap();

    let mut solvers: Vec<Box<dyn Solver>> = (1..world_size)
        .map(|rank| root.replicate(rank, None).unwrap())
        .collect();
    solvers.insert(0, Box::new(root));
    solvers
}

fn run_ranks<T: Transport + 'static>(
    transports: Vec<T>,
    solvers: &mut [Box<dyn Solver>],
    handle: &runtime::Handle,
) -> Vec<SolveOutcome> {
    thread::scope(|s| {
        let handles: Vec<_> = solvers
            .iter_mut()
            .zip(transports)
            .map(|(solver, transport)| {
                let sync = DistributedSync::new(transport, handle.clone());
                s.spawn(move || sync.run(solver.as_mut()))
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
    })
}

#[test]
fn fabric_ranks_stay_bit_identical() {
    let runtime = runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap();
    let mut solvers = replicas(3, 15);

    let outcomes = run_ranks(Fabric::new(3), &mut solvers, runtime.handle());

    assert_eq!(outcomes, [SolveOutcome::Completed; 3]);
    assert_same_params(solvers[0].as_ref(), solvers[1].as_ref());
    assert_same_params(solvers[0].as_ref(), solvers[2].as_ref());
}

#[test]
fn tcp_ranks_stay_bit_identical() {
    let runtime = runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap();
    let transports = runtime.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let root = tokio::spawn(TcpTransport::accept(listener, 2));
        let leaf = TcpTransport::connect(1, 2, addr).await.unwrap();
        vec![root.await.unwrap().unwrap(), leaf]
    });

    let mut solvers = replicas(2, 10);
    let outcomes = run_ranks(transports, &mut solvers, runtime.handle());

    assert_eq!(outcomes, [SolveOutcome::Completed; 2]);

    assert_same_params(solvers[0].as_ref(), solvers[1].as_ref());
    assert_eq!(solvers[1].iter(), 10);
}

#[test]
fn in_process_fabric_strategy_completes() {
    let strategy = SyncStrategy::select("mlsl", &[], 2).unwrap();
    let options = DistributedOptions {
        world_size: 2,
        ..DistributedOptions::default()
    };

    let mut config = solver_config(8);
    strategy.prepare(&mut config, &options);
    assert_eq!(config.solver_count(), 2);
    assert_eq!(config.solver_rank, 0);

    let mut solver = SgdSolver::new(config).unwrap();
    let outcome = strategy.run(&mut solver, &options).unwrap();

    assert_eq!(outcome, SolveOutcome::Completed);
    assert_eq!(solver.iter(), 8);
}

#[test]
fn rank_outside_world_is_rejected() {
    let strategy = SyncStrategy::Distributed {
        kind: TransportKind::Mpi,
        comm_threads: 1,
    };
    let options = DistributedOptions {
        rank: 2,
        world_size: 2,
        ..DistributedOptions::default()
    };

    let mut solver = SgdSolver::new(solver_config(1)).unwrap();
    let err = strategy.run(&mut solver, &options).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}

#[test]
fn no_hooks_and_single_rank_fabric_agree() {
    let mut alone = SgdSolver::new(solver_config(6)).unwrap();
    alone.solve(&mut NoHooks).unwrap();

    let runtime = runtime::Builder::new_multi_thread().worker_threads(1).enable_all().build().unwrap();
    let mut solvers = replicas(1, 6);
    assert_eq!(run_ranks(Fabric::new(1), &mut solvers, runtime.handle()), [SolveOutcome::Completed]);

    assert_same_params(&alone, solvers[0].as_ref());
}

/// Configures a peer to peer group on `devices` with `action` already pending.
fn pending_p2p_group(
    config: SolverConfig,
    devices: Vec<u32>,
    action: SolverAction,
) -> (PeerToPeerSync, SolverLifecycle, Vec<Box<dyn Solver>>) {
    let token = ActionToken::new();
    let p2p = PeerToPeerSync::new(devices.clone());
    let mut lifecycle = SolverLifecycle::configure(config, devices).unwrap();
    lifecycle.solver_mut().set_action_fn(token.action_fn());

    let replicas = p2p.replicate(lifecycle.solver()).unwrap();
    token.record(action);
    (p2p, lifecycle, replicas)
}

#[test]
fn pending_stop_halts_every_peer_to_peer_replica() {
    for _ in 0..20 {
        let (p2p, mut lifecycle, mut replicas) =
            pending_p2p_group(solver_config(2000), vec![0, 1, 2, 3], SolverAction::Stop);

        let root = lifecycle.solver_mut();
        let outcome = p2p.run_group(root, &mut replicas).unwrap();

        assert_eq!(outcome, SolveOutcome::Stopped);
        assert_eq!(root.iter(), 0);
        for replica in &replicas {
            assert_eq!(replica.iter(), 0);
        }
    }
}

#[test]
fn pending_snapshot_is_written_once_by_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = solver_config(3);
    config.snapshot_prefix = Some(dir.path().join("and2"));
    config.snapshot_after_train = false;

    let (p2p, mut lifecycle, mut replicas) =
        pending_p2p_group(config, vec![0, 1, 2], SolverAction::Snapshot);

    let root = lifecycle.solver_mut();
    let outcome = p2p.run_group(root, &mut replicas).unwrap();

    assert_eq!(outcome, SolveOutcome::Completed);
    assert!(dir.path().join("and2_iter_0.solverstate").exists());
    let states = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "solverstate"))
        .count();
    assert_eq!(states, 1);
    for replica in &replicas {
        assert_eq!(replica.iter(), 3);
        assert_same_params(root, replica.as_ref());
    }
}

#[test]
fn pending_stop_halts_every_fabric_rank() {
    let runtime = runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap();

    for _ in 0..20 {
        let token = ActionToken::new();
        let mut solvers = replicas(4, 2000);
        solvers[0].set_action_fn(token.action_fn());
        token.record(SolverAction::Stop);

        let outcomes = run_ranks(Fabric::new(4), &mut solvers, runtime.handle());

        assert_eq!(outcomes, [SolveOutcome::Stopped; 4]);
        assert!(solvers.iter().all(|s| s.iter() == 0));
    }
}

#[test]
fn in_process_fabric_strategy_honours_a_pending_stop() {
    let strategy = SyncStrategy::select("mlsl", &[], 1).unwrap();
    let options = DistributedOptions {
        world_size: 4,
        ..DistributedOptions::default()
    };

    for _ in 0..20 {
        let mut config = solver_config(2000);
        strategy.prepare(&mut config, &options);

        let token = ActionToken::new();
        let mut solver = SgdSolver::new(config).unwrap();
        solver.set_action_fn(token.action_fn());
        token.record(SolverAction::Stop);

        assert_eq!(strategy.run(&mut solver, &options).unwrap(), SolveOutcome::Stopped);
        assert_eq!(solver.iter(), 0);
    }
}
