mod common;

use std::path::Path;

use clap::Parser;
use machine_learning::{Net, Phase, SgdSolver, SolveOutcome, SolverAction, layers::DataLayer};
use orchestrator::{
    ActionToken, Flags, OrchestratorError, Registry,
    commands::{
        self,
        data_server::{DataClient, DataServer},
    },
};
use tokio::net::TcpListener;

use common::{and2_net, solver_config, write_json};

fn flags(args: &[&str]) -> Flags {
    Flags::try_parse_from(["orchestra"].iter().chain(args)).unwrap()
}

fn solver_file(dir: &Path, max_iter: usize) -> String {
    let mut config = solver_config(max_iter);
    config.snapshot_prefix = Some(dir.join("and2"));

    let path = dir.join("solver.json");
    write_json(&path, &config);
    path.display().to_string()
}

#[test]
fn train_snapshots_after_training() {
    let dir = tempfile::tempdir().unwrap();
    let solver = solver_file(dir.path(), 12);

    let outcome = commands::train::run(&flags(&["train", "--solver", &solver])).unwrap();

    assert_eq!(outcome, SolveOutcome::Completed);
    assert!(dir.path().join("and2_iter_12.solverstate").exists());
    assert!(dir.path().join("and2_iter_12.safetensors").exists());
}

#[test]
fn train_on_one_device_runs_locally() {
    let dir = tempfile::tempdir().unwrap();
    let solver = solver_file(dir.path(), 6);

    let flags = flags(&["train", "--solver", &solver, "--gpu", "0"]);
    Registry::builtin().run(&flags).unwrap();
    assert!(dir.path().join("and2_iter_6.solverstate").exists());
}

#[test]
fn train_rejects_unknown_transport_with_exit_code_one() {
    let dir = tempfile::tempdir().unwrap();
    let solver = solver_file(dir.path(), 1);

    let flags = flags(&["train", "--solver", &solver, "--param_server", "nccl"]);
    let err = Registry::builtin().run(&flags).unwrap_err();

    assert!(matches!(err, OrchestratorError::UnsupportedTransport(_)));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn train_rejects_snapshot_and_weights_together() {
    let dir = tempfile::tempdir().unwrap();
    let solver = solver_file(dir.path(), 1);

    let flags = flags(&[
        "train", "--solver", &solver, "--snapshot", "a.solverstate", "--weights", "b.safetensors",
    ]);
    let err = Registry::builtin().run(&flags).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}

#[test]
fn train_rejects_unknown_signal_effect() {
    let dir = tempfile::tempdir().unwrap();
    let solver = solver_file(dir.path(), 1);

    let flags = flags(&["train", "--solver", &solver, "--sighup_effect", "reload"]);
    assert!(Registry::builtin().run(&flags).is_err());
}

#[test]
fn test_scores_trained_weights() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.json");
    let weights = dir.path().join("w.safetensors");
    write_json(&model, &and2_net(4));
    Net::new(&and2_net(4), Phase::Test, 3).unwrap().save_trained_layers(&weights).unwrap();

    let model = model.display().to_string();
    let weights = weights.display().to_string();

    let scores = commands::score::score(&flags(&[
        "test", "--model", &model, "--weights", &weights, "--iterations", "3",
    ]))
    .unwrap();
    assert!(scores.loss().is_finite());

    let err = commands::score::score(&flags(&["test", "--model", &model])).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}

#[test]
fn time_reports_every_layer() {
    let mut net = Net::new(&and2_net(4), Phase::Train, 3).unwrap();
    let timings = commands::time::benchmark(&mut net, 2, true).unwrap();

    assert_eq!(timings.forward.len(), 5);
    assert!(timings.backward.iter().all(|d| d.is_zero()));
}

#[test]
fn collect_and_compare_commands_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.json");
    write_json(&model, &and2_net(4));

    let model = model.display().to_string();
    let collect_dir = dir.path().join("ref").display().to_string();
    let compare_dir = dir.path().join("tgt").display().to_string();
    let args = ["--model", &model, "--collect_dir", &collect_dir, "--compare_output_dir", &compare_dir];

    let registry = Registry::builtin();
    registry.run(&flags(&[&["collect"][..], &args].concat())).unwrap();
    registry.run(&flags(&[&["compare"][..], &args].concat())).unwrap();

    assert!(dir.path().join("tgt").join("TGTWght0000.bin").exists());
}

fn data_layer() -> DataLayer {
    let config = and2_net(2);
    let data = config.data().unwrap().clone();
    DataLayer::new("data".into(), data).unwrap()
}

#[tokio::test]
async fn data_server_serves_until_clients_leave() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = DataServer::new(data_layer(), ActionToken::new());
    let mut solver = SgdSolver::new(solver_config(1)).unwrap();

    let client = async {
        let mut client = DataClient::connect(addr).await.unwrap();
        let first = client.next_batch().await.unwrap();
        let second = client.next_batch().await.unwrap();
        client.disconnect().await.unwrap();
        (first, second)
    };

    let (served, (first, second)) = tokio::join!(server.serve(listener, &mut solver), client);

    assert_eq!(served.unwrap(), 2);
    assert_eq!(first, (vec![0.0, 0.0, 0.0, 1.0], vec![0.0, 0.0]));
    assert_eq!(second, (vec![1.0, 0.0, 1.0, 1.0], vec![0.0, 1.0]));
}

#[tokio::test]
async fn data_server_stops_on_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let token = ActionToken::new();
    let server = DataServer::new(data_layer(), token.clone());
    let mut solver = SgdSolver::new(solver_config(1)).unwrap();

    token.record(SolverAction::Stop);
    let served = server.serve(listener, &mut solver).await.unwrap();
    assert_eq!(served, 0);
}
