mod common;

use std::fs;

use machine_learning::{Blob, Net, Phase};
use orchestrator::{
    OrchestratorError,
    verify::{self, DumpId, DumpRole, DumpSide, LayerGraph},
};

use common::and2_net;

fn net() -> Net {
    Net::new(&and2_net(4), Phase::Train, 1701).unwrap()
}

/// Shifts the output of one layer, as a faulty kernel would.
struct Skewed {
    net: Net,
    layer: usize,
    by: f32,
}

impl LayerGraph for Skewed {
    fn num_layers(&self) -> usize {
        self.net.num_layers()
    }

    fn layer_kind(&self, layer: usize) -> &str {
        self.net.layer_kind(layer)
    }

    fn zero_param_diffs(&mut self) {
        self.net.zero_param_diffs();
    }

    fn forward_layer(&mut self, layer: usize) -> machine_learning::Result<()> {
        self.net.forward_layer(layer)?;
        if layer == self.layer {
            self.net.top_mut(layer, 0).data_mut().iter_mut().for_each(|x| *x += self.by);
        }
        Ok(())
    }

    fn backward_layer(&mut self, layer: usize) -> machine_learning::Result<()> {
        self.net.backward_layer(layer)
    }

    fn output_mut(&mut self, layer: usize) -> Option<&mut Blob> {
        self.net.output_mut(layer)
    }

    fn grad_input_mut(&mut self, layer: usize) -> Option<&mut Blob> {
        self.net.grad_input_mut(layer)
    }

    fn params(&self) -> Vec<&Blob> {
        LayerGraph::params(&self.net)
    }
}

#[test]
fn collect_writes_every_dump_and_the_info_log() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("collect_out");

    verify::collect(&mut net(), &out, false).unwrap();

    let info = fs::read_to_string(out.join("HostInfo.txt")).unwrap();
    let lines: Vec<_> = info.lines().collect();
    assert_eq!(lines[0], "Fwrd0000 Data");
    assert_eq!(lines[4], "Fwrd0004 EuclideanLoss");
    assert_eq!(lines[5], "Bwrd0004 EuclideanLoss");
    assert_eq!(lines.len(), 10);

    for i in 0..5 {
        assert!(out.join(format!("REFFwrd{i:04}.bin")).exists());
    }
    // The data layer's input gradient and the first inner product's are never needed.
    assert!(!out.join("REFBwrd0000.bin").exists());
    assert!(!out.join("REFBwrd0001.bin").exists());
    assert!(out.join("REFBwrd0002.bin").exists());
    for i in 0..4 {
        assert!(out.join(format!("REFGrad{i:04}.bin")).exists());
        assert!(out.join(format!("REFWght{i:04}.bin")).exists());
    }
}

#[test]
fn collect_then_compare_on_same_environment_finds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (reference, target) = (dir.path().join("ref"), dir.path().join("tgt"));

    verify::collect(&mut net(), &reference, false).unwrap();
    let errors = verify::compare(&mut net(), &reference, &target, false, 1e-3).unwrap();

    assert!(errors.is_empty(), "{errors:?}");
    assert!(target.join("TGTFwrd0003.bin").exists());
    assert!(target.join("HostInfo.txt").exists());
}

#[test]
fn compare_blames_only_the_diverging_layer() {
    let dir = tempfile::tempdir().unwrap();
    let (reference, target) = (dir.path().join("ref"), dir.path().join("tgt"));

    verify::collect(&mut net(), &reference, true).unwrap();

    let mut skewed = Skewed {
        net: net(),
        layer: 2,
        by: 0.5,
    };
    let errors = verify::compare(&mut skewed, &reference, &target, true, 1e-3).unwrap();

    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors.get("Fwrd0002 ReLU"), Some(4 * 4));
}

#[test]
fn skew_within_epsilon_passes() {
    let dir = tempfile::tempdir().unwrap();
    let (reference, target) = (dir.path().join("ref"), dir.path().join("tgt"));

    verify::collect(&mut net(), &reference, false).unwrap();

    let mut skewed = Skewed {
        net: net(),
        layer: 3,
        by: 1e-4,
    };
    let errors = verify::compare(&mut skewed, &reference, &target, false, 1e-3).unwrap();
    assert!(errors.is_empty(), "{errors:?}");
}

#[test]
fn missing_reference_forward_dump_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (reference, target) = (dir.path().join("ref"), dir.path().join("tgt"));

    verify::collect(&mut net(), &reference, false).unwrap();
    let missing = DumpId::new(DumpRole::Forward, DumpSide::Reference, 1).path(&reference);
    fs::remove_file(&missing).unwrap();

    let err = verify::compare(&mut net(), &reference, &target, false, 1e-3).unwrap_err();
    let OrchestratorError::MissingDump { path, .. } = &err else {
        panic!("unexpected error {err}");
    };
    assert_eq!(path, &missing);
}

#[test]
fn output_directory_that_cant_be_created_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("taken");
    fs::write(&file, b"").unwrap();

    let err = verify::collect(&mut net(), &file.join("out"), false).unwrap_err();
    assert!(matches!(err, OrchestratorError::CreateDir { .. }));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn dictionary_is_keyed_by_parameter_for_weights() {
    let dir = tempfile::tempdir().unwrap();
    let (reference, target) = (dir.path().join("ref"), dir.path().join("tgt"));

    verify::collect(&mut net(), &reference, false).unwrap();
    verify::replay(&mut net(), &reference, &target, false).unwrap();

    let weights = DumpId::new(DumpRole::Weight, DumpSide::Target, 2).path(&target);
    let mut values = verify::dump::read(&weights).unwrap();
    values[0] += 1.0;
    verify::dump::write(&target, DumpId::new(DumpRole::Weight, DumpSide::Target, 2), &values).unwrap();

    let errors = verify::compare_dumps(&reference, &target, false, 1e-3).unwrap();
    assert_eq!(errors.get("Wght0002"), Some(1));
    assert_eq!(errors.len(), 1);
}
