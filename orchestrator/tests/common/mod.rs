#![allow(dead_code)]

use std::path::Path;

use machine_learning::{NetConfig, SolverConfig};
use serde_json::json;

/// A two layer perceptron learning the AND gate.
pub fn and2_net(batch_size: usize) -> NetConfig {
    serde_json::from_value(json!({
        "name": "and2",
        "layers": [
            {
                "name": "data", "type": "Data", "top": ["data", "label"],
                "batch_size": batch_size, "sample_size": 2, "label_size": 1,
                "samples": [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0],
                "labels": [0.0, 0.0, 0.0, 1.0]
            },
            {
                "name": "ip1", "type": "InnerProduct", "bottom": ["data"], "top": ["ip1"],
                "num_output": 4, "weight_filler": { "type": "xavier" }
            },
            { "name": "relu1", "type": "ReLU", "bottom": ["ip1"], "top": ["relu1"] },
            {
                "name": "ip2", "type": "InnerProduct", "bottom": ["relu1"], "top": ["ip2"],
                "num_output": 1, "weight_filler": { "type": "uniform", "min": -0.5, "max": 0.5 }
            },
            { "name": "loss", "type": "EuclideanLoss", "bottom": ["ip2", "label"], "top": ["loss"] }
        ]
    }))
    .unwrap()
}

pub fn solver_config(max_iter: usize) -> SolverConfig {
    serde_json::from_value(json!({
        "net": and2_net(2),
        "base_lr": 0.1,
        "momentum": 0.9,
        "weight_decay": 0.0005,
        "max_iter": max_iter,
        "display": 0,
    }))
    .unwrap()
}

pub fn write_json(path: &Path, value: &impl serde::Serialize) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}
