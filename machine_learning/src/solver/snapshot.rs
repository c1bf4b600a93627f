use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use safetensors::SafeTensors;

use crate::{
    Blob, MlErr, Net, Result,
    weights::{read_tensor, write_tensors},
};

const ITER_KEY: &str = "iter";

/// The path of a snapshot file written at iteration `iter`.
pub fn file_name(prefix: &Path, iter: usize, extension: &str) -> PathBuf {
    PathBuf::from(format!("{}_iter_{iter}.{extension}", prefix.display()))
}

/// Writes the parameters of `net` and the solver's `history` to `path`.
pub fn save(path: &Path, net: &Net, history: &[Blob], iter: usize) -> Result<()> {
    let params = net.params();
    let tensors = params
        .iter()
        .enumerate()
        .map(|(i, blob)| (format!("param.{i}"), *blob))
        .chain(
            history
                .iter()
                .enumerate()
                .map(|(i, blob)| (format!("history.{i}"), blob)),
        );

    let metadata = HashMap::from([(ITER_KEY.to_string(), iter.to_string())]);
    write_tensors(path, tensors, Some(metadata))
}

/// Restores the parameters of `net` and the solver's `history` from `path`.
///
/// # Returns
/// The iteration the snapshot was taken at.
pub fn load(path: &Path, net: &mut Net, history: &mut [Blob]) -> Result<usize> {
    let bytes = fs::read(path)?;
    let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
    let iter = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(ITER_KEY))
        .and_then(|iter| iter.parse().ok())
        .ok_or_else(|| MlErr::InvalidConfig(format!("{} has no iteration count", path.display())))?;

    let tensors = SafeTensors::deserialize(&bytes)?;
    let params = net.params_mut().into_iter().enumerate().map(|(i, b)| (format!("param.{i}"), b));
    let history = history.iter_mut().enumerate().map(|(i, b)| (format!("history.{i}"), b));

    for (name, blob) in params.chain(history) {
        if !read_tensor(&tensors, &name, blob)? {
            return Err(MlErr::InvalidConfig(format!(
                "{} is missing tensor {name}",
                path.display()
            )));
        }
    }

    Ok(iter)
}
