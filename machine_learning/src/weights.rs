use std::{collections::HashMap, fs, path::Path};

use log::{debug, info};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{Blob, MlErr, Net, Result};

/// The name of the `index`th parameter of `layer` inside a weights file.
pub fn tensor_name(layer: &str, index: usize) -> String {
    format!("{layer}.{index}")
}

/// Serializes `tensors` into a safetensors file at `path`.
pub(crate) fn write_tensors<'a, I>(path: &Path, tensors: I, metadata: Option<HashMap<String, String>>) -> Result<()>
where
    I: IntoIterator<Item = (String, &'a Blob)>,
{
    let views = tensors
        .into_iter()
        .map(|(name, blob)| {
            let view = TensorView::new(
                Dtype::F32,
                blob.shape().to_vec(),
                bytemuck::cast_slice(blob.data()),
            )?;
            Ok((name, view))
        })
        .collect::<Result<Vec<_>>>()?;

    let bytes = safetensors::serialize(views, &metadata)?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Copies the values of the tensor `name` into `blob`.
///
/// # Returns
/// `false` if there's no such tensor, an error if its shape or type doesn't match.
pub(crate) fn read_tensor(tensors: &SafeTensors, name: &str, blob: &mut Blob) -> Result<bool> {
    let Ok(view) = tensors.tensor(name) else {
        return Ok(false);
    };

    if view.dtype() != Dtype::F32 || view.shape() != blob.shape() {
        return Err(MlErr::size_mismatch(
            format!("tensor {name}"),
            view.shape().iter().product(),
            blob.count(),
        ));
    }

    for (x, bytes) in blob.data_mut().iter_mut().zip(view.data().chunks_exact(4)) {
        *x = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }

    Ok(true)
}

/// Writes the parameters of every layer of `net` to `path`.
pub fn save(net: &Net, path: &Path) -> Result<()> {
    let tensors = net.layers().iter().flat_map(|layer| {
        layer
            .params()
            .iter()
            .enumerate()
            .map(move |(i, blob)| (tensor_name(layer.name(), i), blob))
    });

    write_tensors(path, tensors, None)?;
    info!("saved trained layers to {}", path.display());
    Ok(())
}

/// Overwrites the parameters of every layer of `net` found in the weights file at `path`.
///
/// Layers missing from the file are left untouched.
pub fn load(net: &mut Net, path: &Path) -> Result<()> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    for layer in net.layers_mut() {
        let name = layer.name().to_string();
        let mut copied = 0;

        for (i, blob) in layer.params_mut().iter_mut().enumerate() {
            if read_tensor(&tensors, &tensor_name(&name, i), blob)? {
                copied += 1;
            }
        }

        match copied {
            0 => debug!(layer = name.as_str(); "no trained parameters, ignoring"),
            n => debug!(layer = name.as_str(), params = n; "copying trained parameters"),
        }
    }

    info!("copied trained layers from {}", path.display());
    Ok(())
}
