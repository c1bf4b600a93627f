mod activation;
mod data;
mod euclidean_loss;
mod inner_product;

pub use activation::{Activation, ActivationKind};
pub use data::DataLayer;
pub use euclidean_loss::EuclideanLoss;
pub use inner_product::InnerProduct;
use rand::rngs::StdRng;

use crate::{
    Blob, MlErr, Result,
    config::{LayerConfig, LayerKind},
};

/// One node of a net's computation graph.
///
/// A layer reads its bottom blobs and writes its top blobs on `forward`, and
/// writes the gradient of its bottoms (and accumulates the gradient of its
/// parameters) on `backward`.
pub trait Layer: Send {
    fn name(&self) -> &str;

    /// The layer's type name, as written in net definitions.
    fn kind(&self) -> &'static str;

    /// The amount of bottom and top blobs the layer works with.
    fn arity(&self) -> (usize, usize);

    fn params(&self) -> &[Blob] {
        &[]
    }

    fn params_mut(&mut self) -> &mut [Blob] {
        &mut []
    }

    /// The weight of this layer's first top in the net's loss, `0` for non loss layers.
    fn loss_weight(&self) -> f32 {
        0.0
    }

    /// Restricts the layer to the `rank`th of `count` shards of its input, if it has one.
    fn shard(&mut self, _rank: usize, _count: usize) {}

    /// Initializes the layer's parameters and shapes its tops.
    ///
    /// # Arguments
    /// * `bottom` - The layer's inputs.
    /// * `top` - The layer's outputs, to be reshaped.
    /// * `rng` - The generator used by parameter fillers.
    fn setup(&mut self, bottom: &[Blob], top: &mut [Blob], rng: &mut StdRng) -> Result<()>;

    fn forward(&mut self, bottom: &[Blob], top: &mut [Blob]) -> Result<()>;

    /// Computes the gradient of the bottoms marked in `propagate_down` and
    /// accumulates the gradient of the layer's parameters.
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &mut [Blob]) -> Result<()>;
}

/// Builds the layer described by `config`.
pub fn build(config: &LayerConfig) -> Result<Box<dyn Layer>> {
    let name = config.name.clone();

    let layer: Box<dyn Layer> = match &config.kind {
        LayerKind::Data(data) => Box::new(DataLayer::new(name, data.clone())?),
        LayerKind::InnerProduct {
            num_output,
            weight_filler,
            bias_filler,
        } => Box::new(InnerProduct::new(
            name,
            *num_output,
            *weight_filler,
            *bias_filler,
        )),
        LayerKind::ReLU => Box::new(Activation::new(name, ActivationKind::ReLU)),
        LayerKind::Sigmoid => Box::new(Activation::new(name, ActivationKind::Sigmoid)),
        LayerKind::EuclideanLoss { loss_weight } => Box::new(EuclideanLoss::new(name, *loss_weight)),
    };

    let (bottoms, tops) = layer.arity();
    if config.bottom.len() != bottoms || config.top.len() != tops {
        return Err(MlErr::InvalidConfig(format!(
            "{} layer {} takes {bottoms} bottoms and {tops} tops, got {} and {}",
            layer.kind(),
            config.name,
            config.bottom.len(),
            config.top.len(),
        )));
    }

    Ok(layer)
}
