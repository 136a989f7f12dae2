/// Batch augmentation seam
use candle_core::Tensor;

/// Transforms a batch of sources `[batch, sources, channels, time]`.
///
/// `train_model` takes one but does not apply it: batch remixing is disabled,
/// while the full-batch filtering it depends on stays in place.
pub trait Augment {
    fn augment(&self, sources: &Tensor) -> crate::Result<Tensor>;
}

/// Leaves the batch untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Augment for Identity {
    fn augment(&self, sources: &Tensor) -> crate::Result<Tensor> {
        Ok(sources.clone())
    }
}
