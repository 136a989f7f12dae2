/// Data loading modules for separation training
pub mod loader;
pub mod memory;
pub mod numpy_dataset;
pub mod sampler;

pub use loader::{Sampling, SourceDataLoader};
pub use memory::InMemoryDataset;
pub use numpy_dataset::{NumpyStemDataset, StemMetadata};
pub use sampler::DistributedSampler;

use candle_core::{Device, Tensor};

/// A dataset of multi-source examples
///
/// Each example is a tensor `[sources, channels, time]` holding the isolated
/// stems; all examples of a dataset share one shape.
pub trait SourceDataset: Sync {
    /// Number of examples
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load example `index` on the CPU
    fn get(&self, index: usize) -> crate::Result<Tensor>;
}

/// Generic data loader trait
pub trait BatchDataLoader {
    /// Get next batch `[batch, sources, channels, time]`
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<Tensor>>;

    /// Reset loader for a new pass
    fn reset(&mut self);

    /// Get total number of batches per pass
    fn num_batches(&self) -> usize;
}
