/// Batch loader over a source dataset
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use super::{BatchDataLoader, DistributedSampler, SourceDataset};

/// Order in which examples are visited on each pass
#[derive(Debug, Clone)]
pub enum Sampling {
    /// Dataset order
    Sequential,
    /// Fresh permutation of the whole dataset on every pass. With a seed, pass
    /// `k` uses `seed + k`; without one, the thread RNG.
    Shuffle { seed: Option<u64> },
    /// This worker's shard, permuted per sampler epoch
    Distributed(DistributedSampler),
}

/// Collates examples of a [`SourceDataset`] into batches
///
/// Examples are fetched on a rayon pool of `workers` threads; with zero workers
/// they are loaded on the calling thread. The last batch of a pass may be
/// smaller than `batch_size`.
pub struct SourceDataLoader<'a, D: SourceDataset + ?Sized> {
    dataset: &'a D,
    batch_size: usize,
    sampling: Sampling,
    indices: Vec<usize>,
    current_idx: usize,
    passes: u64,
    pool: Option<rayon::ThreadPool>,
}

impl<'a, D: SourceDataset + ?Sized> SourceDataLoader<'a, D> {
    /// Create new data loader
    pub fn new(
        dataset: &'a D,
        batch_size: usize,
        workers: usize,
        sampling: Sampling,
    ) -> crate::Result<Self> {
        if batch_size == 0 {
            return Err(crate::DemixError::Config(
                "batch_size must be > 0".to_string(),
            ));
        }

        let pool = if workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| crate::DemixError::Data(format!("worker pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        let mut loader = Self {
            dataset,
            batch_size,
            sampling,
            indices: Vec::new(),
            current_idx: 0,
            passes: 0,
            pool,
        };
        loader.indices = loader.pass_order();
        Ok(loader)
    }

    fn pass_order(&self) -> Vec<usize> {
        match &self.sampling {
            Sampling::Sequential => (0..self.dataset.len()).collect(),
            Sampling::Shuffle { seed } => {
                let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
                match seed {
                    Some(seed) => {
                        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(self.passes));
                        indices.shuffle(&mut rng);
                    }
                    None => indices.shuffle(&mut rand::thread_rng()),
                }
                indices
            }
            Sampling::Distributed(sampler) => sampler.indices(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn sampling(&self) -> &Sampling {
        &self.sampling
    }

    /// Distributed sampler, when sharding
    pub fn sampler_mut(&mut self) -> Option<&mut DistributedSampler> {
        match &mut self.sampling {
            Sampling::Distributed(sampler) => Some(sampler),
            _ => None,
        }
    }

    /// Indices visited by the current pass
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn load_examples(&self, batch_indices: &[usize]) -> crate::Result<Vec<Tensor>> {
        let dataset = self.dataset;
        match &self.pool {
            Some(pool) => pool.install(|| {
                batch_indices
                    .par_iter()
                    .map(|&idx| dataset.get(idx))
                    .collect::<crate::Result<Vec<_>>>()
            }),
            None => batch_indices
                .iter()
                .map(|&idx| dataset.get(idx))
                .collect::<crate::Result<Vec<_>>>(),
        }
    }
}

impl<D: SourceDataset + ?Sized> BatchDataLoader for SourceDataLoader<'_, D> {
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<Tensor>> {
        if self.current_idx >= self.indices.len() {
            return Ok(None);
        }

        let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
        let examples = self.load_examples(&self.indices[self.current_idx..end_idx])?;
        self.current_idx = end_idx;

        let batch = Tensor::stack(&examples, 0)?.to_device(device)?;
        Ok(Some(batch))
    }

    fn reset(&mut self) {
        self.current_idx = 0;
        self.passes += 1;
        self.indices = self.pass_order();
    }

    fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataset;
    use candle_core::DType;

    fn indexed_dataset(n: usize) -> crate::Result<InMemoryDataset> {
        let examples = (0..n)
            .map(|i| Tensor::full(i as f32, (2, 1, 4), &Device::Cpu))
            .collect::<candle_core::Result<Vec<_>>>()?;
        InMemoryDataset::new(examples)
    }

    fn batch_sizes(loader: &mut SourceDataLoader<'_, InMemoryDataset>) -> crate::Result<Vec<usize>> {
        let mut sizes = Vec::new();
        while let Some(batch) = loader.next_batch(&Device::Cpu)? {
            sizes.push(batch.dim(0)?);
        }
        Ok(sizes)
    }

    #[test]
    fn test_last_batch_is_partial() -> crate::Result<()> {
        let dataset = indexed_dataset(17)?;
        let mut loader = SourceDataLoader::new(&dataset, 4, 0, Sampling::Shuffle { seed: None })?;

        assert_eq!(loader.num_batches(), 5);
        assert_eq!(batch_sizes(&mut loader)?, vec![4, 4, 4, 4, 1]);
        Ok(())
    }

    #[test]
    fn test_sequential_order_with_workers() -> crate::Result<()> {
        let dataset = indexed_dataset(6)?;
        let mut loader = SourceDataLoader::new(&dataset, 4, 2, Sampling::Sequential)?;

        let batch = loader.next_batch(&Device::Cpu)?.unwrap();
        assert_eq!(batch.dims(), &[4, 2, 1, 4]);
        let firsts = batch.narrow(3, 0, 1)?.narrow(1, 0, 1)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(firsts, vec![0., 1., 2., 3.]);
        Ok(())
    }

    #[test]
    fn test_reset_reshuffles_with_seed() -> crate::Result<()> {
        let dataset = indexed_dataset(32)?;
        let mut loader = SourceDataLoader::new(&dataset, 8, 0, Sampling::Shuffle { seed: Some(1) })?;
        let first = loader.indices().to_vec();

        loader.reset();
        assert_ne!(first, loader.indices());

        let mut sorted = loader.indices().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_distributed_reset_follows_sampler_epoch() -> crate::Result<()> {
        let dataset = indexed_dataset(16)?;
        let sampler = DistributedSampler::new(dataset.len(), 2, 0)?;
        let mut loader = SourceDataLoader::new(&dataset, 4, 0, Sampling::Distributed(sampler))?;
        assert_eq!(loader.num_batches(), 2);

        let before = loader.indices().to_vec();
        loader.reset();
        assert_eq!(before, loader.indices());

        if let Some(sampler) = loader.sampler_mut() {
            sampler.advance_epoch();
        }
        loader.reset();
        assert_ne!(before, loader.indices());
        Ok(())
    }

    #[test]
    fn test_zero_batch_size() -> crate::Result<()> {
        let dataset = InMemoryDataset::new(vec![Tensor::zeros((1, 1, 2), DType::F32, &Device::Cpu)?])?;
        assert!(SourceDataLoader::new(&dataset, 0, 0, Sampling::Sequential).is_err());
        Ok(())
    }
}
