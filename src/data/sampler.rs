/// Distributed sampler: shards dataset indices across workers
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Splits `0..dataset_len` into `num_replicas` equally sized shards.
///
/// The index list is padded by wrap-around to a multiple of `num_replicas`, so
/// every worker sees the same number of samples. When shuffling, the permutation
/// is drawn from an RNG seeded with `seed + epoch`: all workers agree on it and
/// changing the epoch changes it.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    dataset_len: usize,
    num_replicas: usize,
    rank: usize,
    shuffle: bool,
    seed: u64,
    epoch: u64,
}

impl DistributedSampler {
    /// Create a shuffling sampler for worker `rank` of `num_replicas`
    pub fn new(dataset_len: usize, num_replicas: usize, rank: usize) -> crate::Result<Self> {
        if num_replicas == 0 {
            return Err(crate::DemixError::Config(
                "num_replicas must be > 0".to_string(),
            ));
        }
        if rank >= num_replicas {
            return Err(crate::DemixError::Config(format!(
                "invalid rank {} for {} replicas",
                rank, num_replicas
            )));
        }

        Ok(Self {
            dataset_len,
            num_replicas,
            rank,
            shuffle: true,
            seed: 0,
            epoch: 0,
        })
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the epoch used to seed the next permutation
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Move on to the next epoch's permutation
    pub fn advance_epoch(&mut self) {
        self.epoch += 1;
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_replicas(&self) -> usize {
        self.num_replicas
    }

    /// Number of samples this worker draws per pass
    pub fn num_samples(&self) -> usize {
        self.dataset_len.div_ceil(self.num_replicas)
    }

    /// Indices of this worker's shard for the current epoch
    pub fn indices(&self) -> Vec<usize> {
        if self.dataset_len == 0 {
            return Vec::new();
        }

        let mut indices: Vec<usize> = (0..self.dataset_len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            indices.shuffle(&mut rng);
        }

        let total_size = self.num_samples() * self.num_replicas;
        indices
            .iter()
            .copied()
            .cycle()
            .take(total_size)
            .skip(self.rank)
            .step_by(self.num_replicas)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_shards_cover_dataset() {
        let samplers: Vec<_> = (0..3)
            .map(|rank| DistributedSampler::new(10, 3, rank).unwrap())
            .collect();

        let mut seen = HashSet::new();
        for sampler in &samplers {
            let shard = sampler.indices();
            // ceil(10 / 3) = 4, padded by wrap-around
            assert_eq!(shard.len(), 4);
            seen.extend(shard);
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn test_unshuffled_interleaving() {
        let sampler = DistributedSampler::new(5, 2, 1).unwrap().with_shuffle(false);
        // padded to [0, 1, 2, 3, 4, 0]; rank 1 takes odd positions
        assert_eq!(sampler.indices(), vec![1, 3, 0]);
    }

    #[test]
    fn test_epoch_changes_permutation() {
        let mut sampler = DistributedSampler::new(64, 2, 0).unwrap();
        sampler.set_epoch(7);
        let first = sampler.indices();
        assert_eq!(first, sampler.indices());

        sampler.advance_epoch();
        assert_eq!(sampler.epoch(), 8);
        assert_ne!(first, sampler.indices());
    }

    #[test]
    fn test_ranks_agree_on_permutation() {
        let mut a = DistributedSampler::new(20, 2, 0).unwrap().with_seed(3);
        let mut b = DistributedSampler::new(20, 2, 1).unwrap().with_seed(3);
        a.set_epoch(5);
        b.set_epoch(5);

        let mut all: Vec<usize> = a.indices().into_iter().chain(b.indices()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_rank() {
        assert!(DistributedSampler::new(10, 2, 2).is_err());
        assert!(DistributedSampler::new(10, 0, 0).is_err());
    }
}
