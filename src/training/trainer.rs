/// Epoch training loop for separation models
use candle_core::backprop::GradStore;
use candle_core::{Device, Var, D};
use candle_nn::{ModuleT, Optimizer};
use std::path::Path;

use super::augment::{Augment, Identity};
use super::loss::{scalar_value, Criterion};
use super::progress::batch_bar;
use super::quantizer::{Quantizer, SizePenalty};
use super::validator::{validate_model, ValidationConfig};
use crate::data::{BatchDataLoader, DistributedSampler, Sampling, SourceDataLoader, SourceDataset};
use crate::distributed::{average_metric, ProcessGroup, SingleProcess};
use crate::utils::center_trim;

/// Training configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Full passes over the dataset per epoch
    pub repeat: usize,
    /// Offsets the distributed shuffling by `seed * 1000`; seeds the local
    /// shuffle otherwise
    pub seed: Option<u64>,
    /// Data loading threads (0 loads on the training thread)
    pub workers: usize,
    /// Global batch size, split evenly across distributed workers
    pub batch_size: usize,
    /// Show a progress bar per pass
    pub progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            repeat: 1,
            seed: None,
            workers: 4,
            batch_size: 16,
            progress: true,
        }
    }
}

impl TrainingConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let reader = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Validate configuration for a group of `world_size` workers
    pub fn validate(&self, world_size: usize) -> crate::Result<()> {
        if self.repeat == 0 {
            return Err(crate::DemixError::Config("repeat must be > 0".to_string()));
        }

        if effective_batch_size(self.batch_size, world_size) == 0 {
            return Err(crate::DemixError::Config(format!(
                "batch_size {} is too small for {} workers",
                self.batch_size, world_size
            )));
        }

        Ok(())
    }
}

/// Result of one training epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSummary {
    /// Running mean of the criterion loss over the last repetition, averaged
    /// across workers
    pub loss: f64,
    /// Model size of the last batch in MB, 0 without a quantizer
    pub model_size: f64,
}

/// Per-worker batch size
pub fn effective_batch_size(batch_size: usize, world_size: usize) -> usize {
    if world_size > 1 {
        batch_size / world_size
    } else {
        batch_size
    }
}

/// Epoch handed to the distributed sampler at the start of `epoch`
///
/// `epoch * repeat + seed * 1000`, wrapping on overflow: the value only seeds a
/// permutation.
pub fn sampler_epoch(epoch: usize, repeat: usize, seed: Option<u64>) -> u64 {
    let base = (epoch as u64).wrapping_mul(repeat as u64);
    match seed {
        Some(seed) => seed.wrapping_mul(1000).wrapping_add(base),
        None => base,
    }
}

/// Global L2 norm of the gradients of `params`; parameters without a gradient
/// count as zero.
pub fn grad_norm(grads: &GradStore, params: &[Var]) -> crate::Result<f64> {
    let mut total = 0.0;
    for var in params {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total += scalar_value(&grad.sqr()?.sum_all()?)?;
        }
    }
    Ok(total.sqrt())
}

/// Train for one epoch: `config.repeat` passes over the dataset.
///
/// Only full batches are used; a smaller trailing batch is skipped and does
/// not count towards the running mean. `_augment` is accepted but not applied:
/// batch remixing is disabled in this loop. The reported loss is the running mean
/// of the criterion loss over the *last* repetition, without the size penalty.
#[allow(clippy::too_many_arguments)]
pub fn train_model<DS, M, C, O>(
    epoch: usize,
    dataset: &DS,
    model: &M,
    params: &[Var],
    criterion: &C,
    optimizer: &mut O,
    _augment: &dyn Augment,
    penalty: SizePenalty<'_>,
    config: &TrainingConfig,
    device: &Device,
    group: &dyn ProcessGroup,
) -> crate::Result<TrainSummary>
where
    DS: SourceDataset + ?Sized,
    M: ModuleT + ?Sized,
    C: Criterion + ?Sized,
    O: Optimizer,
{
    let world_size = group.world_size();
    config.validate(world_size)?;

    let batch_size = effective_batch_size(config.batch_size, world_size);
    let sampling = if world_size > 1 {
        let mut sampler = DistributedSampler::new(dataset.len(), world_size, group.rank())?;
        sampler.set_epoch(sampler_epoch(epoch, config.repeat, config.seed));
        Sampling::Distributed(sampler)
    } else {
        Sampling::Shuffle {
            seed: config.seed.map(|seed| sampler_epoch(epoch, config.repeat, Some(seed))),
        }
    };
    let mut loader = SourceDataLoader::new(dataset, batch_size, config.workers, sampling)?;

    let mut current_loss = 0.0;
    let mut model_size = 0.0;
    for repetition in 0..config.repeat {
        if repetition > 0 {
            loader.reset();
        }
        let bar = batch_bar(
            loader.num_batches(),
            format!("[{:03}] train ({}/{})", epoch, repetition + 1, config.repeat),
            config.progress,
        );

        let mut total_loss = 0.0;
        let mut processed = 0usize;
        while let Some(sources) = loader.next_batch(device)? {
            bar.inc(1);
            if sources.dim(0)? < batch_size {
                log::debug!("skipping incomplete batch of {}", sources.dim(0)?);
                continue;
            }

            let mix = sources.sum(1)?;
            let estimates = model.forward_t(&mix, true)?;
            let sources = center_trim(&sources, estimates.dim(D::Minus1)?)?;
            let loss = criterion.loss(&estimates, &sources)?;

            let (train_loss, size) = match penalty {
                SizePenalty::None => (loss.clone(), None),
                SizePenalty::Quantized { quantizer, diffq } => {
                    let size = quantizer.model_size()?;
                    let train_loss = loss.broadcast_add(&size.affine(diffq, 0.0)?)?;
                    (train_loss, Some(size))
                }
            };

            let grads = train_loss.backward()?;
            let norm = grad_norm(&grads, params)?;
            optimizer.step(&grads)?;
            drop(grads);

            model_size = match size {
                Some(size) => scalar_value(&size)?,
                None => 0.0,
            };

            total_loss += scalar_value(&loss)?;
            processed += 1;
            current_loss = total_loss / processed as f64;

            bar.set_message(format!(
                "loss={:.4} ms={:.2} grad={:.5}",
                current_loss, model_size, norm
            ));
            log::debug!(
                "[{:03}] batch {}: loss={:.4} ms={:.2} grad={:.5}",
                epoch,
                processed,
                current_loss,
                model_size,
                norm
            );

            // free the batch before the next one is loaded
            drop((sources, mix, estimates, loss, train_loss));
        }
        bar.finish_and_clear();

        if let Some(sampler) = loader.sampler_mut() {
            sampler.advance_epoch();
        }
    }

    if world_size > 1 {
        current_loss = average_metric(group, current_loss, 1.0)?;
    }

    Ok(TrainSummary {
        loss: current_loss,
        model_size,
    })
}

/// Losses recorded for one epoch of [`Trainer::fit`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    pub model_size: f64,
    pub best_loss: f64,
}

/// Trainer for separation models
///
/// Owns the model, optimizer and criterion and alternates [`train_model`] and
/// [`validate_model`] over a number of epochs.
pub struct Trainer<M, C, O> {
    model: M,
    params: Vec<Var>,
    criterion: C,
    optimizer: O,
    quantizer: Option<(Box<dyn Quantizer>, f64)>,
    config: TrainingConfig,
    valid_config: ValidationConfig,
    device: Device,
    group: Box<dyn ProcessGroup>,
}

impl<M, C, O> Trainer<M, C, O>
where
    M: ModuleT,
    C: Criterion,
    O: Optimizer,
{
    /// Create new trainer; `params` are the model variables, used for the
    /// gradient norm
    pub fn new(
        model: M,
        params: Vec<Var>,
        criterion: C,
        optimizer: O,
        config: TrainingConfig,
        device: Device,
    ) -> Self {
        let valid_config = ValidationConfig {
            workers: config.workers,
            batch_size: config.batch_size,
            progress: config.progress,
        };

        Self {
            model,
            params,
            criterion,
            optimizer,
            quantizer: None,
            config,
            valid_config,
            device,
            group: Box::new(SingleProcess),
        }
    }

    /// Penalize `diffq * quantizer.model_size()`; the quantizer's own vars must
    /// already be registered with the optimizer
    pub fn with_quantizer(mut self, quantizer: Box<dyn Quantizer>, diffq: f64) -> Self {
        self.quantizer = Some((quantizer, diffq));
        self
    }

    pub fn with_group(mut self, group: Box<dyn ProcessGroup>) -> Self {
        self.group = group;
        self
    }

    pub fn with_validation(mut self, valid_config: ValidationConfig) -> Self {
        self.valid_config = valid_config;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Train for one epoch
    pub fn train_epoch<DS>(&mut self, epoch: usize, dataset: &DS) -> crate::Result<TrainSummary>
    where
        DS: SourceDataset + ?Sized,
    {
        let penalty = match &self.quantizer {
            Some((quantizer, diffq)) => SizePenalty::Quantized {
                quantizer: quantizer.as_ref(),
                diffq: *diffq,
            },
            None => SizePenalty::None,
        };

        train_model(
            epoch,
            dataset,
            &self.model,
            &self.params,
            &self.criterion,
            &mut self.optimizer,
            &Identity,
            penalty,
            &self.config,
            &self.device,
            self.group.as_ref(),
        )
    }

    /// Validation loss for one epoch
    pub fn validate<DS>(&self, epoch: usize, dataset: &DS) -> crate::Result<f64>
    where
        DS: SourceDataset + ?Sized,
    {
        validate_model(
            epoch,
            dataset,
            &self.model,
            &self.criterion,
            &self.valid_config,
            &self.device,
        )
    }

    /// Full training loop
    pub fn fit<T, V>(&mut self, train_set: &T, valid_set: &V, epochs: usize) -> crate::Result<Vec<EpochMetrics>>
    where
        T: SourceDataset + ?Sized,
        V: SourceDataset + ?Sized,
    {
        log::info!("Starting training for {} epochs", epochs);
        log::info!(
            "Train set: {} examples, valid set: {} examples",
            train_set.len(),
            valid_set.len()
        );

        let mut history = Vec::with_capacity(epochs);
        let mut best_loss = f64::INFINITY;
        for epoch in 0..epochs {
            let summary = self.train_epoch(epoch, train_set)?;
            let valid_loss = self.validate(epoch, valid_set)?;
            best_loss = best_loss.min(valid_loss);

            log::info!(
                "Epoch {:03}: train={:.8} valid={:.8} best={:.4} ms={:.2}MB",
                epoch,
                summary.loss,
                valid_loss,
                best_loss,
                summary.model_size
            );

            history.push(EpochMetrics {
                epoch,
                train_loss: summary.loss,
                valid_loss,
                model_size: summary.model_size,
                best_loss,
            });
        }

        log::info!("Training complete!");
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Tensor};

    #[test]
    fn test_effective_batch_size() {
        assert_eq!(effective_batch_size(16, 1), 16);
        assert_eq!(effective_batch_size(16, 2), 8);
        assert_eq!(effective_batch_size(16, 3), 5);
        assert_eq!(effective_batch_size(2, 4), 0);
    }

    #[test]
    fn test_sampler_epoch() {
        assert_eq!(sampler_epoch(3, 2, None), 6);
        assert_eq!(sampler_epoch(3, 2, Some(5)), 5006);
        assert_eq!(sampler_epoch(0, 4, Some(0)), 0);
    }

    #[test]
    fn test_sampler_epoch_wraps_large_seeds() {
        let seed = u64::MAX / 10;
        assert_eq!(
            sampler_epoch(2, 3, Some(seed)),
            seed.wrapping_mul(1000).wrapping_add(6)
        );
        assert_eq!(sampler_epoch(usize::MAX, 2, None), (usize::MAX as u64).wrapping_mul(2));
    }

    #[test]
    fn test_grad_norm_skips_missing_gradients() -> crate::Result<()> {
        let device = Device::Cpu;
        let a = Var::new(&[3f32], &device)?;
        let b = Var::new(&[4f32], &device)?;
        let unused = Var::zeros(8, DType::F32, &device)?;

        // d(ab)/da = b = 4, d(ab)/db = a = 3
        let loss = (a.as_tensor() * b.as_tensor())?.sum_all()?;
        let grads = loss.backward()?;

        let norm = grad_norm(&grads, &[a, b, unused])?;
        assert!((norm - 5.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_grad_norm_empty() -> crate::Result<()> {
        let x = Tensor::new(&[1f32], &Device::Cpu)?;
        let grads = x.sum_all()?.backward()?;
        assert_eq!(grad_norm(&grads, &[])?, 0.0);
        Ok(())
    }

    #[test]
    fn test_config_validation() {
        let config = TrainingConfig::default();
        assert!(config.validate(1).is_ok());
        assert!(config.validate(32).is_err());

        let config = TrainingConfig {
            repeat: 0,
            ..Default::default()
        };
        assert!(config.validate(1).is_err());
    }

    #[test]
    fn test_config_json_defaults() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("train.json");
        std::fs::write(&path, r#"{"repeat": 3, "seed": 42}"#)?;

        let config = TrainingConfig::from_json_file(&path)?;
        assert_eq!(config.repeat, 3);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.batch_size, 16);
        assert!(config.progress);
        Ok(())
    }
}
