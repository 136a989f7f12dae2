/// Batched validation pass
use candle_core::{Device, D};
use candle_nn::ModuleT;

use super::loss::{scalar_value, Criterion};
use super::progress::batch_bar;
use crate::data::{BatchDataLoader, Sampling, SourceDataLoader, SourceDataset};
use crate::utils::center_trim;

/// Validation configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub progress: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 16,
            progress: true,
        }
    }
}

/// Running mean of the criterion over one sequential pass.
///
/// Every batch counts, including a smaller trailing one. Estimates are
/// detached from the autograd graph and no parameter is touched. Returns 0 for
/// an empty dataset.
pub fn validate_model<DS, M, C>(
    epoch: usize,
    dataset: &DS,
    model: &M,
    criterion: &C,
    config: &ValidationConfig,
    device: &Device,
) -> crate::Result<f64>
where
    DS: SourceDataset + ?Sized,
    M: ModuleT + ?Sized,
    C: Criterion + ?Sized,
{
    let mut loader =
        SourceDataLoader::new(dataset, config.batch_size, config.workers, Sampling::Sequential)?;
    let bar = batch_bar(
        loader.num_batches(),
        format!("[{:03}] valid", epoch),
        config.progress,
    );

    let mut total_loss = 0.0;
    let mut current_loss = 0.0;
    let mut processed = 0usize;
    while let Some(sources) = loader.next_batch(device)? {
        let mix = sources.sum(1)?;
        let estimates = model.forward_t(&mix, false)?.detach();
        let sources = center_trim(&sources, estimates.dim(D::Minus1)?)?;
        let loss = criterion.loss(&estimates, &sources)?;

        total_loss += scalar_value(&loss)?;
        processed += 1;
        current_loss = total_loss / processed as f64;

        bar.inc(1);
        bar.set_message(format!("loss={:.4}", current_loss));
    }
    bar.finish_and_clear();

    log::debug!("[{:03}] valid loss={:.4} over {} batches", epoch, current_loss, processed);
    Ok(current_loss)
}
