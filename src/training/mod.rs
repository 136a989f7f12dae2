/// Training infrastructure for separation models
pub mod augment;
pub mod loss;
pub mod quantizer;
pub mod trainer;
pub mod validator;

mod progress;

pub use augment::{Augment, Identity};
pub use loss::{scalar_value, Criterion, FnCriterion, L1Loss, MseLoss};
pub use quantizer::{DiffQuantizer, DiffQuantizerConfig, Quantizer, SizePenalty};
pub use trainer::{
    effective_batch_size, grad_norm, sampler_epoch, train_model, EpochMetrics, TrainSummary,
    Trainer, TrainingConfig,
};
pub use validator::{validate_model, ValidationConfig};
