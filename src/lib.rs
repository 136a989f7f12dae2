//! Demix - epoch training loops for audio source separation
//!
//! Trains and validates separation models built on candle: each batch holds the
//! isolated sources of a mixture, the model sees their sum and has to give
//! every source back.
//!
//! # Layout
//!
//! - **data**: datasets of stems, batch loading, distributed sharding
//! - **training**: the epoch trainer and validator, criteria, diffq size penalty
//! - **distributed**: process-group seam and metric averaging across workers
//! - **models**: a small convolutional separator and weight loading
//!
//! # Example
//!
//! ```ignore
//! use demix::training::{train_model, SizePenalty, TrainingConfig, L1Loss, Identity};
//! use demix::distributed::SingleProcess;
//!
//! let summary = train_model(
//!     epoch, &dataset, &model, &varmap.all_vars(), &L1Loss, &mut optimizer,
//!     &Identity, SizePenalty::None, &TrainingConfig::default(), &device, &SingleProcess,
//! )?;
//! ```

pub mod config;
pub mod data;
pub mod distributed;
pub mod models;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use config::SeparatorConfig;
pub use models::ConvSeparator;
pub use utils::center_trim;

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum DemixError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Data(String),

    #[error("Distributed error: {0}")]
    Distributed(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NumPy read error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),
}

pub type Result<T> = std::result::Result<T, DemixError>;
