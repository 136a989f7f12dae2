/// Weight loading from safetensors files
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;

use super::ConvSeparator;
use crate::SeparatorConfig;

/// Load a separator from a safetensors file
///
/// The file is the one written by `VarMap::save` for a model built with the
/// same configuration.
pub fn load_separator<P: AsRef<Path>>(
    config: SeparatorConfig,
    weights_path: P,
    device: &Device,
) -> crate::Result<ConvSeparator> {
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path.as_ref()], DType::F32, device)?
    };

    ConvSeparator::new(config, vb)
}
