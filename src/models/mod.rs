/// Separation models
///
/// The epoch loops only need `candle_nn::ModuleT`: a mixture `[batch, channels,
/// time]` in, estimates `[batch, sources, channels, time']` out. `ConvSeparator`
/// is a small model of that shape used by the demo and the tests.
pub mod loader;

pub use loader::load_separator;

use candle_core::{Result, Tensor};
use candle_nn::{conv1d, Conv1d, Conv1dConfig, Module, ModuleT, VarBuilder};

use crate::SeparatorConfig;

/// Two-layer convolutional separator
///
/// The encoder is a valid (unpadded) convolution, so estimates are
/// `kernel_size - 1` samples shorter than the mixture.
pub struct ConvSeparator {
    encoder: Conv1d,
    decoder: Conv1d,
    config: SeparatorConfig,
}

impl ConvSeparator {
    pub fn new(config: SeparatorConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let encoder = conv1d(
            config.channels,
            config.hidden,
            config.kernel_size,
            Conv1dConfig::default(),
            vb.pp("encoder"),
        )?;
        let decoder = conv1d(
            config.hidden,
            config.output_channels(),
            1,
            Conv1dConfig::default(),
            vb.pp("decoder"),
        )?;

        Ok(Self {
            encoder,
            decoder,
            config,
        })
    }

    pub fn config(&self) -> &SeparatorConfig {
        &self.config
    }
}

impl ModuleT for ConvSeparator {
    fn forward_t(&self, mix: &Tensor, _train: bool) -> Result<Tensor> {
        let (batch, _channels, _time) = mix.dims3()?;

        let hidden = self.encoder.forward(mix)?.relu()?;
        let out = self.decoder.forward(&hidden)?;

        let time = out.dim(2)?;
        out.reshape((batch, self.config.sources, self.config.channels, time))
    }
}
