/// Configuration for the convolutional separator
///
/// The model maps a mixture `[batch, channels, time]` to one estimate per source,
/// `[batch, sources, channels, time - kernel_size + 1]`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SeparatorConfig {
    /// Number of sources to separate
    pub sources: usize,

    /// Audio channels (2 for stereo)
    pub channels: usize,

    /// Width of the hidden convolution
    pub hidden: usize,

    /// Kernel size of the encoder convolution (no padding)
    pub kernel_size: usize,
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            sources: 4,
            channels: 2,
            hidden: 48,
            kernel_size: 8,
        }
    }
}

impl SeparatorConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.sources == 0 || self.channels == 0 {
            return Err(crate::DemixError::Config(
                "sources and channels must be > 0".to_string(),
            ));
        }

        if self.hidden == 0 {
            return Err(crate::DemixError::Config("hidden must be > 0".to_string()));
        }

        if self.kernel_size == 0 {
            return Err(crate::DemixError::Config(
                "kernel_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Number of output channels of the decoder
    pub fn output_channels(&self) -> usize {
        self.sources * self.channels
    }

    /// Length of the estimates for a mixture of `input_len` samples
    pub fn output_len(&self, input_len: usize) -> usize {
        (input_len + 1).saturating_sub(self.kernel_size)
    }
}
