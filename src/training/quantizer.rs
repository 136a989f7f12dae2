/// Differentiable model-size penalty (diffq)
///
/// Quantization-aware training adds `diffq * model_size` to the training loss,
/// where `model_size` is a differentiable estimate of the quantized model's
/// footprint in megabytes.
use candle_core::{DType, Device, Tensor, Var};

/// Exposes a differentiable model-size estimate
pub trait Quantizer {
    /// Scalar tensor, in MB
    fn model_size(&self) -> crate::Result<Tensor>;
}

/// How the training loss is formed
#[derive(Clone, Copy)]
pub enum SizePenalty<'a> {
    /// `train_loss = loss`; reported model size is 0
    None,
    /// `train_loss = loss + diffq * quantizer.model_size()`
    Quantized {
        quantizer: &'a dyn Quantizer,
        diffq: f64,
    },
}

/// DiffQuantizer configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DiffQuantizerConfig {
    pub min_bits: f64,
    pub max_bits: f64,
    /// Bit width every group starts at
    pub init_bits: f64,
}

impl Default for DiffQuantizerConfig {
    fn default() -> Self {
        Self {
            min_bits: 2.0,
            max_bits: 15.0,
            init_bits: 8.0,
        }
    }
}

/// Learns one bit width per parameter tensor.
///
/// `bits = min_bits + (max_bits - min_bits) * sigmoid(logit)` and the model size
/// is `sum(numel * bits) / 8 / 2^20` MB. The logits are trainable: hand
/// [`DiffQuantizer::vars`] to the optimizer together with the model's vars.
pub struct DiffQuantizer {
    config: DiffQuantizerConfig,
    logits: Vec<Var>,
    numels: Tensor,
}

impl DiffQuantizer {
    pub fn new(params: &[Var], config: DiffQuantizerConfig, device: &Device) -> crate::Result<Self> {
        if config.max_bits <= config.min_bits {
            return Err(crate::DemixError::Config(
                "max_bits must be > min_bits".to_string(),
            ));
        }
        if config.init_bits <= config.min_bits || config.init_bits >= config.max_bits {
            return Err(crate::DemixError::Config(
                "init_bits must lie strictly between min_bits and max_bits".to_string(),
            ));
        }
        if params.is_empty() {
            return Err(crate::DemixError::Config(
                "no parameters to quantize".to_string(),
            ));
        }

        let p = (config.init_bits - config.min_bits) / (config.max_bits - config.min_bits);
        let init_logit = (p / (1.0 - p)).ln() as f32;

        let logits = params
            .iter()
            .map(|_| Var::new(&[init_logit], device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let numels: Vec<f32> = params.iter().map(|v| v.elem_count() as f32).collect();
        let numels = Tensor::from_vec(numels, params.len(), device)?;

        Ok(Self {
            config,
            logits,
            numels,
        })
    }

    /// Trainable bit-width logits
    pub fn vars(&self) -> Vec<Var> {
        self.logits.clone()
    }

    /// Current bit width of each parameter tensor
    pub fn bits(&self) -> crate::Result<Tensor> {
        let logits: Vec<&Tensor> = self.logits.iter().map(|v| v.as_tensor()).collect();
        let logits = Tensor::cat(&logits, 0)?;
        let sigmoid = (logits.neg()?.exp()? + 1.0)?.recip()?;
        let span = self.config.max_bits - self.config.min_bits;
        Ok(sigmoid.affine(span, self.config.min_bits)?)
    }
}

impl Quantizer for DiffQuantizer {
    fn model_size(&self) -> crate::Result<Tensor> {
        let bits = self.bits()?.to_dtype(DType::F32)?;
        let total_bits = (bits * &self.numels)?.sum_all()?;
        Ok(total_bits.affine(1.0 / (8.0 * 1024.0 * 1024.0), 0.0)?)
    }
}
