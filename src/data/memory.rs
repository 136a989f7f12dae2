/// Dataset held entirely in memory
use candle_core::{Device, Tensor};

use super::SourceDataset;

/// Examples kept as CPU tensors `[sources, channels, time]`
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    examples: Vec<Tensor>,
}

impl InMemoryDataset {
    /// Build from examples, checking they all share one rank-3 shape
    pub fn new(examples: Vec<Tensor>) -> crate::Result<Self> {
        if let Some(first) = examples.first() {
            if first.rank() != 3 {
                return Err(crate::DemixError::Data(format!(
                    "expected examples of shape [sources, channels, time], got {:?}",
                    first.dims()
                )));
            }
            if let Some(bad) = examples.iter().find(|e| e.dims() != first.dims()) {
                return Err(crate::DemixError::Data(format!(
                    "shape mismatch: {:?} != {:?}",
                    bad.dims(),
                    first.dims()
                )));
            }
        }

        let examples = examples
            .into_iter()
            .map(|e| e.to_device(&Device::Cpu))
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self { examples })
    }

    /// Split a stacked tensor `[N, sources, channels, time]` into examples
    pub fn from_stacked(stems: &Tensor) -> crate::Result<Self> {
        let n = stems.dim(0)?;
        let examples = (0..n)
            .map(|i| stems.get(i))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Self::new(examples)
    }
}

impl SourceDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.examples.len()
    }

    fn get(&self, index: usize) -> crate::Result<Tensor> {
        self.examples.get(index).cloned().ok_or_else(|| {
            crate::DemixError::Data(format!(
                "index {} out of range for {} examples",
                index,
                self.examples.len()
            ))
        })
    }
}
