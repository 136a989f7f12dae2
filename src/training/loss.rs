/// Reconstruction criteria
use candle_core::{DType, Tensor};

/// Maps (estimates, sources) of the same shape to a scalar loss tensor
pub trait Criterion {
    fn loss(&self, estimates: &Tensor, sources: &Tensor) -> crate::Result<Tensor>;
}

/// Mean absolute error
#[derive(Debug, Clone, Copy, Default)]
pub struct L1Loss;

impl Criterion for L1Loss {
    fn loss(&self, estimates: &Tensor, sources: &Tensor) -> crate::Result<Tensor> {
        Ok((estimates - sources)?.abs()?.mean_all()?)
    }
}

/// Mean squared error
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl Criterion for MseLoss {
    fn loss(&self, estimates: &Tensor, sources: &Tensor) -> crate::Result<Tensor> {
        Ok(candle_nn::loss::mse(estimates, sources)?)
    }
}

/// Criterion backed by a closure
pub struct FnCriterion<F>(pub F);

impl<F> Criterion for FnCriterion<F>
where
    F: Fn(&Tensor, &Tensor) -> crate::Result<Tensor>,
{
    fn loss(&self, estimates: &Tensor, sources: &Tensor) -> crate::Result<Tensor> {
        (self.0)(estimates, sources)
    }
}

/// Read a single-element tensor as f64
pub fn scalar_value(tensor: &Tensor) -> crate::Result<f64> {
    let values = tensor.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;
    match values.as_slice() {
        [value] => Ok(*value),
        _ => Err(crate::DemixError::Training(format!(
            "expected a scalar, got shape {:?}",
            tensor.dims()
        ))),
    }
}
