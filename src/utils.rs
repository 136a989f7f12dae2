/// Utility functions for separation training
use candle_core::{Tensor, D};

/// Trim the time axis of `tensor` to `reference_len` samples, symmetrically.
///
/// With `delta = len - reference_len`, `delta / 2` samples are dropped from the
/// front and the remainder from the back.
pub fn center_trim(tensor: &Tensor, reference_len: usize) -> crate::Result<Tensor> {
    let len = tensor.dim(D::Minus1)?;
    if reference_len > len {
        return Err(crate::DemixError::Training(format!(
            "cannot center trim {} samples to {}",
            len, reference_len
        )));
    }

    let delta = len - reference_len;
    if delta == 0 {
        return Ok(tensor.clone());
    }
    Ok(tensor.narrow(D::Minus1, delta / 2, reference_len)?)
}

/// Calculate the number of parameters in a tensor
pub fn count_parameters(tensor: &Tensor) -> usize {
    tensor.dims().iter().product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_center_trim_odd_delta() -> crate::Result<()> {
        let device = Device::Cpu;
        let x = Tensor::arange(0f32, 10., &device)?.reshape((1, 1, 10))?;

        let trimmed = center_trim(&x, 7)?;
        assert_eq!(trimmed.dims(), &[1, 1, 7]);
        // delta = 3: one sample off the front, two off the back
        let values = trimmed.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(values, vec![1., 2., 3., 4., 5., 6., 7.]);
        Ok(())
    }

    #[test]
    fn test_center_trim_noop_and_error() -> crate::Result<()> {
        let device = Device::Cpu;
        let x = Tensor::zeros((2, 3, 4, 16), DType::F32, &device)?;

        assert_eq!(center_trim(&x, 16)?.dims(), &[2, 3, 4, 16]);
        assert!(center_trim(&x, 17).is_err());
        Ok(())
    }

    #[test]
    fn test_count_parameters() -> candle_core::Result<()> {
        let x = Tensor::zeros((3, 4, 5), DType::F32, &Device::Cpu)?;
        assert_eq!(count_parameters(&x), 60);
        Ok(())
    }
}
