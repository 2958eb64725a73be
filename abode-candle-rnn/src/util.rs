//! Conversions between index vectors and tensors.
use anyhow::Result;
use candle_core::{Device, Tensor};

/// Converts indices to a `u32` tensor usable with [`Tensor::index_select`].
pub fn index_tensor(inds: &[usize], device: &Device) -> Result<Tensor> {
    let v = inds.iter().map(|&i| i as u32).collect::<Vec<_>>();
    Ok(Tensor::from_vec(v, (inds.len(),), device)?)
}

/// Converts flags to a `u8` tensor usable with [`Tensor::where_cond`].
pub fn mask_tensor(mask: &[bool], device: &Device) -> Result<Tensor> {
    let v = mask.iter().map(|&m| m as u8).collect::<Vec<_>>();
    Ok(Tensor::from_vec(v, (mask.len(),), device)?)
}

/// Zeroes the batch entries of a `(layers, batch, hidden)` state whose flag is
/// `false`.
///
/// Entries are replaced, not scaled, so non-finite values do not leak through.
pub fn zero_unkept(states: &Tensor, keep: &[bool]) -> Result<Tensor> {
    let mask = mask_tensor(keep, states.device())?
        .reshape((1, keep.len(), 1))?
        .broadcast_as(states.shape())?;
    Ok(mask.where_cond(states, &states.zeros_like()?)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_mask_tensor() -> Result<()> {
        let t = mask_tensor(&[true, false, true], &Device::Cpu)?;
        assert_eq!(t.dtype(), DType::U8);
        assert_eq!(t.to_vec1::<u8>()?, vec![1, 0, 1]);

        let t = index_tensor(&[2, 0], &Device::Cpu)?;
        assert_eq!(t.to_vec1::<u32>()?, vec![2, 0]);
        Ok(())
    }

    #[test]
    fn test_zero_unkept_replaces_non_finite() -> Result<()> {
        let states = Tensor::new(
            &[[[f32::INFINITY, 1.0], [f32::NAN, 2.0]]],
            &Device::Cpu,
        )?;
        let zeroed = zero_unkept(&states, &[false, false])?;
        assert_eq!(zeroed.to_vec3::<f32>()?, vec![vec![vec![0.0; 2]; 2]]);

        let kept = zero_unkept(&states, &[false, true])?.to_vec3::<f32>()?;
        assert_eq!(kept[0][0], vec![0.0, 0.0]);
        assert!(kept[0][1][0].is_nan());
        assert_eq!(kept[0][1][1], 2.0);
        Ok(())
    }
}
