//! Gumbel-softmax with a straight-through estimator.
//!
//! ```text
//! y_soft = softmax((logits + g) / τ),   g = -ln(-ln(U + ε) + ε),  U ~ U[0, 1)
//! y_hard = one_hot(argmax(y_soft))
//! out    = (y_hard - y_soft).detach() + y_soft
//! ```
//!
//! The forward value is the hard one-hot; gradients flow through `y_soft`.

use candle_core::{D, Device, Shape, Tensor};

use crate::{Error, Result};

/// Default softmax temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.1;

const EPS: f64 = 1e-20;

/// Standard Gumbel noise of the given shape.
pub fn sample_gumbel(shape: impl Into<Shape>, device: &Device) -> Result<Tensor> {
    let u = Tensor::rand(0f32, 1f32, shape, device)?;
    let inner = ((u + EPS)?.log()?.neg()? + EPS)?;
    Ok(inner.log()?.neg()?)
}

/// One-hot of the argmax along the last axis, in the dtype of `probs`.
pub fn hard_one_hot(probs: &Tensor) -> Result<Tensor> {
    let n_class = probs.dim(D::Minus1)?;
    let idx = probs.argmax_keepdim(D::Minus1)?;
    let classes = Tensor::arange(0u32, n_class as u32, probs.device())?;
    Ok(idx.broadcast_eq(&classes)?.to_dtype(probs.dtype())?)
}

/// Gumbel-softmax over the last axis of `logits`, sampling fresh noise.
pub fn gumbel_softmax(logits: &Tensor, temperature: f64) -> Result<Tensor> {
    let noise = sample_gumbel(logits.shape(), logits.device())?.to_dtype(logits.dtype())?;
    gumbel_softmax_with_noise(logits, &noise, temperature)
}

/// Gumbel-softmax with caller-provided noise.
pub fn gumbel_softmax_with_noise(logits: &Tensor, noise: &Tensor, temperature: f64) -> Result<Tensor> {
    if !(temperature.is_finite() && temperature > 0.0) {
        return Err(Error::Config(format!(
            "gumbel temperature must be positive, got {temperature}"
        )));
    }
    let y = ((logits + noise)? / temperature)?;
    let soft = candle_nn::ops::softmax(&y, D::Minus1)?;
    let hard = hard_one_hot(&soft)?;
    Ok(((hard - &soft)?.detach() + &soft)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Var};

    /// Every row along the last axis is one 1 and the rest 0.
    fn assert_one_hot(x: &Tensor) {
        let n = x.dim(D::Minus1).unwrap();
        let rows: Vec<Vec<f32>> = x.reshape(((), n)).unwrap().to_vec2().unwrap();
        for row in rows {
            let ones = row.iter().filter(|&&v| (v - 1.0).abs() < 1e-6).count();
            let zeros = row.iter().filter(|&&v| v.abs() < 1e-6).count();
            assert_eq!(ones, 1, "{row:?}");
            assert_eq!(zeros, n - 1, "{row:?}");
        }
    }

    #[test]
    fn gumbel_noise_is_finite() {
        let device = Device::Cpu;
        let g = sample_gumbel((64, 32), &device).unwrap();
        let v: Vec<f32> = g.flatten_all().unwrap().to_vec1().unwrap();
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn hard_one_hot_picks_max() {
        let device = Device::Cpu;
        let p = Tensor::new(&[[0.1f32, 0.7, 0.2], [0.5, 0.2, 0.3]], &device).unwrap();
        let h: Vec<Vec<f32>> = hard_one_hot(&p).unwrap().to_vec2().unwrap();
        assert_eq!(h, vec![vec![0., 1., 0.], vec![1., 0., 0.]]);
    }

    #[test]
    fn forward_value_is_one_hot() {
        let device = Device::Cpu;
        for scale in [0.01f32, 1.0, 100.0] {
            let logits = (Tensor::randn(0f32, 1.0, (4, 6, 10), &device).unwrap() * scale as f64)
                .unwrap();
            let out = gumbel_softmax(&logits, DEFAULT_TEMPERATURE).unwrap();
            assert_eq!(out.dims(), &[4, 6, 10]);
            assert_one_hot(&out);
        }
    }

    #[test]
    fn one_hot_even_for_flat_logits() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((8, 2), DType::F32, &device).unwrap();
        assert_one_hot(&gumbel_softmax(&logits, 1.0).unwrap());
    }

    #[test]
    fn zero_noise_follows_logits() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[1f32, 3., 2.]], &device).unwrap();
        let noise = logits.zeros_like().unwrap();
        let out: Vec<Vec<f32>> = gumbel_softmax_with_noise(&logits, &noise, 0.5)
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(out[0].iter().map(|v| v.round()).collect::<Vec<_>>(), vec![0., 1., 0.]);
    }

    #[test]
    fn rejects_non_positive_temperature() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((1, 3), DType::F32, &device).unwrap();
        assert!(gumbel_softmax(&logits, 0.0).is_err());
        assert!(gumbel_softmax(&logits, -1.0).is_err());
    }

    #[test]
    fn gradient_is_the_soft_gradient() {
        let device = Device::Cpu;
        let init = Tensor::new(&[[0.3f32, -0.2, 0.8, 0.1]], &device).unwrap();
        let noise = Tensor::new(&[[0.05f32, 0.4, -0.1, 0.2]], &device).unwrap();
        let weights = Tensor::new(&[[1f32, 2., 3., 4.]], &device).unwrap();
        let temperature = 0.7;

        let logits = Var::from_tensor(&init).unwrap();
        let st = gumbel_softmax_with_noise(logits.as_tensor(), &noise, temperature).unwrap();
        let loss = (st * &weights).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let g_st: Vec<Vec<f32>> = grads.get(logits.as_tensor()).unwrap().to_vec2().unwrap();

        let logits2 = Var::from_tensor(&init).unwrap();
        let y = ((logits2.as_tensor() + &noise).unwrap() / temperature).unwrap();
        let soft = candle_nn::ops::softmax(&y, D::Minus1).unwrap();
        let loss = (soft * &weights).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let g_soft: Vec<Vec<f32>> = grads.get(logits2.as_tensor()).unwrap().to_vec2().unwrap();

        for (a, b) in g_st[0].iter().zip(&g_soft[0]) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
        assert!(g_soft[0].iter().any(|v| v.abs() > 1e-4));
    }
}
