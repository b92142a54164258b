//! Shape utilities shared by all networks.
//!
//! Feature tensors are channel-major `[B, C, T]` throughout. The helpers
//! here pad before "same" convolutions, trade channels for time
//! (pixel shuffle), and adapt position-wise layers to channel-major input.

use candle_core::{D, DType, Module, Tensor};

use crate::config::{PadMode, SegLen};
use crate::{Error, Result};

/// Leaky ReLU with the given negative slope.
pub fn leaky_relu(x: &Tensor, ns: f64) -> Result<Tensor> {
    Ok(candle_nn::ops::leaky_relu(x, ns)?)
}

/// `(left, right)` padding that keeps a stride-1 convolution's length.
///
/// Even kernels put the extra sample on the left.
pub fn same_padding(kernel_size: usize) -> (usize, usize) {
    let half = kernel_size / 2;
    if kernel_size % 2 == 0 {
        (half, half.saturating_sub(1))
    } else {
        (half, half)
    }
}

/// Mirror-pad `dim` without repeating the edge sample.
///
/// `[a b c d]` padded by `(2, 1)` gives `[c b a b c d c]`.
pub fn pad_reflect(x: &Tensor, dim: usize, left: usize, right: usize) -> Result<Tensor> {
    if left == 0 && right == 0 {
        return Ok(x.clone());
    }
    let n = x.dim(dim)?;
    if left >= n || right >= n {
        return Err(Error::Candle(candle_core::Error::Msg(format!(
            "reflect padding ({left}, {right}) needs dim {dim} larger than both, got {n}"
        ))));
    }
    let mut idx = Vec::with_capacity(left + n + right);
    idx.extend((1..=left).rev().map(|i| i as u32));
    idx.extend((0..n).map(|i| i as u32));
    idx.extend((0..right).map(|i| (n - 2 - i) as u32));
    let idx = Tensor::new(idx.as_slice(), x.device())?;
    Ok(x.contiguous()?.index_select(&idx, dim)?)
}

/// Pad `dim` with the given mode.
pub fn pad(x: &Tensor, dim: usize, left: usize, right: usize, mode: PadMode) -> Result<Tensor> {
    match mode {
        PadMode::Constant => Ok(x.pad_with_zeros(dim, left, right)?),
        PadMode::Reflect => pad_reflect(x, dim, left, right),
    }
}

/// Pad the time axis of `[B, C, T]` so the convolution keeps a "same" length, then apply it.
///
/// Zero padding for segments shorter than 64 frames, reflect padding otherwise.
/// A strided layer yields `ceil(T / stride)` frames.
pub fn pad_layer(x: &Tensor, conv: &candle_nn::Conv1d, seg_len: SegLen) -> Result<Tensor> {
    let kernel_size = conv.weight().dim(2)?;
    let (left, right) = same_padding(kernel_size);
    let x = pad(x, 2, left, right, seg_len.pad_mode())?;
    Ok(conv.forward(&x)?)
}

/// 2-D variant of [`pad_layer`] for `[B, C, H, W]`.
///
/// Both spatial axes use the padding of the kernel's height.
pub fn pad_layer_2d(x: &Tensor, conv: &candle_nn::Conv2d, seg_len: SegLen) -> Result<Tensor> {
    let kernel_size = conv.weight().dim(2)?;
    let (left, right) = same_padding(kernel_size);
    let mode = seg_len.pad_mode();
    let x = pad(x, 3, left, right, mode)?;
    let x = pad(&x, 2, left, right, mode)?;
    Ok(conv.forward(&x)?)
}

/// Pixel shuffle along time: `[B, C*r, W]` → `[B, C, W*r]`.
pub fn pixel_shuffle_1d(x: &Tensor, upscale_factor: usize) -> Result<Tensor> {
    let (b, c, w) = x.dims3()?;
    if upscale_factor == 0 || c % upscale_factor != 0 {
        return Err(Error::Config(format!(
            "pixel_shuffle_1d: {c} channels not divisible by factor {upscale_factor}"
        )));
    }
    let c_out = c / upscale_factor;
    // [B, C, r, W] → [B, C, W, r] → [B, C, W*r]
    let x = x.reshape((b, c_out, upscale_factor, w))?;
    let x = x.permute([0, 1, 3, 2])?;
    Ok(x.reshape((b, c_out, w * upscale_factor))?)
}

/// Inverse of [`pixel_shuffle_1d`]: `[B, C, W*r]` → `[B, C*r, W]`.
pub fn pixel_unshuffle_1d(x: &Tensor, downscale_factor: usize) -> Result<Tensor> {
    let (b, c, w) = x.dims3()?;
    if downscale_factor == 0 || w % downscale_factor != 0 {
        return Err(Error::Config(format!(
            "pixel_unshuffle_1d: width {w} not divisible by factor {downscale_factor}"
        )));
    }
    let w_out = w / downscale_factor;
    let x = x.reshape((b, c, w_out, downscale_factor))?;
    let x = x.permute([0, 1, 3, 2])?;
    Ok(x.reshape((b, c * downscale_factor, w_out))?)
}

/// Nearest-neighbour upsampling of the time axis.
pub fn upsample_nearest(x: &Tensor, scale_factor: usize) -> Result<Tensor> {
    let t = x.dim(D::Minus1)?;
    Ok(x.upsample_nearest1d(t * scale_factor)?)
}

/// Halve the time axis with a width-2 average pool, padding odd lengths on the right first.
pub fn avg_pool_halve(x: &Tensor, seg_len: SegLen) -> Result<Tensor> {
    let t = x.dim(2)?;
    let x = pad(x, 2, 0, t % 2, seg_len.pad_mode())?;
    let (b, c, t) = x.dims3()?;
    Ok(x.reshape((b, c, t / 2, 2))?.mean(3)?)
}

/// Apply a fully-connected layer to the channels of every time step.
///
/// `[B, C_in, T]` → `[B*T, C_in]` → linear → `[B, C_out, T]`.
pub fn linear_over_channels(x: &Tensor, layer: &candle_nn::Linear) -> Result<Tensor> {
    let (b, c, t) = x.dims3()?;
    let flat = x.transpose(1, 2)?.contiguous()?.reshape((b * t, c))?;
    let out = layer.forward(&flat)?;
    let c_out = out.dim(1)?;
    Ok(out.reshape((b, t, c_out))?.transpose(1, 2)?.contiguous()?)
}

/// Broadcast `[B, E]` over `time` steps and append it as extra channels of `[B, C, T]`.
pub fn append_emb(emb: &Tensor, time: usize, x: &Tensor) -> Result<Tensor> {
    let (b, e) = emb.dims2()?;
    let emb = emb.unsqueeze(2)?.broadcast_as((b, e, time))?.contiguous()?;
    Ok(Tensor::cat(&[x, &emb], 1)?)
}

/// Add `[B, C]` to every time step of `[B, C, T]`.
pub fn add_emb(x: &Tensor, emb: &Tensor) -> Result<Tensor> {
    Ok(x.broadcast_add(&emb.unsqueeze(2)?)?)
}

/// Speaker ids as a `u32` tensor, rejecting ids outside `0..n_speakers`.
///
/// Ids must already be an integer tensor; float ids are an error rather
/// than being truncated.
pub fn check_speaker_ids(speaker: &Tensor, n_speakers: usize) -> Result<Tensor> {
    let ids: Vec<i64> = match speaker.dtype() {
        DType::U8 | DType::U32 | DType::I64 => {
            speaker.flatten_all()?.to_dtype(DType::I64)?.to_vec1()?
        }
        other => {
            return Err(Error::Config(format!(
                "speaker ids must be an integer tensor, got {other:?}"
            )));
        }
    };
    if let Some(bad) = ids.iter().find(|&&id| id < 0 || id as usize >= n_speakers) {
        return Err(Error::Config(format!(
            "speaker id {bad} out of range for {n_speakers} speakers"
        )));
    }
    Ok(speaker.to_dtype(DType::U32)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn make_vb(device: &Device) -> (VarMap, VarBuilder<'static>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        (varmap, vb)
    }

    fn seq(device: &Device, n: usize) -> Tensor {
        Tensor::arange(0f32, n as f32, device)
            .unwrap()
            .reshape((1, 1, n))
            .unwrap()
    }

    #[test]
    fn same_padding_odd_and_even() {
        assert_eq!(same_padding(1), (0, 0));
        assert_eq!(same_padding(3), (1, 1));
        assert_eq!(same_padding(5), (2, 2));
        assert_eq!(same_padding(2), (1, 0));
        assert_eq!(same_padding(6), (3, 2));
    }

    #[test]
    fn reflect_pad_skips_edge() {
        let device = Device::Cpu;
        let x = seq(&device, 4);
        let out = pad_reflect(&x, 2, 2, 1).unwrap();
        let v: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![2., 1., 0., 1., 2., 3., 2.]);
    }

    #[test]
    fn reflect_pad_too_wide_fails() {
        let device = Device::Cpu;
        let x = seq(&device, 2);
        assert!(pad_reflect(&x, 2, 2, 2).is_err());
    }

    #[test]
    fn pad_layer_keeps_length_for_all_kernels() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        let x = Tensor::randn(0f32, 1.0, (2, 3, 64), &device).unwrap();
        for k in 1..=7 {
            let conv = candle_nn::conv1d(3, 4, k, Default::default(), vb.pp(format!("c{k}")))
                .unwrap();
            for seg_len in [SegLen::S32, SegLen::S64] {
                let out = pad_layer(&x, &conv, seg_len).unwrap();
                assert_eq!(out.dims(), &[2, 4, 64], "kernel {k}");
            }
        }
    }

    #[test]
    fn pad_layer_stride_two_halves() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        let cfg = candle_nn::Conv1dConfig {
            stride: 2,
            ..Default::default()
        };
        let conv = candle_nn::conv1d(3, 3, 5, cfg, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 3, 16), &device).unwrap();
        let out = pad_layer(&x, &conv, SegLen::S128).unwrap();
        assert_eq!(out.dims(), &[1, 3, 8]);
    }

    #[test]
    fn pad_layer_2d_stride_two() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        let cfg = candle_nn::Conv2dConfig {
            stride: 2,
            ..Default::default()
        };
        let conv = candle_nn::conv2d(1, 2, 5, cfg, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 1, 513, 64), &device).unwrap();
        let out = pad_layer_2d(&x, &conv, SegLen::S64).unwrap();
        assert_eq!(out.dims(), &[1, 2, 257, 32]);
    }

    #[test]
    fn pixel_shuffle_interleaves_channel_groups() {
        let device = Device::Cpu;
        // channels [0,1] become the two phases of each output step
        let x = Tensor::new(&[[[1f32, 2., 3.], [10., 20., 30.]]], &device).unwrap();
        let out = pixel_shuffle_1d(&x, 2).unwrap();
        assert_eq!(out.dims(), &[1, 1, 6]);
        let v: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![1., 10., 2., 20., 3., 30.]);
    }

    #[test]
    fn pixel_shuffle_roundtrips_exactly() {
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1.0, (2, 8, 5), &device).unwrap();
        for r in [2, 4] {
            let up = pixel_shuffle_1d(&x, r).unwrap();
            assert_eq!(up.dims(), &[2, 8 / r, 5 * r]);
            let back = pixel_unshuffle_1d(&up, r).unwrap();
            let diff: f32 = (&back - &x)
                .unwrap()
                .abs()
                .unwrap()
                .max_all()
                .unwrap()
                .to_scalar()
                .unwrap();
            assert_eq!(diff, 0.0);
        }
    }

    #[test]
    fn pixel_shuffle_rejects_indivisible_channels() {
        let device = Device::Cpu;
        let x = Tensor::zeros((1, 3, 4), DType::F32, &device).unwrap();
        assert!(pixel_shuffle_1d(&x, 2).is_err());
    }

    #[test]
    fn upsample_repeats_each_step() {
        let device = Device::Cpu;
        let out = upsample_nearest(&seq(&device, 3), 2).unwrap();
        let v: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![0., 0., 1., 1., 2., 2.]);
    }

    #[test]
    fn avg_pool_halve_even_and_odd() {
        let device = Device::Cpu;
        let even = avg_pool_halve(&seq(&device, 4), SegLen::S64).unwrap();
        let v: Vec<f32> = even.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![0.5, 2.5]);
        // odd length: zero pad for short segments
        let odd = avg_pool_halve(&seq(&device, 3), SegLen::S32).unwrap();
        let v: Vec<f32> = odd.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![0.5, 1.0]);
        // odd length: reflect pad for long segments
        let odd = avg_pool_halve(&seq(&device, 3), SegLen::S128).unwrap();
        let v: Vec<f32> = odd.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![0.5, 1.5]);
    }

    #[test]
    fn linear_over_channels_matches_per_step() {
        let device = Device::Cpu;
        let weight = Tensor::new(&[[1f32, 0.], [1., 1.], [0., 2.]], &device).unwrap();
        let layer = candle_nn::Linear::new(weight, None);
        // [B=1, C=2, T=2]: step 0 = (1, 2), step 1 = (3, 4)
        let x = Tensor::new(&[[[1f32, 3.], [2., 4.]]], &device).unwrap();
        let out = linear_over_channels(&x, &layer).unwrap();
        assert_eq!(out.dims(), &[1, 3, 2]);
        let v: Vec<Vec<f32>> = out.squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(v, vec![vec![1., 3.], vec![3., 7.], vec![4., 8.]]);
    }

    #[test]
    fn append_and_add_emb() {
        let device = Device::Cpu;
        let x = Tensor::zeros((2, 3, 5), DType::F32, &device).unwrap();
        let emb = Tensor::new(&[[1f32, 2., 3.], [4., 5., 6.]], &device).unwrap();
        let cat = append_emb(&emb, 5, &x).unwrap();
        assert_eq!(cat.dims(), &[2, 6, 5]);
        let added = add_emb(&x, &emb).unwrap();
        let last: f32 = added.get(1).unwrap().get(2).unwrap().get(4).unwrap().to_scalar().unwrap();
        assert_eq!(last, 6.0);
    }

    #[test]
    fn speaker_ids_bounds_checked() {
        let device = Device::Cpu;
        let ok = Tensor::new(&[0u32, 3], &device).unwrap();
        assert_eq!(check_speaker_ids(&ok, 4).unwrap().dtype(), DType::U32);
        let bad = Tensor::new(&[0u32, 4], &device).unwrap();
        assert!(check_speaker_ids(&bad, 4).is_err());
    }

    #[test]
    fn speaker_ids_must_be_integers() {
        let device = Device::Cpu;
        let float_ids = Tensor::new(&[-1.0f32, 1.7], &device).unwrap();
        assert!(check_speaker_ids(&float_ids, 4).is_err());
        let negative = Tensor::new(&[1i64, -1], &device).unwrap();
        assert!(check_speaker_ids(&negative, 4).is_err());
        let signed = Tensor::new(&[2i64, 0], &device).unwrap();
        let ids: Vec<u32> = check_speaker_ids(&signed, 4).unwrap().to_vec1().unwrap();
        assert_eq!(ids, vec![2, 0]);
    }
}
