//! Building blocks candle does not ship in the shape these networks need.

use candle_core::{DType, Tensor};
use candle_nn::{RNN, VarBuilder};

use crate::Result;

// ---------------------------------------------------------------------------
// InstanceNorm
// ---------------------------------------------------------------------------

/// Per-sample, per-channel normalization over all trailing axes. No affine, no running stats.
#[derive(Debug, Clone, Copy)]
pub struct InstanceNorm {
    eps: f64,
}

impl Default for InstanceNorm {
    fn default() -> Self {
        Self { eps: 1e-5 }
    }
}

impl InstanceNorm {
    /// Normalize `[B, C, ...]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let dims = x.dims().to_vec();
        let (b, c) = (x.dim(0)?, x.dim(1)?);
        let x_f32 = x.to_dtype(DType::F32)?.reshape((b, c, ()))?;
        let mean = x_f32.mean_keepdim(2)?;
        let centered = x_f32.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(2)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        Ok(normed.reshape(dims)?.to_dtype(x.dtype())?)
    }
}

// ---------------------------------------------------------------------------
// Dropout2d
// ---------------------------------------------------------------------------

/// Channel dropout for `[B, C, H, W]`: whole feature maps are zeroed together.
#[derive(Debug, Clone, Copy)]
pub struct Dropout2d {
    p: f32,
}

impl Dropout2d {
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.p == 0.0 {
            return Ok(x.clone());
        }
        let (b, c, _h, _w) = x.dims4()?;
        let keep = Tensor::rand(0f32, 1f32, (b, c, 1, 1), x.device())?
            .ge(self.p as f64)?
            .to_dtype(x.dtype())?;
        let scale = 1.0 / (1.0 - self.p as f64);
        Ok(x.broadcast_mul(&(keep * scale)?)?)
    }
}

// ---------------------------------------------------------------------------
// BiGru
// ---------------------------------------------------------------------------

/// Single-layer bidirectional GRU over channel-major sequences.
///
/// Every call starts both directions from a zero hidden state.
#[derive(Debug, Clone)]
pub struct BiGru {
    fwd: candle_nn::GRU,
    bwd: candle_nn::GRU,
    hidden: usize,
}

impl BiGru {
    pub fn load(vb: VarBuilder, input: usize, hidden: usize) -> Result<Self> {
        let fwd = candle_nn::gru(input, hidden, Default::default(), vb.pp("forward"))?;
        let bwd = candle_nn::gru(input, hidden, Default::default(), vb.pp("backward"))?;
        Ok(Self {
            fwd,
            bwd,
            hidden,
        })
    }

    /// Output channels: both directions concatenated.
    pub fn out_channels(&self) -> usize {
        2 * self.hidden
    }

    /// `[B, C, T]` → `[B, 2*hidden, T]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, _c, t) = x.dims3()?;
        // candle's GRU wants batch-first [B, T, C]
        let x = x.transpose(1, 2)?.contiguous()?;

        let fwd_states = self.fwd.seq_init(&x, &self.fwd.zero_state(b)?)?;
        let fwd = stack_hidden(&fwd_states)?;

        let rev: Vec<u32> = (0..t as u32).rev().collect();
        let rev = Tensor::new(rev.as_slice(), x.device())?;
        let x_rev = x.index_select(&rev, 1)?;
        let bwd_states = self.bwd.seq_init(&x_rev, &self.bwd.zero_state(b)?)?;
        let bwd = stack_hidden(&bwd_states)?.index_select(&rev, 1)?;

        // [B, T, 2H] → [B, 2H, T]
        let out = Tensor::cat(&[&fwd, &bwd], 2)?;
        Ok(out.transpose(1, 2)?.contiguous()?)
    }
}

/// Per-step hidden states `[B, H]` stacked into `[B, T, H]`.
fn stack_hidden(states: &[candle_nn::rnn::GRUState]) -> Result<Tensor> {
    let hs: Vec<Tensor> = states.iter().map(|s| s.h.clone()).collect();
    Ok(Tensor::stack(&hs, 1)?)
}

// ---------------------------------------------------------------------------
// Conv2dRect
// ---------------------------------------------------------------------------

/// Unpadded stride-1 Conv2d with a non-square `(kh, kw)` kernel.
///
/// candle's `conv2d` helper only builds square kernels.
#[derive(Debug, Clone)]
pub struct Conv2dRect {
    weight: Tensor,
    bias: Tensor,
}

impl Conv2dRect {
    pub fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
    ) -> Result<Self> {
        let fan_in = (in_channels * kernel.0 * kernel.1) as f64;
        let bound = 1.0 / fan_in.sqrt();
        let init = candle_nn::Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kernel.0, kernel.1),
            "weight",
            init,
        )?;
        let bias = vb.get_with_hints(out_channels, "bias", init)?;
        Ok(Self { weight, bias })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = x.conv2d(
            &self.weight,
            /*padding=*/ 0,
            /*stride=*/ 1,
            /*dilation=*/ 1,
            /*groups=*/ 1,
        )?;
        let bias = self.bias.reshape((1, self.bias.dim(0)?, 1, 1))?;
        Ok(x.broadcast_add(&bias)?)
    }
}
