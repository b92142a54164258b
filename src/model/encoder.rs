//! Spectral-feature encoder.
//!
//! ## Architecture
//!
//! ```text
//! [B, c_in, T]
//!   ─→ 7× Conv1d(k=1..7) ‖ input, leaky                [B, 7*c_h1 + c_in, T]
//!   ─→ Conv1d(k=1) + IN + dropout                        [B, c_h2, T]
//!   ─→ 3× (Conv1d(k=5), Conv1d(k=5, s=2)) + IN + dropout
//!        + avgpool(input)                                [B, c_h2, T/8]
//!   ─→ 2× residual dense block                           [B, c_h2, T/8]
//!   ─→ ‖ BiGRU(c_h3)                                     [B, c_h2 + 2*c_h3, T/8]
//!   ─→ Linear → mode activation                          [B, enc_size, T/8]
//! ```

use candle_core::{D, Tensor};
use candle_nn::VarBuilder;

use crate::Result;
use crate::config::{EncoderConfig, EncodingMode};
use crate::model::gumbel::gumbel_softmax;
use crate::model::layers::{BiGru, InstanceNorm};
use crate::model::ops::{avg_pool_halve, leaky_relu, linear_over_channels, pad_layer};

/// Smallest multi-scale kernel.
const MIN_KERNEL: usize = 1;
/// Largest multi-scale kernel.
const MAX_KERNEL: usize = 7;

impl EncodingMode {
    /// Turn the final projection `[B, P, T]` into the latent code `[B, enc_size, T]`.
    pub fn activate(
        self,
        proj: &Tensor,
        enc_size: usize,
        ns: f64,
        temperature: f64,
    ) -> Result<Tensor> {
        match self {
            EncodingMode::Continues => leaky_relu(proj, ns),
            EncodingMode::OneHot | EncodingMode::GumbelT => {
                // gumbel_t shares this path: one class over enc_size per time step
                let per_step = proj.transpose(1, 2)?;
                let act = gumbel_softmax(&per_step, temperature)?;
                Ok(act.transpose(1, 2)?.contiguous()?)
            }
            EncodingMode::Binary => {
                let (b, _p, t) = proj.dims3()?;
                let grid = proj
                    .transpose(1, 2)?
                    .reshape((b, t, enc_size, enc_size))?;
                let act = gumbel_softmax(&grid, temperature)?.sum(2)?;
                let act = act.clamp(0f32, 1f32)?;
                Ok(act.transpose(1, 2)?.contiguous()?)
            }
            EncodingMode::MultilabelBinary => {
                let (b, _p, t) = proj.dims3()?;
                let pairs = proj.transpose(1, 2)?.reshape((b, t, enc_size, 2))?;
                let act = gumbel_softmax(&pairs, temperature)?
                    .narrow(D::Minus1, 0, 1)?
                    .squeeze(D::Minus1)?;
                Ok(act.transpose(1, 2)?.contiguous()?)
            }
        }
    }
}

/// Multi-scale convolutional encoder with a recurrent summary.
#[derive(Debug, Clone)]
pub struct Encoder {
    conv1s: Vec<candle_nn::Conv1d>,
    conv2: candle_nn::Conv1d,
    /// Three (conv, strided conv) pairs.
    down: Vec<(candle_nn::Conv1d, candle_nn::Conv1d)>,
    /// Two pairs of position-wise linears.
    dense: Vec<(candle_nn::Linear, candle_nn::Linear)>,
    rnn: BiGru,
    linear: candle_nn::Linear,
    norm: InstanceNorm,
    dropout: candle_nn::Dropout,
    cfg: EncoderConfig,
}

impl Encoder {
    pub fn new(cfg: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        tracing::debug!(
            seg_len = %cfg.seg_len,
            enc_mode = %cfg.enc_mode,
            enc_size = cfg.enc_size,
            "building encoder"
        );

        let conv1s = (MIN_KERNEL..=MAX_KERNEL)
            .enumerate()
            .map(|(i, k)| {
                candle_nn::conv1d(
                    cfg.c_in,
                    cfg.c_h1,
                    k,
                    Default::default(),
                    vb.pp(format!("conv1s.{i}")),
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        let n_scales = MAX_KERNEL - MIN_KERNEL + 1;
        let conv2 = candle_nn::conv1d(
            n_scales * cfg.c_h1 + cfg.c_in,
            cfg.c_h2,
            1,
            Default::default(),
            vb.pp("conv2"),
        )?;

        let strided = candle_nn::Conv1dConfig {
            stride: 2,
            ..Default::default()
        };
        let mut down = Vec::with_capacity(3);
        for i in 0..3 {
            // conv3/conv4, conv5/conv6, conv7/conv8
            let vb_a = vb.pp(format!("conv{}", 3 + 2 * i));
            let vb_b = vb.pp(format!("conv{}", 4 + 2 * i));
            let a = candle_nn::conv1d(cfg.c_h2, cfg.c_h2, 5, Default::default(), vb_a)?;
            let b = candle_nn::conv1d(cfg.c_h2, cfg.c_h2, 5, strided, vb_b)?;
            down.push((a, b));
        }

        let mut dense = Vec::with_capacity(2);
        for i in 0..2 {
            let a = candle_nn::linear(cfg.c_h2, cfg.c_h2, vb.pp(format!("dense{}", 1 + 2 * i)))?;
            let b = candle_nn::linear(cfg.c_h2, cfg.c_h2, vb.pp(format!("dense{}", 2 + 2 * i)))?;
            dense.push((a, b));
        }

        let rnn = BiGru::load(vb.pp("RNN"), cfg.c_h2, cfg.c_h3)?;
        let linear = candle_nn::linear(
            cfg.summary_channels(),
            cfg.enc_mode.projection_size(cfg.enc_size),
            vb.pp("linear"),
        )?;

        Ok(Self {
            conv1s,
            conv2,
            down,
            dense,
            rnn,
            linear,
            norm: InstanceNorm::default(),
            dropout: candle_nn::Dropout::new(cfg.dp),
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.cfg
    }

    fn norm_drop(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.norm.forward(x)?;
        Ok(self.dropout.forward(&x, train)?)
    }

    fn conv_block(
        &self,
        x: &Tensor,
        convs: &[&candle_nn::Conv1d],
        residual: bool,
        train: bool,
    ) -> Result<Tensor> {
        let mut out = x.clone();
        for conv in convs {
            out = pad_layer(&out, conv, self.cfg.seg_len)?;
            out = leaky_relu(&out, self.cfg.ns)?;
        }
        let out = self.norm_drop(&out, train)?;
        if residual {
            let x_down = avg_pool_halve(x, self.cfg.seg_len)?;
            Ok((x_down + out)?)
        } else {
            Ok(out)
        }
    }

    fn dense_block(
        &self,
        x: &Tensor,
        layers: &(candle_nn::Linear, candle_nn::Linear),
        train: bool,
    ) -> Result<Tensor> {
        let mut out = x.clone();
        for layer in [&layers.0, &layers.1] {
            out = linear_over_channels(&out, layer)?;
            out = leaky_relu(&out, self.cfg.ns)?;
        }
        let out = self.norm_drop(&out, train)?;
        Ok((out + x)?)
    }

    /// Encode `[B, c_in, T]`.
    ///
    /// Returns `(latent, projection)`: the mode-activated code `[B, enc_size, T/8]`
    /// and the raw pre-activation projection `[B, P, T/8]`.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let mut outs = Vec::with_capacity(self.conv1s.len() + 1);
        for conv in &self.conv1s {
            outs.push(pad_layer(x, conv, self.cfg.seg_len)?);
        }
        outs.push(x.clone());
        let out = Tensor::cat(&outs, 1)?;
        let out = leaky_relu(&out, self.cfg.ns)?;

        let mut out = self.conv_block(&out, &[&self.conv2], false, train)?;
        for (conv, strided) in &self.down {
            out = self.conv_block(&out, &[conv, strided], true, train)?;
        }
        for layers in &self.dense {
            out = self.dense_block(&out, layers, train)?;
        }

        let out_rnn = self.rnn.forward(&out)?;
        let out = Tensor::cat(&[&out, &out_rnn], 1)?;

        let proj = linear_over_channels(&out, &self.linear)?;
        let latent = self.cfg.enc_mode.activate(
            &proj,
            self.cfg.enc_size,
            self.cfg.ns,
            self.cfg.gumbel_temperature,
        )?;
        Ok((latent, proj))
    }
}
