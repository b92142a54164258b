//! Patch discriminator over spectral-feature images.
//!
//! ```text
//! [B, F, T] → [B, 1, F, T]
//!   ─→ 5× Conv2d(k5, s2) + leaky + IN + Dropout2d      1→64→128→256→512→512
//!   ─→ Conv2d(k1, 512→32) + leaky + IN + Dropout2d
//!   ├→ conv7:         Conv2d(17×kw, 32→1)       → mean over positions   [B]
//!   └→ conv_classify: Conv2d(17×kw, 32→n_class) → flatten               [B, n_class·…]
//! ```
//!
//! `kw` is 4/2/1 for seg_len 128/64/32. With F = 513 the head maps are 1×1.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::Result;
use crate::config::DiscriminatorConfig;
use crate::model::layers::{Conv2dRect, Dropout2d, InstanceNorm};
use crate::model::ops::{leaky_relu, pad_layer_2d};

/// Output channels of the strided trunk, then the 1×1 squeeze.
const TRUNK_CHANNELS: [usize; 6] = [64, 128, 256, 512, 512, 32];

#[derive(Debug, Clone)]
pub struct PatchDiscriminator {
    convs: Vec<candle_nn::Conv2d>,
    conv7: Conv2dRect,
    conv_classify: Conv2dRect,
    norm: InstanceNorm,
    dropout: Dropout2d,
    cfg: DiscriminatorConfig,
}

impl PatchDiscriminator {
    pub fn new(cfg: &DiscriminatorConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        tracing::debug!(
            seg_len = %cfg.seg_len,
            n_class = cfg.n_class,
            "building patch discriminator"
        );

        let strided = candle_nn::Conv2dConfig {
            stride: 2,
            ..Default::default()
        };
        let mut convs = Vec::with_capacity(TRUNK_CHANNELS.len());
        let mut c_in = 1;
        for (i, &c_out) in TRUNK_CHANNELS.iter().enumerate() {
            let last = i + 1 == TRUNK_CHANNELS.len();
            let (kernel, conv_cfg) = if last {
                (1, Default::default())
            } else {
                (5, strided)
            };
            convs.push(candle_nn::conv2d(
                c_in,
                c_out,
                kernel,
                conv_cfg,
                vb.pp(format!("conv{}", i + 1)),
            )?);
            c_in = c_out;
        }

        let kernel = cfg.seg_len.discriminator_kernel();
        let conv7 = Conv2dRect::load(vb.pp("conv7"), c_in, 1, kernel)?;
        let conv_classify = Conv2dRect::load(vb.pp("conv_classify"), c_in, cfg.n_class, kernel)?;

        Ok(Self {
            convs,
            conv7,
            conv_classify,
            norm: InstanceNorm::default(),
            dropout: Dropout2d::new(cfg.dp),
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &DiscriminatorConfig {
        &self.cfg
    }

    /// Score `[B, F, T]`.
    ///
    /// Returns the mean real/fake score `[B]` and, when `classify` is set, the
    /// flattened speaker logits.
    pub fn forward(
        &self,
        x: &Tensor,
        classify: bool,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let mut out = x.unsqueeze(1)?;
        for conv in &self.convs {
            out = pad_layer_2d(&out, conv, self.cfg.seg_len)?;
            out = leaky_relu(&out, self.cfg.ns)?;
            out = self.norm.forward(&out)?;
            out = self.dropout.forward(&out, train)?;
        }

        let b = out.dim(0)?;
        let val = self.conv7.forward(&out)?.reshape((b, ()))?;
        let score = val.mean(1)?;

        let logits = if classify {
            Some(self.conv_classify.forward(&out)?.reshape((b, ()))?)
        } else {
            None
        };
        Ok((score, logits))
    }
}
