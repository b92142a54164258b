//! Speaker classifier over latent codes.
//!
//! ```text
//! [B, c_in, T]  (T = seg_len / 8)
//!   ─→ Conv(k5) Conv(k5) + IN + dropout                 [B, c_h, T]
//!   ─→ Conv(k5) Conv(k5) + IN + dropout + residual      [B, c_h, T]
//!   ─→ Conv(k5) Conv(k5) + IN + dropout + residual      [B, c_h, T]
//!   ─→ Conv(k3, c_h/2) Conv(k3, c_h/4) + IN + dropout   [B, c_h/4, T]
//!   ─→ Conv(k=T, unpadded) → flatten                    [B, n_class]
//! ```
//!
//! Logits are returned raw.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use crate::Result;
use crate::config::ClassifierConfig;
use crate::model::layers::InstanceNorm;
use crate::model::ops::{leaky_relu, pad_layer};

#[derive(Debug, Clone)]
pub struct SpeakerClassifier {
    /// conv1..conv8, paired into four blocks.
    blocks: Vec<(candle_nn::Conv1d, candle_nn::Conv1d)>,
    conv9: candle_nn::Conv1d,
    norm: InstanceNorm,
    dropout: candle_nn::Dropout,
    cfg: ClassifierConfig,
}

impl SpeakerClassifier {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        tracing::debug!(
            seg_len = %cfg.seg_len,
            n_class = cfg.n_class,
            "building speaker classifier"
        );

        let (c_in, c_h) = (cfg.c_in, cfg.c_h);
        // (in, out, kernel) for conv1..conv8
        let shapes = [
            (c_in, c_h, 5),
            (c_h, c_h, 5),
            (c_h, c_h, 5),
            (c_h, c_h, 5),
            (c_h, c_h, 5),
            (c_h, c_h, 5),
            (c_h, c_h / 2, 3),
            (c_h / 2, c_h / 4, 3),
        ];
        let convs = shapes
            .iter()
            .enumerate()
            .map(|(i, &(cin, cout, k))| {
                let vb = vb.pp(format!("conv{}", i + 1));
                candle_nn::conv1d(cin, cout, k, Default::default(), vb)
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        let mut convs = convs.into_iter();
        let mut blocks = Vec::with_capacity(4);
        while let (Some(a), Some(b)) = (convs.next(), convs.next()) {
            blocks.push((a, b));
        }

        let conv9 = candle_nn::conv1d(
            c_h / 4,
            cfg.n_class,
            cfg.seg_len.classifier_kernel(),
            Default::default(),
            vb.pp("conv9"),
        )?;

        Ok(Self {
            blocks,
            conv9,
            norm: InstanceNorm::default(),
            dropout: candle_nn::Dropout::new(cfg.dp),
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.cfg
    }

    fn conv_block(
        &self,
        x: &Tensor,
        convs: &(candle_nn::Conv1d, candle_nn::Conv1d),
        residual: bool,
        train: bool,
    ) -> Result<Tensor> {
        let mut out = x.clone();
        for conv in [&convs.0, &convs.1] {
            out = pad_layer(&out, conv, self.cfg.seg_len)?;
            out = leaky_relu(&out, self.cfg.ns)?;
        }
        let out = self.norm.forward(&out)?;
        let out = self.dropout.forward(&out, train)?;
        if residual { Ok((out + x)?) } else { Ok(out) }
    }

    /// `[B, c_in, seg_len/8]` → logits `[B, n_class]`.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut out = x.clone();
        for (i, convs) in self.blocks.iter().enumerate() {
            // the two middle blocks keep their width and add a skip
            let residual = i == 1 || i == 2;
            out = self.conv_block(&out, convs, residual, train)?;
        }
        let out = self.conv9.forward(&out)?;
        let b = out.dim(0)?;
        Ok(out.reshape((b, ()))?)
    }
}
