//! Speaker-conditioned decoder: latent code → spectral features.
//!
//! ## Architecture
//!
//! ```text
//! [B, c_in, T] ─→ Linear(c_in → c_h)                              [B, c_h, T]
//!   ─→ 3× conv block (each with its own speaker embedding):
//!        +emb, Conv(k3, c_h → 2c_h), leaky, pixel-shuffle ×2,
//!        +emb, Conv(k3), leaky, IN, + nearest-upsample(input)      [B, c_h, 8T]
//!   ─→ 2× dense block (+emb before every linear), IN, residual
//!   ─→ ‖ BiGRU(c_h/2) of (x + emb), ‖ emb                         [B, 3c_h, 8T]
//!   ─→ Linear(3c_h → c_h), leaky, Linear(c_h → c_out), sigmoid     [B, c_out, 8T]
//! ```
//!
//! Speaker ids are `u32` indices of shape `[B]`.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use crate::Result;
use crate::config::{DecoderConfig, SegLen};
use crate::model::layers::{BiGru, InstanceNorm};
use crate::model::ops::{
    add_emb, append_emb, check_speaker_ids, leaky_relu, linear_over_channels, pad_layer,
    pixel_shuffle_1d, upsample_nearest,
};

// ---------------------------------------------------------------------------
// ConditionedTail
// ---------------------------------------------------------------------------

/// Dense + recurrent output stage shared by [`Decoder`] and the patcher.
///
/// Two residual dense blocks conditioned on one embedding, then a BiGRU and
/// a two-layer projection conditioned on a second embedding.
#[derive(Debug, Clone)]
pub(crate) struct ConditionedTail {
    dense: Vec<(candle_nn::Linear, candle_nn::Linear)>,
    rnn: BiGru,
    dense5: candle_nn::Linear,
    linear: candle_nn::Linear,
    emb_dense: candle_nn::Embedding,
    emb_out: candle_nn::Embedding,
    norm: InstanceNorm,
    ns: f64,
}

impl ConditionedTail {
    /// `emb_dense` / `emb_out` name the two embedding tables under `vb`.
    pub(crate) fn load(
        vb: VarBuilder,
        cfg: &DecoderConfig,
        emb_dense: &str,
        emb_out: &str,
    ) -> Result<Self> {
        let c_h = cfg.c_h;
        let mut dense = Vec::with_capacity(2);
        for i in 0..2 {
            let a = candle_nn::linear(c_h, c_h, vb.pp(format!("dense{}", 1 + 2 * i)))?;
            let b = candle_nn::linear(c_h, c_h, vb.pp(format!("dense{}", 2 + 2 * i)))?;
            dense.push((a, b));
        }
        let rnn = BiGru::load(vb.pp("RNN"), c_h, c_h / 2)?;
        let dense5 = candle_nn::linear(c_h + rnn.out_channels() + c_h, c_h, vb.pp("dense5"))?;
        let linear = candle_nn::linear(c_h, cfg.c_out, vb.pp("linear"))?;
        let emb_dense = candle_nn::embedding(cfg.c_a, c_h, vb.pp(emb_dense))?;
        let emb_out = candle_nn::embedding(cfg.c_a, c_h, vb.pp(emb_out))?;
        Ok(Self {
            dense,
            rnn,
            dense5,
            linear,
            emb_dense,
            emb_out,
            norm: InstanceNorm::default(),
            ns: cfg.ns,
        })
    }

    fn dense_block(
        &self,
        x: &Tensor,
        emb: &Tensor,
        layers: &(candle_nn::Linear, candle_nn::Linear),
    ) -> Result<Tensor> {
        let mut out = x.clone();
        for layer in [&layers.0, &layers.1] {
            out = add_emb(&out, emb)?;
            out = linear_over_channels(&out, layer)?;
            out = leaky_relu(&out, self.ns)?;
        }
        let out = self.norm.forward(&out)?;
        Ok((out + x)?)
    }

    /// `[B, c_h, T]` → `[B, c_out, T]` in `(0, 1)`.
    pub(crate) fn forward(&self, x: &Tensor, speaker: &Tensor) -> Result<Tensor> {
        let emb = self.emb_dense.forward(speaker)?;
        let mut out = x.clone();
        for layers in &self.dense {
            out = self.dense_block(&out, &emb, layers)?;
        }

        let emb = self.emb_out.forward(speaker)?;
        let out_rnn = self.rnn.forward(&add_emb(&out, &emb)?)?;
        let out = Tensor::cat(&[&out, &out_rnn], 1)?;
        let out = append_emb(&emb, out.dim(2)?, &out)?;

        let out = linear_over_channels(&out, &self.dense5)?;
        let out = leaky_relu(&out, self.ns)?;
        let out = linear_over_channels(&out, &self.linear)?;
        Ok(candle_nn::ops::sigmoid(&out)?)
    }
}

// ---------------------------------------------------------------------------
// UpBlock
// ---------------------------------------------------------------------------

/// Conditioned pixel-shuffle upsampling block (time ×2).
#[derive(Debug, Clone)]
struct UpBlock {
    conv_expand: candle_nn::Conv1d,
    conv: candle_nn::Conv1d,
    emb: candle_nn::Embedding,
}

impl UpBlock {
    fn load(vb: VarBuilder, idx: usize, c_h: usize, c_a: usize) -> Result<Self> {
        // conv1/conv2 + emb1, conv3/conv4 + emb2, conv5/conv6 + emb3
        let conv_expand = candle_nn::conv1d(
            c_h,
            2 * c_h,
            3,
            Default::default(),
            vb.pp(format!("conv{}", 1 + 2 * idx)),
        )?;
        let conv = candle_nn::conv1d(
            c_h,
            c_h,
            3,
            Default::default(),
            vb.pp(format!("conv{}", 2 + 2 * idx)),
        )?;
        let emb = candle_nn::embedding(c_a, c_h, vb.pp(format!("emb{}", 1 + idx)))?;
        Ok(Self {
            conv_expand,
            conv,
            emb,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        speaker: &Tensor,
        seg_len: SegLen,
        ns: f64,
        norm: &InstanceNorm,
    ) -> Result<Tensor> {
        let emb = self.emb.forward(speaker)?;
        let out = pad_layer(&add_emb(x, &emb)?, &self.conv_expand, seg_len)?;
        let out = leaky_relu(&out, ns)?;
        let out = pixel_shuffle_1d(&out, 2)?;
        let out = pad_layer(&add_emb(&out, &emb)?, &self.conv, seg_len)?;
        let out = leaky_relu(&out, ns)?;
        let out = norm.forward(&out)?;
        Ok((out + upsample_nearest(x, 2)?)?)
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Decoder {
    input_emb: candle_nn::Linear,
    up_blocks: Vec<UpBlock>,
    tail: ConditionedTail,
    norm: InstanceNorm,
    cfg: DecoderConfig,
}

impl Decoder {
    pub fn new(cfg: &DecoderConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        tracing::debug!(
            seg_len = %cfg.seg_len,
            c_h = cfg.c_h,
            speakers = cfg.c_a,
            "building decoder"
        );

        let input_emb = candle_nn::linear(cfg.c_in, cfg.c_h, vb.pp("input_emb"))?;
        let up_blocks = (0..3)
            .map(|i| UpBlock::load(vb.clone(), i, cfg.c_h, cfg.c_a))
            .collect::<Result<Vec<_>>>()?;
        let tail = ConditionedTail::load(vb, cfg, "emb4", "emb5")?;

        Ok(Self {
            input_emb,
            up_blocks,
            tail,
            norm: InstanceNorm::default(),
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.cfg
    }

    /// Decode `[B, c_in, T]` for speakers `[B]` into `[B, c_out, 8T]`.
    pub fn forward(&self, x: &Tensor, speaker: &Tensor) -> Result<Tensor> {
        let speaker = check_speaker_ids(speaker, self.cfg.c_a)?;
        let mut out = linear_over_channels(x, &self.input_emb)?;
        for block in &self.up_blocks {
            out = block.forward(&out, &speaker, self.cfg.seg_len, self.cfg.ns, &self.norm)?;
        }
        self.tail.forward(&out, &speaker)
    }
}
