//! Patcher: a light speaker-conditioned refiner.
//!
//! The decoder's dense + recurrent tail without the upsampling stages, so the
//! time axis is preserved:
//!
//! ```text
//! [B, c_in, T] ─→ Linear(c_in → c_h) ─→ ConditionedTail ─→ [B, c_out, T]
//! ```

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::Result;
use crate::config::PatcherConfig;
use crate::model::decoder::ConditionedTail;
use crate::model::ops::{check_speaker_ids, linear_over_channels};

#[derive(Debug, Clone)]
pub struct Patcher {
    input_layer: candle_nn::Linear,
    tail: ConditionedTail,
    cfg: PatcherConfig,
}

impl Patcher {
    pub fn new(cfg: &PatcherConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        tracing::debug!(c_h = cfg.c_h, speakers = cfg.c_a, "building patcher");

        let input_layer = candle_nn::linear(cfg.c_in, cfg.c_h, vb.pp("input_layer"))?;
        let tail = ConditionedTail::load(vb, cfg, "emb1", "emb2")?;
        Ok(Self {
            input_layer,
            tail,
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &PatcherConfig {
        &self.cfg
    }

    /// Refine `[B, c_in, T]` for speakers `[B]` into `[B, c_out, T]`.
    pub fn forward(&self, x: &Tensor, speaker: &Tensor) -> Result<Tensor> {
        let speaker = check_speaker_ids(speaker, self.cfg.c_a)?;
        let out = linear_over_channels(x, &self.input_layer)?;
        self.tail.forward(&out, &speaker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegLen;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn preserves_time_axis() {
        let device = Device::Cpu;
        for seg_len in SegLen::ALL {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let cfg = PatcherConfig {
                c_in: 10,
                c_out: 10,
                c_h: 8,
                c_a: 2,
                seg_len,
                ..PatcherConfig::default()
            };
            let patcher = Patcher::new(&cfg, vb).unwrap();
            let x = Tensor::rand(0f32, 1.0, (2, 10, seg_len.as_usize()), &device).unwrap();
            let speaker = Tensor::new(&[1u32, 0], &device).unwrap();
            let out = patcher.forward(&x, &speaker).unwrap();
            assert_eq!(out.dims(), &[2, 10, seg_len.as_usize()]);
            let values: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
            assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn registers_input_layer_weights() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cfg = PatcherConfig {
            c_in: 4,
            c_h: 6,
            c_a: 2,
            ..PatcherConfig::default()
        };
        Patcher::new(&cfg, vb).unwrap();
        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("input_layer.weight"));
        assert!(data.contains_key("emb1.weight"));
        assert!(data.contains_key("emb2.weight"));
        assert!(!data.contains_key("emb3.weight"));
    }
}
