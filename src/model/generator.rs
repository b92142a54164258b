//! Encoder + decoder in one module.
//!
//! ```text
//! [B, 513, T] ─→ Encoder (continuous) ─→ [B, enc_size, T/8]
//!             ─→ Decoder(speaker)     ─→ [B, 513, T]
//! ```
//!
//! Weights live under `Encoder.*` and `Decoder.*`.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::Result;
use crate::config::GeneratorConfig;
use crate::model::decoder::Decoder;
use crate::model::encoder::Encoder;

#[derive(Debug, Clone)]
pub struct EnhancedGenerator {
    encoder: Encoder,
    decoder: Decoder,
    cfg: GeneratorConfig,
}

impl EnhancedGenerator {
    pub fn new(cfg: &GeneratorConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        tracing::debug!(
            seg_len = %cfg.seg_len,
            enc_size = cfg.enc_size,
            speakers = cfg.n_speakers,
            "building generator"
        );
        let encoder = Encoder::new(&cfg.encoder_config(), vb.pp("Encoder"))?;
        let decoder = Decoder::new(&cfg.decoder_config(), vb.pp("Decoder"))?;
        Ok(Self {
            encoder,
            decoder,
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.cfg
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Latent code `[B, enc_size, T/8]` of `[B, 513, T]`.
    pub fn encode(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (latent, _proj) = self.encoder.forward(x, train)?;
        Ok(latent)
    }

    /// Convert `[B, 513, T]` to the voice of `speaker` `[B]`.
    pub fn forward(&self, x: &Tensor, speaker: &Tensor, train: bool) -> Result<Tensor> {
        let latent = self.encode(x, train)?;
        self.decoder.forward(&latent, speaker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegLen;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_cfg(seg_len: SegLen) -> GeneratorConfig {
        GeneratorConfig {
            enc_size: 8,
            emb_size: 8,
            n_speakers: 4,
            seg_len,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn converts_segment_to_segment() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let generator = EnhancedGenerator::new(&small_cfg(SegLen::S32), vb).unwrap();
        let x = Tensor::rand(0f32, 1.0, (2, 513, 32), &device).unwrap();
        let speaker = Tensor::new(&[3u32, 1], &device).unwrap();

        let latent = generator.encode(&x, false).unwrap();
        assert_eq!(latent.dims(), &[2, 8, 4]);

        let out = generator.forward(&x, &speaker, false).unwrap();
        assert_eq!(out.dims(), &[2, 513, 32]);
    }

    #[test]
    fn decoded_output_re_encodes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let generator = EnhancedGenerator::new(&small_cfg(SegLen::S64), vb).unwrap();
        let latent = Tensor::randn(0f32, 1.0, (3, 8, 8), &device).unwrap();
        let speaker = Tensor::new(&[0u32, 1, 2], &device).unwrap();

        let features = generator.decoder().forward(&latent, &speaker).unwrap();
        assert_eq!(features.dims(), &[3, 513, 64]);
        let again = generator.encode(&features, false).unwrap();
        assert_eq!(again.dims(), latent.dims());
    }

    #[test]
    fn weights_are_namespaced() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        EnhancedGenerator::new(&small_cfg(SegLen::S32), vb).unwrap();
        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("Encoder.conv2.weight"));
        assert!(data.contains_key("Decoder.input_emb.weight"));
        assert!(data.keys().all(|k| k.starts_with("Encoder.") || k.starts_with("Decoder.")));
    }

    #[test]
    fn rejects_unknown_speaker() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let generator = EnhancedGenerator::new(&small_cfg(SegLen::S32), vb).unwrap();
        let x = Tensor::zeros((1, 513, 32), DType::F32, &device).unwrap();
        let speaker = Tensor::new(&[4u32], &device).unwrap();
        assert!(generator.forward(&x, &speaker, false).is_err());
    }
}
