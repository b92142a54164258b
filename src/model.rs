//! Networks of the voice-conversion GAN.
//!
//! ## Components
//!
//! - [`encoder`]: spectral features → speaker-independent latent code
//! - [`decoder`]: latent code + speaker id → spectral features
//! - [`generator`]: encoder and decoder chained under one weight namespace
//! - [`patcher`]: time-preserving speaker-conditioned refiner
//! - [`classifier`]: speaker logits from a latent code
//! - [`discriminator`]: real/fake score and speaker logits from features
//!
//! Shared building blocks live in [`ops`], [`layers`] and [`gumbel`].

pub mod classifier;
pub mod decoder;
pub mod discriminator;
pub mod encoder;
pub mod generator;
pub mod gumbel;
pub mod layers;
pub mod ops;
pub mod patcher;

pub use classifier::SpeakerClassifier;
pub use decoder::Decoder;
pub use discriminator::PatchDiscriminator;
pub use encoder::Encoder;
pub use generator::EnhancedGenerator;
pub use patcher::Patcher;

/// Total number of scalar parameters held by `varmap`.
pub fn parameter_count(varmap: &candle_nn::VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn counts_linear_parameters() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        candle_nn::linear(3, 4, vb.pp("fc")).unwrap();
        assert_eq!(parameter_count(&varmap), 3 * 4 + 4);
    }
}
