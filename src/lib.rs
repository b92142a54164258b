//! Voice-conversion GAN networks in pure Rust.
//!
//! A candle implementation of the encoder, decoder, patcher, speaker
//! classifier and patch discriminator used to disentangle speaker identity
//! from linguistic content in magnitude spectrograms.
//!
//! ## Architecture
//!
//! ```text
//! spectrogram [B, 513, T]
//!        ↓
//!   Encoder ───────────→ latent [B, enc_size, T/8] ─→ SpeakerClassifier
//!        ↓                                               (adversarial)
//!   Decoder(speaker) ──→ spectrogram [B, 513, T]
//!        ↓
//!   Patcher(speaker) ──→ refined spectrogram
//!        ↓
//!   PatchDiscriminator → real/fake score + speaker logits
//! ```
//!
//! ## Modules
//!
//! - [`config`]: hyperparameters for every network, JSON loading
//! - [`device`]: CPU / CUDA selection
//! - [`model`]: the networks and their building blocks

pub mod config;
pub mod device;
pub mod model;

mod error;

pub use error::{Error, Result};
