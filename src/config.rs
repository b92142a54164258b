//! Configuration for the voice-conversion networks.
//!
//! Every network takes a plain config struct with the same defaults as the
//! reference training setup. Segment length and encoding mode are closed
//! enums, so an unsupported value is rejected while the config is built
//! (or deserialized), before any weights are allocated.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sequence length below which padding is constant-zero instead of reflect.
pub const REFLECT_PAD_THRESHOLD: usize = 64;

/// Supported fixed time-axis window lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum SegLen {
    S32,
    S64,
    S128,
}

/// Padding mode applied before a "same" convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    /// Zero padding.
    Constant,
    /// Mirror padding that does not repeat the edge sample.
    Reflect,
}

impl SegLen {
    pub const ALL: [SegLen; 3] = [SegLen::S32, SegLen::S64, SegLen::S128];

    pub fn as_usize(self) -> usize {
        match self {
            SegLen::S32 => 32,
            SegLen::S64 => 64,
            SegLen::S128 => 128,
        }
    }

    pub fn pad_mode(self) -> PadMode {
        if self.as_usize() < REFLECT_PAD_THRESHOLD {
            PadMode::Constant
        } else {
            PadMode::Reflect
        }
    }

    /// Latent time length after the encoder's three stride-2 stages.
    pub fn latent_len(self) -> usize {
        self.as_usize() / 8
    }

    /// Kernel of the speaker classifier's last convolution (collapses the latent time axis).
    pub fn classifier_kernel(self) -> usize {
        self.latent_len()
    }

    /// `(height, width)` kernel of the discriminator heads.
    pub fn discriminator_kernel(self) -> (usize, usize) {
        match self {
            SegLen::S32 => (17, 1),
            SegLen::S64 => (17, 2),
            SegLen::S128 => (17, 4),
        }
    }
}

impl TryFrom<usize> for SegLen {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self> {
        match value {
            32 => Ok(SegLen::S32),
            64 => Ok(SegLen::S64),
            128 => Ok(SegLen::S128),
            other => Err(Error::Unsupported(format!(
                "Segment length {other} is not supported!"
            ))),
        }
    }
}

impl From<SegLen> for usize {
    fn from(seg_len: SegLen) -> Self {
        seg_len.as_usize()
    }
}

impl fmt::Display for SegLen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_usize())
    }
}

/// How the encoder's final projection is turned into a latent code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EncodingMode {
    /// Leaky-ReLU, real-valued latent.
    Continues,
    /// One Gumbel one-hot class per time step.
    OneHot,
    /// `enc_size` one-hots summed and clamped into a binary vector.
    Binary,
    /// `enc_size` independent two-way Gumbel choices.
    MultilabelBinary,
    /// Gumbel-softmax over the whole code vector at each time step.
    ///
    /// Computed exactly like [`EncodingMode::OneHot`]; the two tags are kept
    /// apart so configs written for either load. Normalising over the time
    /// axis instead is not supported.
    GumbelT,
}

impl EncodingMode {
    pub const ALL: [EncodingMode; 5] = [
        EncodingMode::Continues,
        EncodingMode::OneHot,
        EncodingMode::Binary,
        EncodingMode::MultilabelBinary,
        EncodingMode::GumbelT,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EncodingMode::Continues => "continues",
            EncodingMode::OneHot => "one_hot",
            EncodingMode::Binary => "binary",
            EncodingMode::MultilabelBinary => "multilabel_binary",
            EncodingMode::GumbelT => "gumbel_t",
        }
    }

    /// Output width of the final projection for a given code size.
    pub fn projection_size(self, enc_size: usize) -> usize {
        match self {
            EncodingMode::Binary => enc_size * enc_size,
            EncodingMode::MultilabelBinary => enc_size * 2,
            EncodingMode::Continues | EncodingMode::OneHot | EncodingMode::GumbelT => enc_size,
        }
    }
}

impl FromStr for EncodingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EncodingMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| Error::Unsupported(format!("Invalid encoding mode: {s}")))
    }
}

impl TryFrom<String> for EncodingMode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EncodingMode> for String {
    fn from(mode: EncodingMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_slope(name: &str, ns: f64) -> Result<()> {
    if !ns.is_finite() || ns < 0.0 {
        return Err(Error::Config(format!("{name}: negative slope must be >= 0, got {ns}")));
    }
    Ok(())
}

fn check_dropout(name: &str, dp: f32) -> Result<()> {
    if !(0.0..1.0).contains(&dp) {
        return Err(Error::Config(format!("{name}: dropout must be in [0, 1), got {dp}")));
    }
    Ok(())
}

fn check_nonzero(name: &str, field: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::Config(format!("{name}: {field} must be non-zero")));
    }
    Ok(())
}

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Input feature channels.
    pub c_in: usize,
    /// Channels of each multi-scale input convolution.
    pub c_h1: usize,
    /// Trunk width.
    pub c_h2: usize,
    /// GRU hidden size per direction.
    pub c_h3: usize,
    pub ns: f64,
    pub dp: f32,
    pub enc_size: usize,
    pub seg_len: SegLen,
    pub enc_mode: EncodingMode,
    /// Softmax temperature of the discrete modes.
    pub gumbel_temperature: f64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            c_in: 513,
            c_h1: 128,
            c_h2: 512,
            c_h3: 128,
            ns: 0.2,
            dp: 0.5,
            enc_size: 512,
            seg_len: SegLen::S64,
            enc_mode: EncodingMode::Continues,
            gumbel_temperature: crate::model::gumbel::DEFAULT_TEMPERATURE,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("c_in", self.c_in),
            ("c_h1", self.c_h1),
            ("c_h2", self.c_h2),
            ("c_h3", self.c_h3),
            ("enc_size", self.enc_size),
        ] {
            check_nonzero("encoder", field, value)?;
        }
        check_slope("encoder", self.ns)?;
        check_dropout("encoder", self.dp)?;
        if !(self.gumbel_temperature.is_finite() && self.gumbel_temperature > 0.0) {
            return Err(Error::Config(format!(
                "encoder: gumbel_temperature must be positive, got {}",
                self.gumbel_temperature
            )));
        }
        let needs_even = matches!(
            self.enc_mode,
            EncodingMode::Continues | EncodingMode::OneHot | EncodingMode::GumbelT
        );
        if needs_even && self.enc_size % 2 != 0 {
            return Err(Error::Config(format!(
                "encoder: enc_size must be even for mode {}, got {}",
                self.enc_mode, self.enc_size
            )));
        }
        Ok(())
    }

    /// Channels entering the final projection (dense output + both GRU directions).
    pub fn summary_channels(&self) -> usize {
        self.c_h2 + 2 * self.c_h3
    }
}

/// Decoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Latent channels.
    pub c_in: usize,
    /// Output feature channels.
    pub c_out: usize,
    /// Hidden width (also the speaker embedding width).
    pub c_h: usize,
    /// Number of speakers.
    pub c_a: usize,
    pub ns: f64,
    pub seg_len: SegLen,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            c_in: 512,
            c_out: 513,
            c_h: 512,
            c_a: 8,
            ns: 0.2,
            seg_len: SegLen::S64,
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("c_in", self.c_in),
            ("c_out", self.c_out),
            ("c_h", self.c_h),
            ("c_a", self.c_a),
        ] {
            check_nonzero("decoder", field, value)?;
        }
        if self.c_h % 2 != 0 {
            return Err(Error::Config(format!(
                "decoder: c_h must be even for the bidirectional GRU, got {}",
                self.c_h
            )));
        }
        check_slope("decoder", self.ns)
    }
}

/// Patcher configuration. Same surface as the decoder.
pub type PatcherConfig = DecoderConfig;

/// Speaker classifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub c_in: usize,
    pub c_h: usize,
    pub n_class: usize,
    pub dp: f32,
    pub ns: f64,
    pub seg_len: SegLen,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            c_in: 512,
            c_h: 512,
            n_class: 8,
            dp: 0.1,
            ns: 0.01,
            seg_len: SegLen::S128,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        check_nonzero("classifier", "c_in", self.c_in)?;
        check_nonzero("classifier", "n_class", self.n_class)?;
        if self.c_h < 4 || self.c_h % 4 != 0 {
            return Err(Error::Config(format!(
                "classifier: c_h must be a positive multiple of 4, got {}",
                self.c_h
            )));
        }
        check_slope("classifier", self.ns)?;
        check_dropout("classifier", self.dp)
    }
}

/// Patch discriminator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscriminatorConfig {
    pub n_class: usize,
    pub ns: f64,
    pub dp: f32,
    pub seg_len: SegLen,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            n_class: 33,
            ns: 0.2,
            dp: 0.1,
            seg_len: SegLen::S128,
        }
    }
}

impl DiscriminatorConfig {
    pub fn validate(&self) -> Result<()> {
        check_nonzero("discriminator", "n_class", self.n_class)?;
        check_slope("discriminator", self.ns)?;
        check_dropout("discriminator", self.dp)
    }
}

/// Encoder + decoder generator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub ns: f64,
    pub dp: f32,
    pub enc_size: usize,
    pub emb_size: usize,
    pub seg_len: SegLen,
    pub n_speakers: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            ns: 0.2,
            dp: 0.5,
            enc_size: 512,
            emb_size: 512,
            seg_len: SegLen::S64,
            n_speakers: 8,
        }
    }
}

impl GeneratorConfig {
    /// Encoder half: default widths, continuous latent.
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            ns: self.ns,
            dp: self.dp,
            enc_size: self.enc_size,
            seg_len: self.seg_len,
            enc_mode: EncodingMode::Continues,
            ..EncoderConfig::default()
        }
    }

    /// Decoder half, reading the encoder's latent.
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            ns: self.ns,
            c_in: self.enc_size,
            c_h: self.emb_size,
            c_a: self.n_speakers,
            seg_len: self.seg_len,
            ..DecoderConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.encoder_config().validate()?;
        self.decoder_config().validate()
    }
}

/// All network configurations of one experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub encoder: EncoderConfig,
    pub decoder: DecoderConfig,
    pub classifier: ClassifierConfig,
    pub discriminator: DiscriminatorConfig,
    pub patcher: PatcherConfig,
    pub generator: GeneratorConfig,
}

impl ModelConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        self.decoder.validate()?;
        self.classifier.validate()?;
        self.discriminator.validate()?;
        self.patcher.validate()?;
        self.generator.validate()
    }

    /// Use one segment length for every network.
    pub fn with_seg_len(mut self, seg_len: SegLen) -> Self {
        self.encoder.seg_len = seg_len;
        self.decoder.seg_len = seg_len;
        self.classifier.seg_len = seg_len;
        self.discriminator.seg_len = seg_len;
        self.patcher.seg_len = seg_len;
        self.generator.seg_len = seg_len;
        self
    }
}
