//! vcgan CLI: build the networks and run a synthetic forward pass.
//!
//! Every selected network gets fresh random weights and a random input of
//! the configured shape. One JSON line per network is printed to stdout
//! with its name, segment length, input shape, output shapes and parameter
//! count, e.g. for the decoder at seg_len 64:
//!
//! ```json
//! {"network":"decoder","seg_len":64,"input":[2,512,8],"outputs":{"output":[2,513,64]},"parameters":...}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};
use vcgan_rs::{
    config::{EncodingMode, ModelConfig, SegLen},
    device::DevicePolicy,
    model::{
        Decoder, Encoder, EnhancedGenerator, PatchDiscriminator, Patcher, SpeakerClassifier,
        parameter_count,
    },
};

/// Frequency bins of a 1024-point magnitude spectrogram.
const SPECTRAL_BINS: usize = 513;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Network {
    Encoder,
    Decoder,
    Classifier,
    Discriminator,
    Patcher,
    Generator,
    All,
}

impl Network {
    const EACH: [Network; 6] = [
        Network::Encoder,
        Network::Decoder,
        Network::Classifier,
        Network::Discriminator,
        Network::Patcher,
        Network::Generator,
    ];

    fn name(self) -> &'static str {
        match self {
            Network::Encoder => "encoder",
            Network::Decoder => "decoder",
            Network::Classifier => "classifier",
            Network::Discriminator => "discriminator",
            Network::Patcher => "patcher",
            Network::Generator => "generator",
            Network::All => "all",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "vcgan",
    about = "Voice-conversion GAN network smoke runner",
    long_about = "Build the voice-conversion networks with random weights and run\n\
                  one forward pass on synthetic input. A JSON summary line per\n\
                  network is printed to stdout."
)]
struct Args {
    /// JSON file with network hyperparameters. Missing fields use defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Which network to run.
    #[arg(long, value_enum, default_value_t = Network::All)]
    network: Network,

    /// Batch size of the synthetic input.
    #[arg(long, short = 'b', default_value_t = 2)]
    batch: usize,

    /// Segment length (32, 64 or 128) applied to every network.
    #[arg(long)]
    seg_len: Option<usize>,

    /// Encoder latent mode: continues, one_hot, binary, multilabel_binary, gumbel_t.
    #[arg(long)]
    enc_mode: Option<String>,

    /// Run on the CPU even when CUDA is available.
    #[arg(long)]
    cpu: bool,

    /// Seed for the synthetic speaker ids. Omit for a random seed each run.
    #[arg(long, short = 's')]
    seed: Option<u64>,
}

struct Runner {
    cfg: ModelConfig,
    device: Device,
    batch: usize,
    rng: ChaCha8Rng,
}

impl Runner {
    fn features(&self, channels: usize, time: usize) -> anyhow::Result<Tensor> {
        Ok(Tensor::randn(0f32, 1f32, (self.batch, channels, time), &self.device)?)
    }

    fn spectrogram(&self, time: usize) -> anyhow::Result<Tensor> {
        Ok(Tensor::rand(0f32, 1f32, (self.batch, SPECTRAL_BINS, time), &self.device)?)
    }

    fn speakers(&mut self, n_speakers: usize) -> anyhow::Result<Tensor> {
        let ids: Vec<u32> = (0..self.batch)
            .map(|_| self.rng.random_range(0..n_speakers as u32))
            .collect();
        Ok(Tensor::from_vec(ids, self.batch, &self.device)?)
    }

    fn run(&mut self, network: Network) -> anyhow::Result<Value> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);

        let (seg_len, input, outputs) = match network {
            Network::Encoder => {
                let cfg = self.cfg.encoder.clone();
                let net = Encoder::new(&cfg, vb)?;
                let x = self.features(cfg.c_in, cfg.seg_len.as_usize())?;
                let (latent, proj) = net.forward(&x, false)?;
                let outputs = json!({ "latent": latent.dims(), "projection": proj.dims() });
                (cfg.seg_len, x, outputs)
            }
            Network::Decoder => {
                let cfg = self.cfg.decoder.clone();
                let net = Decoder::new(&cfg, vb)?;
                let x = self.features(cfg.c_in, cfg.seg_len.latent_len())?;
                let speaker = self.speakers(cfg.c_a)?;
                let out = net.forward(&x, &speaker)?;
                (cfg.seg_len, x, json!({ "output": out.dims() }))
            }
            Network::Classifier => {
                let cfg = self.cfg.classifier.clone();
                let net = SpeakerClassifier::new(&cfg, vb)?;
                let x = self.features(cfg.c_in, cfg.seg_len.latent_len())?;
                let logits = net.forward(&x, false)?;
                (cfg.seg_len, x, json!({ "logits": logits.dims() }))
            }
            Network::Discriminator => {
                let cfg = self.cfg.discriminator.clone();
                let net = PatchDiscriminator::new(&cfg, vb)?;
                let x = self.spectrogram(cfg.seg_len.as_usize())?;
                let (score, logits) = net.forward(&x, true, false)?;
                let outputs = json!({
                    "score": score.dims(),
                    "logits": logits.as_ref().map(|l| l.dims().to_vec()),
                });
                (cfg.seg_len, x, outputs)
            }
            Network::Patcher => {
                let cfg = self.cfg.patcher.clone();
                let net = Patcher::new(&cfg, vb)?;
                let x = self.features(cfg.c_in, cfg.seg_len.as_usize())?;
                let speaker = self.speakers(cfg.c_a)?;
                let out = net.forward(&x, &speaker)?;
                (cfg.seg_len, x, json!({ "output": out.dims() }))
            }
            Network::Generator => {
                let cfg = self.cfg.generator.clone();
                let net = EnhancedGenerator::new(&cfg, vb)?;
                let x = self.spectrogram(cfg.seg_len.as_usize())?;
                let speaker = self.speakers(cfg.n_speakers)?;
                let latent = net.encode(&x, false)?;
                let out = net.forward(&x, &speaker, false)?;
                let outputs = json!({ "latent": latent.dims(), "output": out.dims() });
                (cfg.seg_len, x, outputs)
            }
            Network::All => anyhow::bail!("`all` is expanded before running"),
        };

        Ok(json!({
            "network": network.name(),
            "seg_len": seg_len.as_usize(),
            "input": input.dims(),
            "outputs": outputs,
            "parameters": parameter_count(&varmap),
        }))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.batch == 0 {
        anyhow::bail!("batch must be at least 1");
    }

    let mut cfg = match &args.config {
        Some(path) => ModelConfig::from_json_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?,
        None => ModelConfig::default(),
    };
    if let Some(n) = args.seg_len {
        cfg = cfg.with_seg_len(SegLen::try_from(n)?);
    }
    if let Some(mode) = &args.enc_mode {
        cfg.encoder.enc_mode = mode.parse::<EncodingMode>()?;
    }
    cfg.validate()?;

    let policy = if args.cpu {
        DevicePolicy::Cpu
    } else {
        DevicePolicy::PreferCuda
    };
    let device = policy.resolve()?;
    tracing::info!("Using device: {:?}", device);

    let seed = args.seed.unwrap_or_else(rand::random);
    tracing::info!(seed, "speaker id seed");

    let networks: Vec<Network> = match args.network {
        Network::All => Network::EACH.to_vec(),
        one => vec![one],
    };

    let mut runner = Runner {
        cfg,
        device,
        batch: args.batch,
        rng: ChaCha8Rng::seed_from_u64(seed),
    };
    for network in networks {
        tracing::info!("Running {}...", network.name());
        let summary = runner
            .run(network)
            .map_err(|e| anyhow::anyhow!("{} failed: {e}", network.name()))?;
        println!("{summary}");
    }

    Ok(())
}
