// chipforge compose: CLI entry point.
//
// Loads a project config (or the 8-bit defaults), applies command-line
// overrides, runs the composition pipeline with the built-in algorithmic
// generator and metric critic, and writes the results:
//   <out>/score.json   exported score (when at least one window merged)
//   <out>/score.mid    MIDI rendering of the same score
//   <out>/run.json     full run result, including failed windows
//
// Usage:
//   cargo run -p chipforge_compose --bin compose -- [--config project.json]
//     [--out DIR] [--seed N] [--bars N] [--key KEY] [--tempo BPM]
//     [--threshold SCORE] [--retries N] [--no-midi]
//
// Logging goes through `tracing`; set LOG_LEVEL (e.g. `debug`) to change the
// filter. Exits non-zero on configuration or export errors, or when no
// window could be filled.

use std::path::PathBuf;

use chipforge_compose::config::ProjectConfig;
use chipforge_compose::critic::MetricCritic;
use chipforge_compose::export::{write_run_result_json, write_score_json};
use chipforge_compose::generator::AlgorithmicGenerator;
use chipforge_compose::midi::write_midi;
use chipforge_compose::orchestrator::Orchestrator;
use chipforge_protocol::RunStatus;
use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Project config JSON. Built-in defaults are used when omitted.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Output directory.
    #[clap(short, long, default_value = "out")]
    pub out: PathBuf,

    /// Generator seed.
    #[clap(long)]
    pub seed: Option<u64>,

    /// Number of bars to compose.
    #[clap(long)]
    pub bars: Option<u32>,

    /// Key / scale name (C, Cm, C_penta, Cm_penta).
    #[clap(long)]
    pub key: Option<String>,

    #[clap(long)]
    pub title: Option<String>,

    #[clap(long)]
    pub tempo: Option<u16>,

    /// Minimum critic score for a candidate to be merged.
    #[clap(long)]
    pub threshold: Option<f64>,

    /// Retries per window after the first attempt.
    #[clap(long)]
    pub retries: Option<u32>,

    /// Skip the MIDI file.
    #[clap(long)]
    pub no_midi: bool,
}

impl CliArgs {
    fn apply(&self, config: &mut ProjectConfig) {
        let comp = &mut config.composition;
        if let Some(seed) = self.seed {
            comp.seed = seed;
        }
        if let Some(bars) = self.bars {
            comp.length_bars = bars;
        }
        if let Some(key) = &self.key {
            comp.key = key.clone();
        }
        if let Some(title) = &self.title {
            comp.title = title.clone();
        }
        if let Some(tempo) = self.tempo {
            comp.tempo_bpm = tempo;
        }
        if let Some(threshold) = self.threshold {
            config.run.acceptance_threshold = threshold;
        }
        if let Some(retries) = self.retries {
            config.run.retry_budget = retries;
        }
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init();

    let mut config = match &args.config {
        Some(path) => match ProjectConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        },
        None => ProjectConfig::default(),
    };
    args.apply(&mut config);

    let orchestrator = match Orchestrator::from_project(&config) {
        Ok(o) => o,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let generator = AlgorithmicGenerator::new(config.composition.seed, config.composition.key.clone());
    let critic = MetricCritic::new(orchestrator.constraints().clone());
    let result = orchestrator.run(&generator, &critic).await;

    if let Err(e) = std::fs::create_dir_all(&args.out) {
        error!("cannot create {}: {e}", args.out.display());
        std::process::exit(1);
    }

    let run_path = args.out.join("run.json");
    if let Err(e) = write_run_result_json(&result, &run_path) {
        error!("writing {}: {e}", run_path.display());
        std::process::exit(1);
    }
    info!("wrote {}", run_path.display());

    if let Some(score) = &result.final_composition {
        let score_path = args.out.join("score.json");
        if let Err(e) = write_score_json(score, &score_path) {
            error!("writing {}: {e}", score_path.display());
            std::process::exit(1);
        }
        info!("wrote {}", score_path.display());

        if !args.no_midi {
            let midi_path = args.out.join("score.mid");
            if let Err(e) = write_midi(score, &midi_path) {
                error!("writing {}: {e}", midi_path.display());
                std::process::exit(1);
            }
            info!("wrote {}", midi_path.display());
        }
    }

    if result.status == RunStatus::Failed {
        std::process::exit(1);
    }
}
