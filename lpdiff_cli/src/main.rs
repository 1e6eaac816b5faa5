use lpdiff_core::config::HarnessConfig;
use lpdiff_core::corpus::{Results, decode_seeds};
use lpdiff_core::driver::Harness;
use lpdiff_core::output::DecodeOutput;
use lpdiff_core::store::CorpusStore;
use lpdiff_core::{Priority, Registry};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "lpdiff.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about = "Differential testing for line-protocol codecs", long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode one input with every implementation and print what each produced.
    Run {
        /// Input file, or `-` for standard input.
        input: String,
        /// Comma-separated implementations to run (default all).
        #[clap(long = "impl", value_delimiter = ',')]
        implementations: Vec<String>,
        #[clap(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
    /// Decode one input and fail if any two implementations disagree.
    Check {
        input: String,
        #[clap(long = "impl", value_delimiter = ',')]
        implementations: Vec<String>,
    },
    /// Write the corpus' decode texts out as fuzzer seed files.
    Seeds {
        #[clap(long, default_value = "corpus")]
        out: PathBuf,
    },
    /// Run every corpus fixture and write the generated results files.
    Results,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

fn load_config(path: Option<PathBuf>) -> Result<HarnessConfig, anyhow::Error> {
    match path {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            HarnessConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG);
            if default_config_path.exists() {
                info!("No config file specified, loading default: {default_config_path:?}");
                HarnessConfig::load_from_file(&default_config_path)
            } else {
                info!("No config file specified and default '{DEFAULT_CONFIG}' not found, using built-in defaults.");
                Ok(HarnessConfig::default())
            }
        }
    }
}

fn read_input(input: &str) -> Result<Vec<u8>, anyhow::Error> {
    if input == "-" {
        let mut data = Vec::new();
        std::io::stdin()
            .read_to_end(&mut data)
            .context("error reading stdin")?;
        Ok(data)
    } else {
        std::fs::read(input).with_context(|| format!("cannot read input file {input:?}"))
    }
}

fn build_harness(
    mut config: HarnessConfig,
    implementations: Vec<String>,
) -> Result<Harness, anyhow::Error> {
    if !implementations.is_empty() {
        config.run.implementations = Some(implementations);
    }
    let harness = Harness::new(config, Registry::new())?;
    if harness.oracle().registry().is_empty() {
        warn!("no implementations configured; add [[codecs]] entries to the config file");
    }
    Ok(harness)
}

fn require_store(config: &HarnessConfig) -> Result<CorpusStore, anyhow::Error> {
    CorpusStore::resolve(&config.store).ok_or_else(|| {
        anyhow::anyhow!(
            "no corpus directory: set ${} or store.corpus-dir",
            config.store.corpus_dir_env
        )
    })
}

fn finish(harness: Harness) {
    let (observed, written) = harness.finish();
    match written {
        Ok(()) => info!(
            decode = observed.decode.len(),
            encode = observed.encode.len(),
            "run finished"
        ),
        Err(e) => warn!("failed to write observed inputs: {e}"),
    }
}

fn run(harness: &Harness, data: &[u8], format: Format) -> Result<(), anyhow::Error> {
    let evaluation = harness.evaluate(data);
    let outputs: BTreeMap<String, DecodeOutput> = evaluation
        .outcomes
        .into_iter()
        .filter_map(|(name, outcome)| outcome.into_output().map(|output| (name, output)))
        .collect();
    let text = match format {
        Format::Yaml => serde_yaml::to_string(&outputs)?,
        Format::Json => serde_json::to_string_pretty(&outputs)? + "\n",
    };
    print!("{text}");
    Ok(())
}

fn check(harness: &Harness, data: &[u8]) -> ExitCode {
    let digest = format!("{:x}", md5::compute(data));
    match harness.check_one_input(data) {
        Ok(priority) => {
            let label = match priority {
                Priority::High => "high",
                Priority::Normal => "normal",
            };
            println!("{digest}: consistent, priority {label}");
            ExitCode::SUCCESS
        }
        Err(inconsistency) => {
            eprint!("{inconsistency}");
            ExitCode::FAILURE
        }
    }
}

fn write_seeds(config: &HarnessConfig, out: &Path) -> Result<(), anyhow::Error> {
    let store = require_store(config)?;
    let corpus = store.read_corpus()?;
    std::fs::create_dir_all(out).with_context(|| format!("cannot create {out:?}"))?;
    let seeds = decode_seeds(&corpus);
    for (name, data) in &seeds {
        let path = out.join(name);
        std::fs::write(&path, data.as_slice()).with_context(|| format!("cannot write {path:?}"))?;
    }
    info!(count = seeds.len(), dir = ?out, "wrote seed files");
    Ok(())
}

fn write_results(harness: &Harness) -> Result<ExitCode, anyhow::Error> {
    let store = require_store(harness.config())?;
    let corpus = store.read_corpus()?;
    let results = Results::gather(&corpus, harness.oracle().registry(), harness.context());
    store.write_results(&results)?;
    let inconsistent = results.inconsistencies();
    for name in &inconsistent {
        warn!(fixture = %name, "implementations disagree");
    }
    Ok(if inconsistent.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> Result<ExitCode, anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Run {
            input,
            implementations,
            format,
        } => {
            let data = read_input(&input)?;
            let harness = build_harness(config, implementations)?;
            run(&harness, &data, format)?;
            finish(harness);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            input,
            implementations,
        } => {
            let data = read_input(&input)?;
            let harness = build_harness(config, implementations)?;
            let code = check(&harness, &data);
            finish(harness);
            Ok(code)
        }
        Commands::Seeds { out } => {
            write_seeds(&config, &out)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Results => {
            let harness = build_harness(config, Vec::new())?;
            let code = write_results(&harness)?;
            finish(harness);
            Ok(code)
        }
    }
}
