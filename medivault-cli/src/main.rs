use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use color_eyre::Result;
use medivault_cli::{
    commands::{age_table, encode_patients, roundtrip, run_queries},
    config::{load_config, ConfigFormat},
};
use medivault_privacy::{EncodeCache, JsonFileRecords, QueryEngine, QueryRequest, ValueCodec};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[cfg(any(
    all(feature = "dev", feature = "test"),
    all(feature = "dev", feature = "prod"),
    all(feature = "test", feature = "prod")
))]
compile_error!(
    "Only one of the `dev`, `test`, or `prod` features may be enabled for medivault-cli."
);

#[derive(Debug, Parser)]
#[command(
    name = "medivault",
    version,
    about = "Privacy-budgeted count queries over encoded patient records"
)]
struct Cli {
    /// Path to configuration file (TOML or YAML).
    #[arg(long, default_value = "configs/medivault.toml")]
    config: PathBuf,
    /// Explicit configuration format override.
    #[arg(long, value_enum, default_value_t = ConfigFormat::Auto)]
    config_format: ConfigFormat,
    /// Emit logs as JSON lines instead of text.
    #[arg(long)]
    json_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer a noised count query against the configured dataset.
    Query {
        #[arg(long)]
        requester: String,
        #[arg(long, default_value_t = 30)]
        age_min: i64,
        #[arg(long, default_value_t = 40)]
        age_max: i64,
        #[arg(long, default_value = "diabetes")]
        condition: String,
        #[arg(long, default_value_t = 1.0)]
        epsilon: f64,
        /// Send the same request this many times against one ledger.
        #[arg(long, default_value_t = 1)]
        repeat: u16,
        /// Overrides `dataset.records-path` from the config.
        #[arg(long)]
        records: Option<PathBuf>,
    },
    /// Encode a plaintext patient export into a records file.
    EncodeDataset {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print the encoded form of every age in a range.
    PrecomputeAges {
        #[arg(long, default_value_t = 18)]
        min: i64,
        #[arg(long, default_value_t = 80)]
        max: i64,
    },
    /// Encode then decode a single value.
    Roundtrip { value: String },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli.config, cli.config_format)?;
    let codec = ValueCodec::from_config(&config.engine.codec)?;

    match cli.command {
        Command::Query {
            requester,
            age_min,
            age_max,
            condition,
            epsilon,
            repeat,
            records,
        } => {
            let path = records.unwrap_or(config.dataset.records_path.clone());
            let engine = QueryEngine::new(&config.engine, Arc::new(JsonFileRecords::new(path)))?;
            let request = QueryRequest::for_requester(requester)
                .with_ages(age_min, age_max)
                .with_condition(condition)
                .with_epsilon(epsilon);
            print_json(&run_queries(&engine, &request, repeat))?;
            let snapshot = engine.telemetry().flush();
            tracing::info!(telemetry = %snapshot.to_json()?, "query run complete");
        }
        Command::EncodeDataset { input, output } => {
            let cache = EncodeCache::new(codec);
            let written = encode_patients(&cache, &input, &output)?;
            println!("encoded {written} records into {}", output.display());
        }
        Command::PrecomputeAges { min, max } => {
            let cache = EncodeCache::new(codec);
            print_json(&age_table(&cache, min, max)?)?;
        }
        Command::Roundtrip { value } => {
            print_json(&roundtrip(&codec, &value)?)?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
