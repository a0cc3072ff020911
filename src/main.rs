use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

use libris_etl::config::{Config, OutputFormat};
use libris_etl::logging;
use libris_etl::pipeline::{self, PipelineInputs};

#[derive(Parser)]
#[command(name = "libris_etl")]
#[command(about = "Bibliographic and circulation dump normalizer")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to a TOML config file (defaults to ./config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output directory for the entity files
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Output encoding
    #[arg(long, value_enum, global = true)]
    format: Option<OutputFormat>,

    /// Seed for every RNG in the run
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage the given inputs allow
    Run {
        /// Open Library dump (tab-separated, JSON payload per line)
        #[arg(long)]
        ol_dump: Option<PathBuf>,
        /// Open Library ratings dump
        #[arg(long)]
        ratings: Option<PathBuf>,
        /// Open Library reading-log dump
        #[arg(long)]
        reading_log: Option<PathBuf>,
        /// Circulation export (Seattle Public Library format)
        #[arg(long)]
        checkouts: Option<PathBuf>,
    },
    /// Run only the bibliographic dump pass and its post-passes
    Openlib {
        #[arg(long)]
        ol_dump: PathBuf,
    },
    /// Run only the circulation pass against an existing staging store
    Checkouts {
        #[arg(long)]
        checkouts: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(format) = cli.format {
        config.format = format;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    let inputs = match cli.command {
        Commands::Run {
            ol_dump,
            ratings,
            reading_log,
            checkouts,
        } => PipelineInputs {
            ol_dump,
            ratings,
            reading_log,
            checkouts,
        },
        Commands::Openlib { ol_dump } => PipelineInputs {
            ol_dump: Some(ol_dump),
            ..Default::default()
        },
        Commands::Checkouts { checkouts } => PipelineInputs {
            checkouts: Some(checkouts),
            ..Default::default()
        },
    };

    match pipeline::run(&config, &inputs).await {
        Ok(summary) => {
            println!("\n📦 Pipeline results:");
            println!("   Works: {}", summary.works);
            println!("   Authors: {}", summary.authors);
            println!("   Publishers: {}", summary.publishers);
            println!("   Users: {}", summary.users);
            println!("   Output directory: {}", config.output_dir.display());
            Ok(())
        }
        Err(e) => {
            error!("Pipeline failed: {}", e);
            Err(e.into())
        }
    }
}
