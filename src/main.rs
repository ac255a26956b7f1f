use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fare_hex_rs::{Config, FareHexError, FeaturePipeline, read_parquet};

#[derive(Parser, Debug)]
#[command(name = "fare-hex")]
#[command(about = "Index taxi trips on H3 cells and join them to boundary regions")]
struct Args {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `paths.data_dir`
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rasterize boundary GeoJSON into per-dataset cell sets
    Rasterize {
        /// Only this dataset; all configured datasets when omitted
        #[arg(long)]
        dataset: Option<String>,

        /// Write the cell hexagons as a GeoParquet geometry column
        #[arg(long)]
        geometry: bool,
    },
    /// Index pickup and dropoff points of every raw trip file
    Hexagon,
    /// Resolve indexed trips against a dataset's regions
    Location {
        #[arg(long)]
        dataset: String,
    },
    /// Derive model features from raw trip files
    Features,
    /// Write train and test partitions of every feature file
    Split,
    /// Print the first rows of a Parquet file
    Inspect {
        file: PathBuf,

        #[arg(long, default_value = "10")]
        rows: usize,
    },
}

fn main() -> Result<(), FareHexError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .map_err(|e| FareHexError::Config(e.to_string()))?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.paths.data_dir = data_dir;
    }

    match args.command {
        Command::Inspect { file, rows } => inspect(&file, rows),
        command => run(FeaturePipeline::new(config)?, command),
    }
}

fn run(pipeline: FeaturePipeline, command: Command) -> Result<(), FareHexError> {
    match command {
        Command::Rasterize { dataset, geometry } => {
            let outputs = match dataset {
                Some(name) => vec![pipeline.rasterize_dataset(&name, geometry)?],
                None => pipeline.rasterize_all(geometry)?,
            };
            info!("{} cell-set files ready", outputs.len());
        }
        Command::Hexagon => {
            let outputs = pipeline.process_hexagons()?;
            info!("{} hexagon files ready", outputs.len());
        }
        Command::Location { dataset } => {
            let (outputs, stats) = pipeline.process_location(&dataset)?;
            info!(
                "{} location files ready; {} of {} points matched, {} ambiguous",
                outputs.len(),
                stats.matched,
                stats.points(),
                stats.ambiguous
            );
        }
        Command::Features => {
            let outputs = pipeline.generate_features()?;
            info!("{} feature files ready", outputs.len());
        }
        Command::Split => {
            let outputs = pipeline.split_features()?;
            info!("{} partition files ready", outputs.len());
        }
        Command::Inspect { file, rows } => inspect(&file, rows)?,
    }
    Ok(())
}

fn inspect(file: &Path, rows: usize) -> Result<(), FareHexError> {
    let batches = read_parquet(file)?;
    let total: usize = batches.iter().map(|b| b.num_rows()).sum();

    let mut head = Vec::new();
    let mut remaining = rows;
    for batch in &batches {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.num_rows());
        head.push(batch.slice(0, take));
        remaining -= take;
    }

    println!("{}", arrow_cast::pretty::pretty_format_batches(&head)?);
    println!("{} of {} rows", rows.min(total), total);
    Ok(())
}
