use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use tracing::info;

use touchline_core::channel::ChannelClassifier;
use touchline_core::config::{Config, PipelineConfig};
use touchline_core::pipeline;
use touchline_duckdb::DuckDbBackend;

use crate::export::write_outputs;

#[derive(Parser, Debug)]
#[command(name = "touchline")]
#[command(about = "Multi-touch attribution data preparation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// DuckDB database file (overrides TOUCHLINE_DATABASE)
    #[arg(long, global = true)]
    pub database: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database schema and seed the source categories
    Init,

    /// Append events from a CSV or Parquet file
    ImportEvents {
        file: PathBuf,
    },

    /// Replace the source categories with a `source,category` CSV
    ImportCategories {
        file: PathBuf,
    },

    /// Print the channel group of a source / medium / campaign triple
    Classify {
        #[arg(long)]
        source: String,
        #[arg(long)]
        medium: String,
        #[arg(long, default_value = "(none)")]
        campaign: String,
    },

    /// Run the pipeline and publish its tables
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Length of the conversion period in days
    #[arg(long)]
    pub conversion_period: Option<u32>,

    /// Days a touchpoint may precede its conversion
    #[arg(long)]
    pub lookback_window: Option<u32>,

    /// Last day of the conversion period (YYYY-MM-DD)
    #[arg(long)]
    pub reference_date: Option<NaiveDate>,

    /// IANA timezone used for calendar dates
    #[arg(long)]
    pub timezone: Option<String>,

    /// Keep purchases separate instead of prefixing recent earlier paths;
    /// near purchases are merged instead
    #[arg(long)]
    pub no_concat_chains: bool,

    /// Directory for the CSV and JSON outputs (overrides TOUCHLINE_OUTPUT_DIR)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Layer the command-line flags over the environment configuration.
    pub fn apply(&self, mut pipeline: PipelineConfig) -> Result<PipelineConfig> {
        if let Some(days) = self.conversion_period {
            pipeline.conversion_period_days = days;
        }
        if let Some(days) = self.lookback_window {
            pipeline.lookback_window_days = days;
        }
        if let Some(date) = self.reference_date {
            pipeline.reference_date = Some(date);
        }
        if let Some(raw) = &self.timezone {
            pipeline.timezone = raw
                .parse::<Tz>()
                .map_err(|e| anyhow!("invalid timezone {raw}: {e}"))?;
        }
        if self.no_concat_chains {
            pipeline.concat_chains = false;
        }
        pipeline.validate()?;
        Ok(pipeline)
    }
}

fn open_backend(cfg: &Config, database: Option<&str>) -> Result<DuckDbBackend> {
    let path = database.unwrap_or(&cfg.database_path);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    DuckDbBackend::open(path, &cfg.duckdb_memory_limit)
}

/// Execute one parsed command against the configured database.
pub async fn dispatch(cli: Cli, cfg: Config, today: NaiveDate) -> Result<()> {
    let db = open_backend(&cfg, cli.database.as_deref())?;

    match cli.command {
        Commands::Init => {
            db.ping().await?;
            let categories = db.load_source_categories().await?;
            info!(source_categories = categories.len(), "Database ready");
        }
        Commands::ImportEvents { file } => {
            let inserted = db.import_events(&file).await?;
            println!("imported {inserted} events");
        }
        Commands::ImportCategories { file } => {
            let stored = db.import_source_categories(&file).await?;
            println!("stored {stored} source categories");
        }
        Commands::Classify {
            source,
            medium,
            campaign,
        } => {
            let classifier = ChannelClassifier::new(db.load_source_categories().await?)?;
            let source = source.trim().to_lowercase();
            let medium = medium.trim().to_lowercase();
            let campaign = campaign.trim().to_lowercase();
            let group = classifier.classify(&source, &medium, &campaign);
            let matching: Vec<&str> = classifier
                .matching_rules(&source, &medium, &campaign)
                .iter()
                .map(|g| g.label())
                .collect();
            println!("{group}");
            if matching.len() > 1 {
                info!(rules = ?matching, "Several rules match; the first one wins");
            }
        }
        Commands::Run(args) => {
            let pipeline_cfg = args.apply(cfg.pipeline.clone())?;
            let output = pipeline::execute(&db, &pipeline_cfg, today).await?;

            let dir = args
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(&cfg.output_dir));
            write_outputs(&dir, &output)?;

            let summary = serde_json::json!({
                "window": output.window,
                "attribution_events": output.attribution_events.len(),
                "chain_rows": output.chains.len(),
                "conversion_paths": output.paths.len(),
                "perimeter": output.perimeter,
                "output_dir": dir.display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
