use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Client;
use streamflow_validator::catalog::Catalog;
use streamflow_validator::config::{optional_path, BackendKind, Config, ConfigOverrides};
use streamflow_validator::crosswalk::memory::InMemoryReachIndex;
use streamflow_validator::crosswalk::{CrosswalkResolver, LookupBackend, MatchSet, SearchRadius};
use streamflow_validator::metrics::subsets::{MetricsEngine, SourcePair};
use streamflow_validator::output::csv::{crosswalk_to_csv, history_to_csv, metrics_to_csv, rows_to_csv};
use streamflow_validator::output::json::render_json;
use streamflow_validator::output::table::{
    render_crosswalk_table, render_history_table, render_metrics_table, render_rows_table,
    render_summary_table,
};
use streamflow_validator::pipeline::{Pipeline, RunReport};
use streamflow_validator::snapshot::store::SnapshotStore;
use streamflow_validator::sources::http::build_client;
use streamflow_validator::sources::nldi::NldiCrosswalk;
use streamflow_validator::sources::nwis::NwisDailySource;
use streamflow_validator::sources::table::FlowTable;
use streamflow_validator::sources::SourceRegistry;
use streamflow_validator::types::SourceKind;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Spatial,
    Identifier,
}

impl From<BackendArg> for BackendKind {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Spatial => BackendKind::Spatial,
            BackendArg::Identifier => BackendKind::Identifier,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PairArg {
    ModelVsGauge,
    ReachModelVsGauge,
    ModelVsReachModel,
}

impl From<PairArg> for SourcePair {
    fn from(value: PairArg) -> Self {
        match value {
            PairArg::ModelVsGauge => SourcePair::ModelVsGauge,
            PairArg::ReachModelVsGauge => SourcePair::ReachModelVsGauge,
            PairArg::ModelVsReachModel => SourcePair::ModelVsReachModel,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "streamflow-validator",
    about = "Crosswalk, reconcile and score streamflow predictions against gauges"
)]
struct Cli {
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Target date (YYYY-MM-DD). Defaults to the configured date, then yesterday.
    #[arg(short, long, global = true)]
    date: Option<NaiveDate>,
    /// Crosswalk search radius in metres.
    #[arg(short, long, global = true)]
    radius: Option<f64>,
    /// Use the looser exploratory search radius.
    #[arg(long, global = true, conflicts_with = "radius")]
    exploratory: bool,
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendArg>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve every catalog site to a reach and persist the crosswalk.
    Crosswalk {
        /// Ignore cached entries for this radius.
        #[arg(long)]
        refresh: bool,
    },
    /// Full run: crosswalk, fetch, reconcile and score.
    Compare {
        /// Print the joined rows instead of the metric battery.
        #[arg(long)]
        rows: bool,
        /// Do not write the crosswalk or metrics to the store.
        #[arg(long)]
        no_store: bool,
    },
    /// Metric results recorded by earlier runs.
    History {
        #[arg(long, value_enum)]
        pair: Option<PairArg>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        target_date: cli.date,
        radius_m: cli
            .radius
            .or_else(|| cli.exploratory.then(|| SearchRadius::exploratory().as_meters())),
        catalog_path: cli.catalog.clone(),
        backend: cli.backend.map(BackendKind::from),
    });

    if let Commands::Config { init, show } = &cli.command {
        return handle_config_command(*init, *show, &config, &config_path);
    }

    let db_path = config.resolved_db_path();
    let mut store = SnapshotStore::open(&db_path)
        .with_context(|| format!("failed opening store: {}", db_path.display()))?;

    if let Commands::History { pair, limit } = &cli.command {
        let history = store.load_metric_history(pair.map(SourcePair::from), *limit)?;
        match cli.output {
            OutputFormat::Table => println!("{}", render_history_table(&history)),
            OutputFormat::Json => println!("{}", render_json(&history)?),
            OutputFormat::Csv => println!("{}", history_to_csv(&history)?),
        }
        return Ok(());
    }

    let classifier = config.region_classifier()?;
    let catalog_path = optional_path(&config.run.catalog_path)
        .ok_or_else(|| anyhow!("no site catalog configured; set run.catalog_path or pass --catalog"))?;
    let catalog = Catalog::from_geojson_path(&catalog_path, &classifier)
        .with_context(|| format!("failed loading catalog: {}", catalog_path.display()))?;

    let client = build_client(&config.http_settings())?;
    let resolver = CrosswalkResolver::new(build_backend(&config, &client)?, config.resolver_options()?);
    let radius = resolver.radius();

    match cli.command {
        Commands::Crosswalk { refresh } => {
            let cached = if refresh {
                MatchSet::new()
            } else {
                store.load_crosswalk(radius)?
            };
            let batch = resolver.resolve_missing(catalog.sites(), &cached).await;
            let saved = store.save_crosswalk(radius, &batch)?;
            info!(saved, radius_m = radius.as_meters(), "crosswalk persisted");
            match cli.output {
                OutputFormat::Table => {
                    println!("{}", render_crosswalk_table(&batch.records));
                    println!(
                        "Resolved {}/{} sites within {:.0} m ({} lookup failures)",
                        batch.resolved_count(),
                        catalog.len(),
                        radius.as_meters(),
                        batch.failures.len()
                    );
                }
                OutputFormat::Json => println!("{}", render_json(&batch)?),
                OutputFormat::Csv => println!("{}", crosswalk_to_csv(&batch.records)?),
            }
        }
        Commands::Compare { rows, no_store } => {
            let target_date = resolve_target_date(&config)?;
            let sources = build_sources(&config, &client)?;
            let engine = MetricsEngine::new(config.metrics_config()?);
            let pipeline = Pipeline::new(resolver, sources, engine, classifier.labels());

            let cached = store.load_crosswalk(radius)?;
            let report = pipeline.run(&catalog, target_date, &cached).await;
            if !no_store {
                store.save_crosswalk(radius, &report.crosswalk)?;
                store.insert_metrics(target_date, &report.metrics)?;
            }
            print_report(&report, rows, cli.output)?;
        }
        Commands::History { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}

fn handle_config_command(init: bool, show: bool, config: &Config, config_path: &PathBuf) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn resolve_target_date(config: &Config) -> Result<NaiveDate> {
    if let Some(date) = config.run.target_date {
        return Ok(date);
    }
    let yesterday = Utc::now()
        .date_naive()
        .pred_opt()
        .ok_or_else(|| anyhow!("cannot derive a default target date"))?;
    warn!(date = %yesterday, "no target date given, using yesterday");
    Ok(yesterday)
}

fn build_backend(config: &Config, client: &Client) -> Result<LookupBackend> {
    match config.crosswalk.backend {
        BackendKind::Spatial => {
            let index = match optional_path(&config.crosswalk.reach_points_path) {
                Some(path) => InMemoryReachIndex::from_csv_path(&path)?,
                None => {
                    warn!("no reach points configured; only explicit reach ids will resolve");
                    InMemoryReachIndex::default()
                }
            };
            info!(reaches = index.len(), "spatial index loaded");
            Ok(LookupBackend::Spatial(Arc::new(index)))
        }
        BackendKind::Identifier => Ok(LookupBackend::Identifier(Arc::new(NldiCrosswalk::new(
            client.clone(),
            config.sources.nldi_url.clone(),
        )))),
    }
}

fn build_sources(config: &Config, client: &Client) -> Result<SourceRegistry> {
    let mut registry = SourceRegistry::new();
    match optional_path(&config.sources.model_table) {
        Some(path) => registry.register(Arc::new(FlowTable::from_csv_path(
            &path,
            SourceKind::Model,
            config.sources.model_unit,
        )?)),
        None => warn!("no model table configured"),
    }
    if config.sources.gauge_enabled {
        registry.register(Arc::new(NwisDailySource::new(
            client.clone(),
            config.sources.gauge_url.clone(),
            config.sources.chunk_size,
        )));
    }
    match optional_path(&config.sources.reach_model_table) {
        Some(path) => registry.register(Arc::new(FlowTable::from_csv_path(
            &path,
            SourceKind::ReachModel,
            config.sources.reach_model_unit,
        )?)),
        None => warn!("no reach-model table configured"),
    }
    if registry.sources().is_empty() {
        return Err(anyhow!("no flow sources configured"));
    }
    Ok(registry)
}

fn print_report(report: &RunReport, rows: bool, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_summary_table(report));
            if rows {
                println!("{}", render_rows_table(&report.reconciliation.rows));
            } else {
                println!("{}", render_metrics_table(&report.metrics));
            }
        }
        OutputFormat::Json => println!("{}", render_json(report)?),
        OutputFormat::Csv => {
            if rows {
                println!("{}", rows_to_csv(&report.reconciliation.rows)?);
            } else {
                println!("{}", metrics_to_csv(&report.metrics)?);
            }
        }
    }
    Ok(())
}
