//! `mator-db`: build the relay descriptor snapshot of one month.
//!
//! # Usage
//!
//! ```text
//! mator-db 2020-03
//! mator-db 2020-03 --data-dir /srv/collector --geo-db ./GeoLite2-City.mmdb
//! mator-db 2020-03 --config mator.toml --no-clobber
//! ```
//!
//! Settings come from the optional TOML file, then `MATOR_*` environment
//! variables, then flags.

use std::path::PathBuf;

use anyhow::{Context as _, bail};
use chrono::Utc;
use clap::Parser;
use mator_core::month::TargetMonth;
use mator_db::{BuilderConfig, Pipeline, locate_sources};
use mator_lookup::{MaxMindGeo, WhoisRegistry};
use mator_store_sqlite::SnapshotStore;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Build a monthly relay descriptor snapshot")]
struct Cli {
  /// Target month, `YYYY-MM`.
  month: String,

  /// Path to a TOML configuration file.
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Output database (default: ./server-descriptors-YYYY-MM.db).
  #[arg(short, long, value_name = "FILE")]
  output: Option<PathBuf>,

  /// Directory holding the monthly descriptor archives.
  #[arg(long, value_name = "DIR")]
  data_dir: Option<PathBuf>,

  /// Directory of recent descriptor files (default: <data-dir>/recent).
  #[arg(long, value_name = "DIR")]
  recent_dir: Option<PathBuf>,

  /// MaxMind City database.
  #[arg(long, value_name = "FILE")]
  geo_db: Option<PathBuf>,

  /// Keep an existing output database and exit.
  #[arg(long)]
  no_clobber: bool,

  /// Only log warnings and errors.
  #[arg(short, long)]
  quiet: bool,
}

impl Cli {
  fn apply(&self, cfg: &mut BuilderConfig) {
    if let Some(output) = &self.output {
      cfg.output = Some(output.clone());
    }
    if let Some(dir) = &self.data_dir {
      cfg.data_dir = dir.clone();
    }
    if let Some(dir) = &self.recent_dir {
      cfg.recent_dir = Some(dir.clone());
    }
    if let Some(path) = &self.geo_db {
      cfg.geo_db = path.clone();
    }
    cfg.no_clobber |= self.no_clobber;
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.quiet { LevelFilter::WARN } else { LevelFilter::INFO };
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy(),
    )
    .init();

  // Load configuration.
  let mut builder = config::Config::builder();
  if let Some(path) = &cli.config {
    builder = builder.add_source(config::File::from(path.clone()));
  }
  let settings = builder
    .add_source(config::Environment::with_prefix("MATOR").try_parsing(true))
    .build()
    .context("failed to read configuration")?;
  let mut cfg: BuilderConfig = settings
    .try_deserialize()
    .context("failed to deserialise BuilderConfig")?;
  cli.apply(&mut cfg);
  cfg.validate()?;

  let now = Utc::now();
  let month = TargetMonth::parse(&cli.month)
    .with_context(|| format!("invalid month {:?}", cli.month))?;
  if let Err(e) = month.validate(now) {
    bail!("can't build a snapshot for {month}: {e}");
  }

  let output = cfg.output_path(month);
  if cfg.no_clobber && output.exists() {
    info!(path = %output.display(), "existing database found and no-clobber set; exiting");
    return Ok(());
  }

  // Collaborators.
  let geo = MaxMindGeo::open(&cfg.geo_db)
    .with_context(|| format!("failed to open geo database {}", cfg.geo_db.display()))?;
  let registry = WhoisRegistry::new(
    cfg.whois_endpoint.clone(),
    cfg.whois_batch_size,
    cfg.whois_timeout(),
  );

  let sources = locate_sources(&cfg, month, now)?;

  info!(path = %output.display(), "creating empty database");
  let store = SnapshotStore::create(&output)
    .await
    .with_context(|| format!("failed to create {}", output.display()))?;

  let summary = Pipeline::new(month, registry, geo)
    .with_sink_queue_capacity(cfg.sink_queue_capacity)
    .run(sources, &store)
    .await
    .with_context(|| format!("building snapshot for {month}"))?;

  info!(
    path = %output.display(),
    documents = summary.sources.documents,
    malformed = summary.sources.malformed,
    nodes = summary.rows.nodes,
    descriptors = summary.rows.descriptors,
    families = summary.rows.families,
    geoip = summary.rows.geoip,
    "done"
  );
  Ok(())
}
