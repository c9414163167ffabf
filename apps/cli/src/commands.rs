//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use headway_artifacts::{Bundle, BundleManifest};
use headway_core::pipeline::{self, BuildRequest, BuildResult, ProgressReporter};
use headway_core::transit::{FEED_LIST_SUFFIX, nearby_feeds};
use headway_extract::Fetcher;
use headway_shared::{
    AppConfig, BboxTable, BuildSettings, HeadwayError, init_config, load_config,
};
use headway_tools::{ContainerRunner, ToolRunner};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Headway: build the data bundle for a self-hosted regional map.
#[derive(Parser)]
#[command(
    name = "headway",
    version,
    about = "Build tiles, routing, geocoding, and transit data for a Headway map area.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Bbox serialization for `headway bbox`.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum BboxFormat {
    Comma,
    Space,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build the area bundle: extract, tiles, routing, geocoding, terrain.
    Build {
        /// Area name (also the extract download key).
        #[arg(long, env = "HEADWAY_AREA")]
        area: String,

        /// Comma-separated country filter, or ALL for a planet build.
        #[arg(long, env = "HEADWAY_COUNTRIES")]
        countries: Option<String>,

        /// Use a local extract instead of downloading one.
        #[arg(long)]
        pbf: Option<PathBuf>,

        /// Export directory (defaults to the configured output_dir).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Build per-zone transit graphs from a transit config directory.
    Transit {
        #[arg(long, env = "HEADWAY_AREA")]
        area: String,

        /// Directory holding `gtfs-feeds/` and optional graph-build overrides.
        #[arg(long)]
        transit_config: PathBuf,

        #[arg(long)]
        pbf: Option<PathBuf>,

        /// Build every zone against the full extract instead of clipping.
        #[arg(long)]
        no_clip: bool,

        /// Keep successful zones when others fail.
        #[arg(long)]
        allow_partial: bool,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print an area's bounding box from the reference table.
    Bbox {
        #[arg(long)]
        area: String,

        #[arg(long, default_value = "space")]
        format: BboxFormat,

        /// Reference table (defaults to services/gtfs/bboxes.csv).
        #[arg(long)]
        table: Option<PathBuf>,
    },

    /// Write the list of transit feeds overlapping an area.
    NearbyFeeds {
        #[arg(long)]
        area: String,

        #[arg(long)]
        table: Option<PathBuf>,

        /// Output file (defaults to `<output_dir>/<area>.gtfs_feeds.csv`).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "headway=info",
        1 => "headway=debug",
        _ => "headway=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let outcome = match cli.command {
        Command::Build {
            area,
            countries,
            pbf,
            out,
        } => {
            let request = BuildRequest {
                area,
                countries,
                pbf,
            };
            cmd_build(&request, out).await
        }
        Command::Transit {
            area,
            transit_config,
            pbf,
            no_clip,
            allow_partial,
            out,
        } => {
            let request = BuildRequest {
                area,
                countries: None,
                pbf,
            };
            cmd_transit(&request, &transit_config, no_clip, allow_partial, out).await
        }
        Command::Bbox {
            area,
            format,
            table,
        } => cmd_bbox(&area, format, table.as_deref()),
        Command::NearbyFeeds { area, table, out } => {
            cmd_nearby_feeds(&area, table.as_deref(), out).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    };
    outcome.map_err(report)
}

/// Internal errors are flagged so they are not mistaken for bad input.
fn report(err: color_eyre::Report) -> color_eyre::Report {
    let internal = err
        .downcast_ref::<HeadwayError>()
        .is_some_and(HeadwayError::is_invariant);
    if internal {
        err.wrap_err("internal error, please report a bug")
    } else {
        err
    }
}

fn settings(out: Option<PathBuf>) -> Result<BuildSettings> {
    let config = load_config()?;
    let mut settings = BuildSettings::from(&config);
    if let Some(out) = out {
        settings.output_dir = out;
    }
    settings.validate()?;
    Ok(settings)
}

fn runner(settings: &BuildSettings) -> Arc<dyn ToolRunner> {
    Arc::new(ContainerRunner::new(&settings.container_runtime))
}

fn bbox_table(settings: &BuildSettings, table: Option<&Path>) -> Result<BboxTable> {
    let path = table
        .map(Path::to_path_buf)
        .unwrap_or_else(|| settings.services_dir.join("gtfs").join("bboxes.csv"));
    BboxTable::load(&path).wrap_err_with(|| format!("reading bbox table {}", path.display()))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_build(request: &BuildRequest, out: Option<PathBuf>) -> Result<()> {
    let settings = Arc::new(settings(out)?);
    info!(
        area = %request.area,
        countries = request.countries.as_deref().unwrap_or("-"),
        "building area bundle"
    );

    let reporter = CliProgress::new();
    let result = pipeline::build(request, settings.clone(), runner(&settings), &reporter).await?;
    let manifest = export(result.bundle, &settings.output_dir).await?;
    print_summary("Area bundle built", &result.workdir, result.elapsed, &manifest, &settings.output_dir);
    Ok(())
}

async fn cmd_transit(
    request: &BuildRequest,
    transit_config: &Path,
    no_clip: bool,
    allow_partial: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut settings = settings(out)?;
    if no_clip {
        settings.transit.clip_to_gtfs = false;
    }
    if allow_partial {
        settings.transit.allow_partial = true;
    }
    let settings = Arc::new(settings);
    info!(
        area = %request.area,
        config = %transit_config.display(),
        clip = settings.transit.clip_to_gtfs,
        "building transit bundle"
    );

    let reporter = CliProgress::new();
    let result = pipeline::build_transit_bundle(
        request,
        transit_config,
        settings.clone(),
        runner(&settings),
        &reporter,
    )
    .await?;
    if result.bundle.is_empty() {
        println!("  No transit zones found under {}", transit_config.display());
        return Ok(());
    }
    let manifest = export(result.bundle, &settings.output_dir).await?;
    print_summary("Transit bundle built", &result.workdir, result.elapsed, &manifest, &settings.output_dir);
    Ok(())
}

fn cmd_bbox(area: &str, format: BboxFormat, table: Option<&Path>) -> Result<()> {
    let settings = settings(None)?;
    let bbox = bbox_table(&settings, table)?.resolve(area)?;
    match format {
        BboxFormat::Comma => println!("{}", bbox.to_comma_separated()),
        BboxFormat::Space => println!("{}", bbox.to_space_separated()),
    }
    Ok(())
}

async fn cmd_nearby_feeds(area: &str, table: Option<&Path>, out: Option<PathBuf>) -> Result<()> {
    let settings = settings(None)?;
    let bbox = bbox_table(&settings, table)?.resolve(area)?;
    let dest = out.unwrap_or_else(|| settings.output_dir.join(format!("{area}{FEED_LIST_SUFFIX}")));
    let workdir = headway_core::context::allocate_workdir(&settings.work_dir, area)?;
    let fetcher = Fetcher::new(&settings.user_agent)?;

    info!(area, %bbox, "enumerating nearby feeds");
    let written = nearby_feeds(
        runner(&settings).as_ref(),
        &fetcher,
        &settings,
        &bbox,
        &workdir,
        &dest,
    )
    .await?;
    println!("  Feed list written to {}", written.display());
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

/// Compress and write the bundle off the async runtime.
async fn export(bundle: Bundle, dir: &Path) -> Result<BundleManifest> {
    let dir = dir.to_path_buf();
    let manifest = tokio::task::spawn_blocking(move || bundle.export(&dir))
        .await
        .map_err(|e| eyre!("bundle export task failed: {e}"))??;
    Ok(manifest)
}

fn print_summary(
    title: &str,
    workdir: &Path,
    elapsed: Duration,
    manifest: &BundleManifest,
    out: &Path,
) {
    let bytes: u64 = manifest.entries.iter().map(|e| e.size_bytes).sum();
    println!();
    println!("  {title}!");
    println!("  Entries: {}", manifest.entries.len());
    for entry in &manifest.entries {
        println!("    {:<48} {:>12} bytes", entry.name, entry.size_bytes);
    }
    println!("  Size:    {:.1} MiB", bytes as f64 / (1024.0 * 1024.0));
    println!("  Output:  {}", out.display());
    println!("  Scratch: {}", workdir.display());
    println!("  Time:    {:.1}s", elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner. Concurrent branches are
/// listed together while they run.
struct CliProgress {
    spinner: ProgressBar,
    phase: Mutex<String>,
    running: Mutex<BTreeSet<String>>,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self {
            spinner,
            phase: Mutex::new(String::new()),
            running: Mutex::new(BTreeSet::new()),
        }
    }

    fn refresh(&self) {
        let phase = self.phase.lock().map(|p| p.clone()).unwrap_or_default();
        let running = self
            .running
            .lock()
            .map(|r| r.iter().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        if running.is_empty() {
            self.spinner.set_message(phase);
        } else {
            self.spinner.set_message(format!("{phase}: {running}"));
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = name.to_string();
        }
        self.refresh();
    }

    fn stage_started(&self, stage: &str) {
        if let Ok(mut running) = self.running.lock() {
            running.insert(stage.to_string());
        }
        self.refresh();
    }

    fn stage_finished(&self, stage: &str, elapsed: Duration) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(stage);
        }
        self.spinner
            .println(format!("  ✓ {stage} ({:.1}s)", elapsed.as_secs_f64()));
        self.refresh();
    }

    fn done(&self, _result: &BuildResult) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.abandon();
        }
    }
}
