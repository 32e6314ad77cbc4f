//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use factfinder_core::{
    ActivityClassifier, BatchProgress, BatchReport, ChatCompletionsExtractor, DocumentFactExtractor,
    PipelineDriver, ReportLocator, StructuredExtractor,
};
use factfinder_document::{Document, PageSelector, format_for_prompt};
use factfinder_fetch::{SearchBackend, SearxSearch, SourceAdapter, default_adapters};
use factfinder_shared::{
    AppConfig, Entity, FactSet, ReportLocation, Topic, expand_home, init_config, load_config,
};
use factfinder_storage::KeyCache;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// FactFinder: reconciled company facts from public sources.
#[derive(Parser)]
#[command(
    name = "factfinder",
    version,
    about = "Resolve dated, sourced company facts and fill the gaps from annual reports.",
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

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Resolve the profile of one company and print its facts as JSON lines.
    Profile {
        /// Caller-assigned identifier, copied into every fact.
        #[arg(long)]
        id: String,

        /// Company name used for every lookup.
        #[arg(long)]
        name: String,

        /// Annual report PDF to use instead of searching for one.
        #[arg(long, requires = "report_year")]
        report_url: Option<String>,

        /// Fiscal year of `--report-url`.
        #[arg(long, requires = "report_url")]
        report_year: Option<i32>,
    },

    /// Resolve every company in a JSON file (`[{"id": .., "name": ..}]`).
    Batch {
        /// Path to the entities file.
        entities: PathBuf,

        /// Write JSON lines here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show which pages of a PDF would be sent for extraction.
    Pages {
        /// Path to the PDF.
        file: PathBuf,

        /// Topics to score pages for (comma-separated). Defaults to the financial topics.
        #[arg(long, value_delimiter = ',')]
        topics: Vec<Topic>,

        /// Print the selected text as it is sent for extraction.
        #[arg(long)]
        text: bool,
    },

    /// Manage configuration.
    Config {
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

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries results.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "factfinder=info",
        1 => "factfinder=debug",
        _ => "factfinder=trace",
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
    match cli.command {
        Command::Profile {
            id,
            name,
            report_url,
            report_year,
        } => {
            let report = match (report_url, report_year) {
                (Some(url), Some(year)) => Some(ReportLocation { url, year }),
                _ => None,
            };
            cmd_profile(Entity::new(id, name), report).await
        }
        Command::Batch { entities, out } => cmd_batch(&entities, out.as_deref()).await,
        Command::Pages { file, topics, text } => cmd_pages(&file, topics, text),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Everything a run needs, built from the loaded config.
struct Runtime {
    driver: PipelineDriver,
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl Runtime {
    /// Fails when the extraction API key is not set.
    fn build(config: &AppConfig) -> Result<Self> {
        let extractor: Arc<dyn StructuredExtractor> = Arc::new(ChatCompletionsExtractor::from_config(config)?);

        let cache_dir = expand_home(&config.defaults.cache_dir);
        let tickers = Arc::new(KeyCache::open(cache_dir.join("tickers.json")));
        let reports = Arc::new(KeyCache::open(cache_dir.join("reports.json")));

        let search: Option<Arc<dyn SearchBackend>> = SearxSearch::from_config(&config.search, &config.fetch)?
            .map(|s| Arc::new(s) as Arc<dyn SearchBackend>);
        if search.is_none() {
            info!("no search endpoint configured; web search and report discovery are off");
        }

        let adapters = default_adapters(config, tickers, search.clone())?;
        let reader = Arc::new(DocumentFactExtractor::new(config, Arc::clone(&extractor))?);

        let mut driver = PipelineDriver::from_config(config)
            .with_report_reader(reader)
            .with_activity_classifier(ActivityClassifier::new(Arc::clone(&extractor)));
        if let Some(search) = search {
            let locator = ReportLocator::from_config(config, vec![search], extractor, reports)?;
            driver = driver.with_report_locator(locator);
        }

        Ok(Self { driver, adapters })
    }
}

/// One JSON line per fact.
fn write_facts(out: &mut dyn Write, facts: &FactSet) -> Result<()> {
    for fact in facts.iter() {
        serde_json::to_writer(&mut *out, fact)?;
        writeln!(out)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_profile(entity: Entity, report: Option<ReportLocation>) -> Result<()> {
    let config = load_config()?;
    let runtime = Runtime::build(&config)?;

    info!(id = %entity.id, name = %entity.name, "resolving profile");
    let facts = runtime
        .driver
        .process_entity(&entity, &runtime.adapters, report)
        .await?;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    write_facts(&mut out, &facts)?;
    out.flush()?;
    Ok(())
}

async fn cmd_batch(entities_path: &Path, out_path: Option<&Path>) -> Result<()> {
    let config = load_config()?;

    let content = std::fs::read_to_string(entities_path)
        .map_err(|e| eyre!("cannot read {}: {e}", entities_path.display()))?;
    let entities: Vec<Entity> = serde_json::from_str(&content)
        .map_err(|e| eyre!("{} is not a JSON array of {{id, name}}: {e}", entities_path.display()))?;

    let runtime = Runtime::build(&config)?;
    info!(entities = entities.len(), "starting batch");

    let progress = CliProgress::new(entities.len());
    let report = runtime
        .driver
        .process_batch(&entities, &runtime.adapters, &progress)
        .await;

    let mut out: Box<dyn Write> = match out_path {
        Some(path) => Box::new(BufWriter::new(
            std::fs::File::create(path).map_err(|e| eyre!("cannot create {}: {e}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    for profile in &report.profiles {
        write_facts(out.as_mut(), &profile.facts)?;
    }
    out.flush()?;

    for (entity, reason) in &report.failed {
        eprintln!("  skipped {} ({}): {reason}", entity.name, entity.id);
    }
    eprintln!(
        "  {} profiles written, {} skipped",
        report.profiles.len(),
        report.failed.len()
    );
    Ok(())
}

fn cmd_pages(file: &Path, topics: Vec<Topic>, text: bool) -> Result<()> {
    let config = load_config()?;

    let topics = if topics.is_empty() {
        vec![Topic::Employees, Topic::Turnover, Topic::Assets]
    } else {
        topics
    };
    let topics: BTreeSet<Topic> = topics.into_iter().collect();

    let bytes = std::fs::read(file).map_err(|e| eyre!("cannot read {}: {e}", file.display()))?;
    let document = Document::from_pdf_bytes(&bytes)?;
    let selection = PageSelector::from_config(&config.document).select(&document, &topics);

    if text {
        println!("{}", format_for_prompt(&selection));
        return Ok(());
    }

    println!("  {} of {} pages selected", selection.len(), document.page_count());
    for page in selection.pages() {
        let matched: Vec<&str> = page.matched_topics.iter().map(Topic::as_str).collect();
        println!(
            "  page {:>4}  {:<30} {} matches",
            page.page_number,
            matched.join(", "),
            page.match_count
        );
    }
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

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Batch progress bar on stderr.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar }
    }
}

impl BatchProgress for CliProgress {
    fn entity_started(&self, entity: &Entity, _current: usize, _total: usize) {
        self.bar.set_message(entity.name.clone());
    }

    fn entity_finished(&self, _entity: &Entity, _facts: Option<&FactSet>) {
        self.bar.inc(1);
    }

    fn done(&self, _report: &BatchReport) {
        self.bar.finish_and_clear();
    }
}
