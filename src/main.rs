//! ThreadPulse - LLM-powered sentiment analysis for community threads
//!
//! Reads a JSON export of posts and comments, scores every text with a hosted
//! model and writes a JSON or Markdown report.
//!
//! Exit codes:
//!   0 - Run finished (including runs cancelled with Ctrl-C)
//!   1 - Runtime error (bad input, no API key, unwritable output, etc.)

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use threadpulse::batching::BatchPlanner;
use threadpulse::cli::{Args, OutputFormat};
use threadpulse::collector::{FilterRules, TextCollector};
use threadpulse::config::{Config, DEFAULT_CONFIG_FILE};
use threadpulse::models::{Post, RunOutcome, RunReport};
use threadpulse::progress::{CancellationGate, ProgressReporter};
use threadpulse::provider::{resolve_kind, ProviderKind, ProviderPreference};
use threadpulse::{report, SentimentPipeline};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config decides the default verbosity, so it is read before logging starts
    let (config, config_origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&args, config.general.verbose);

    info!("ThreadPulse v{}", env!("CARGO_PKG_VERSION"));
    config_origin.log();
    debug!("Arguments: {:?}", args);

    match run_analysis(args, config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .threadpulse.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize providers, batch sizes, retries and filters.");
    println!("   API keys are read from GEMINI_API_KEY / ANTHROPIC_API_KEY.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// `RUST_LOG`, when set, takes over from the command-line flags.
fn init_logging(args: &Args, config_verbose: bool) {
    let level = if !args.quiet && config_verbose {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = builder.with_env_filter(EnvFilter::from_default_env()).finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    } else {
        let subscriber = builder.with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}

/// Run the complete analysis workflow.
async fn run_analysis(args: Args, mut config: Config) -> Result<()> {
    config.merge_with_args(&args);

    let input = args
        .input
        .clone()
        .context("An --input file is required")?;

    // Step 1: Load posts
    println!("📥 Loading posts: {}", input.display());
    let posts = load_posts(&input)?;
    let comments: usize = posts.iter().map(|p| p.comments.len()).sum();
    info!("Loaded {} posts with {} comments", posts.len(), comments);

    let credentials = args.credentials();

    // Handle --dry-run: collect and plan, no provider calls
    if args.dry_run {
        let kind = resolve_kind(config.provider.preference, &credentials).ok();
        return handle_dry_run(&config, kind, &posts);
    }

    // Step 2: Select the provider
    let pipeline = SentimentPipeline::from_config(&config, &credentials)?;
    let provider = pipeline.provider();

    println!("🤖 Provider: {} ({})", provider.kind(), provider.model());
    println!(
        "   Batch size: {} | Pacing: {:.1}s | Timeout: {}s",
        provider.profile().batch_size,
        provider.profile().pacing.as_secs_f64(),
        config.provider.timeout_seconds
    );

    // Step 3: Run, with Ctrl-C closing the gate between batches
    let gate = CancellationGate::new();
    let signal_gate = gate.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current batch");
            signal_gate.cancel();
        }
    });

    let planned = pipeline.plan(&posts).batches.len();
    let progress_bar = batch_progress_bar(planned as u64, args.quiet);
    let bar = progress_bar.clone();
    let reporter = ProgressReporter::with_callback(move |event| {
        bar.set_position(event.batch_ordinal as u64);
        bar.set_message(format!("{} scored", event.items_processed));
    });

    println!("\n🔬 Analyzing sentiment...\n");
    let run = pipeline.run(&posts, &reporter, &gate).await;
    progress_bar.finish_and_clear();

    // Step 4: Write the report
    let output_path = PathBuf::from(&config.general.output);
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&run)?,
        OutputFormat::Markdown => report::generate_markdown_report(&run, Utc::now()),
    };

    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    print_summary(&run);
    match run.outcome {
        RunOutcome::Completed => println!(
            "\n✅ Analysis complete! Report saved to: {}",
            output_path.display()
        ),
        RunOutcome::Cancelled => println!(
            "\n⚠️  Analysis cancelled. Partial report saved to: {}",
            output_path.display()
        ),
    }

    Ok(())
}

/// Print the run summary to stdout.
fn print_summary(run: &RunReport) {
    let result = &run.result;

    println!("📊 Sentiment Summary:");
    println!(
        "   Texts scored: {} of {} ({} missing)",
        result.items.len(),
        run.submitted,
        run.coverage_gap()
    );
    println!(
        "   Batches: {} of {} run, {} failed",
        run.batches_completed,
        run.batches_planned,
        run.failed_batches.len()
    );
    println!("   Average score: {:+.3}", result.average_score);
    println!(
        "   🟢 Positive: {}% | ⚪ Neutral: {}% | 🔴 Negative: {}%",
        result.distribution.positive, result.distribution.neutral, result.distribution.negative
    );
    if !result.dominant_themes.is_empty() {
        println!("   Themes: {}", result.dominant_themes.join(", "));
    }
    println!("   {}", result.summary);
    println!("   Duration: {:.1}s", run.duration_seconds);
}

/// Handle --dry-run: collect and batch, print the plan, exit.
fn handle_dry_run(config: &Config, kind: Option<ProviderKind>, posts: &[Post]) -> Result<()> {
    println!("\n🔍 Dry run: collecting texts (no provider calls)...\n");

    // Without a key, plan for the variant the preference points at
    let kind = kind.unwrap_or(match config.provider.preference {
        ProviderPreference::Anthropic => ProviderKind::Anthropic,
        ProviderPreference::Auto | ProviderPreference::Gemini => ProviderKind::Gemini,
    });
    let settings = config.provider.settings(kind)?;

    let collector = TextCollector::new(FilterRules::from(&config.filter));
    let collection = collector.collect(posts);
    let batches = BatchPlanner::new(&settings.profile).plan(&collection.units);

    println!(
        "   Collected {} of {} candidate texts",
        collection.stats.kept, collection.stats.raw
    );
    for (reason, count) in &collection.stats.rejected {
        println!("     ✂️  {}: {}", reason, count);
    }

    println!(
        "\n   {} would send {} batch(es) of up to {} texts:",
        kind,
        batches.len(),
        settings.profile.batch_size
    );
    for batch in &batches {
        println!(
            "     📦 Batch {} ({} texts, units {}-{})",
            batch.ordinal,
            batch.len(),
            batch.offset + 1,
            batch.offset + batch.len()
        );
    }

    println!("\n✅ Dry run complete. No provider calls were made.");
    Ok(())
}

/// Read the posts array from a JSON file.
fn load_posts(path: &Path) -> Result<Vec<Post>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse posts from: {}", path.display()))
}

/// Where the configuration came from, logged once logging is up.
enum ConfigOrigin {
    Explicit(PathBuf),
    DefaultFile,
    Defaults,
    /// The default file exists but could not be loaded.
    Broken(anyhow::Error),
}

impl ConfigOrigin {
    fn log(&self) {
        match self {
            ConfigOrigin::Explicit(path) => info!("Loaded config from: {}", path.display()),
            ConfigOrigin::DefaultFile => {
                info!("Loaded default config from {}", DEFAULT_CONFIG_FILE)
            }
            ConfigOrigin::Defaults => info!("No config file found, using defaults"),
            ConfigOrigin::Broken(e) => warn!(
                "Failed to load {} ({:#}), using defaults",
                DEFAULT_CONFIG_FILE, e
            ),
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::Explicit(config_path.clone())));
    }

    // Try default location
    Ok(load_config_in(Path::new(".")))
}

/// Load `.threadpulse.toml` from a directory, falling back to defaults.
fn load_config_in(dir: &Path) -> (Config, ConfigOrigin) {
    match Config::load_from_dir(dir) {
        Ok(Some(config)) => (config, ConfigOrigin::DefaultFile),
        Ok(None) => (Config::default(), ConfigOrigin::Defaults),
        Err(e) => (Config::default(), ConfigOrigin::Broken(e)),
    }
}

/// Progress bar over planned batches; hidden in quiet mode.
fn batch_progress_bar(total: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_broken_default_config_falls_back_with_warning() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "[general\nverbose = ").unwrap();

        let (config, origin) = load_config_in(dir.path());
        assert!(matches!(origin, ConfigOrigin::Broken(_)));
        assert_eq!(config.general.output, Config::default().general.output);
    }

    #[test]
    fn test_missing_default_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let (_, origin) = load_config_in(dir.path());
        assert!(matches!(origin, ConfigOrigin::Defaults));
    }
}
