mod browser;
mod monitor;
mod parser;
mod registry;
mod settings;
mod store;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use browser::{PageSource, SnapshotSource};
use monitor::{Monitor, MonitorOptions};
use parser::PageProcessor;
use registry::Registry;
use settings::Settings;
use store::{load_or_empty, CsvStore, RegistryStore};

#[derive(Parser)]
#[command(name = "nutri_scraper", about = "Collect nutrition facts from the pages you browse")]
struct Cli {
    /// Registry file (overrides settings)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the page capture and scrape every new page
    Watch {
        /// Page capture file: URL on the first line, body text below
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },
    /// Process one text file as a single page
    Process {
        file: PathBuf,
        /// Navigation id stamped on the records (default: the file path)
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Products table
    Show {
        /// Only names containing this text (case-insensitive)
        #[arg(short, long)]
        filter: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Registry statistics
    Stats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(store) = cli.store {
        settings.store_path = store;
    }
    let store = CsvStore::new(&settings.store_path);

    match cli.command {
        Commands::Watch { snapshot } => {
            if let Some(path) = snapshot {
                settings.snapshot_path = path;
            }
            watch(&settings, store).await
        }
        Commands::Process { file, url } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let url = url.unwrap_or_else(|| file.display().to_string());
            let mut registry = load_or_empty(&store);
            let processor = PageProcessor::new(settings.patterns()?, settings.name_window, store);
            let report = processor.run(&mut registry, &text, &url)?;
            println!(
                "{} lines attributed, {} products written: {}",
                report.touched,
                report.products.len(),
                report.products.join(", ")
            );
            Ok(())
        }
        Commands::Show { filter, limit } => {
            let registry = store.load()?;
            show(&registry, filter.as_deref(), limit);
            Ok(())
        }
        Commands::Stats => {
            let registry = store.load()?;
            let variants = registry.iter().filter(|r| r.is_variant()).count();
            let complete = registry.iter().filter(|r| r.known_facts() == 4).count();
            println!("Products:  {}", registry.len());
            println!("Variants:  {}", variants);
            println!("Complete:  {}", complete);
            println!("Partial:   {}", registry.len() - complete);
            Ok(())
        }
    }
}

async fn watch(settings: &Settings, store: CsvStore) -> Result<()> {
    let registry = load_or_empty(&store);
    let processor = PageProcessor::new(settings.patterns()?, settings.name_window, store);
    let source = SnapshotSource::new(&settings.snapshot_path);
    let opts = MonitorOptions {
        poll_interval: settings.poll_interval(),
        ready_timeout: settings.ready_timeout(),
        settle_delay: settings.settle_delay(),
    };

    info!(
        snapshot = %source.path().display(),
        store = %processor.store().path().display(),
        products = registry.len(),
        "Starting continuous monitoring, press Ctrl+C to stop"
    );
    let mut monitor = Monitor::new(source, processor, registry, opts);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match monitor.run(shutdown).await {
        Ok(stats) => {
            info!(
                pages = stats.pages,
                touched = stats.touched,
                failures = stats.failures,
                products = monitor.registry().len(),
                "Monitoring stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!("An error occurred: {}", e);
            dump_markup(monitor.source_mut(), &settings.debug_dump_path);
            Err(e.into())
        }
    }
}

/// Best effort: the failure artifact must not mask the monitor error.
fn dump_markup<P: PageSource>(source: &mut P, path: &Path) {
    info!(path = %path.display(), "Saving page source for debugging");
    let written = source
        .page_markup()
        .map_err(anyhow::Error::from)
        .and_then(|markup| std::fs::write(path, markup).map_err(anyhow::Error::from));
    if let Err(e) = written {
        warn!("could not write debug page: {}", e);
    }
}

fn show(registry: &Registry, filter: Option<&str>, limit: usize) {
    let needle = filter.map(str::to_lowercase);
    let rows: Vec<_> = registry
        .iter()
        .filter(|r| needle.as_ref().map_or(true, |n| r.name.to_lowercase().contains(n)))
        .take(limit)
        .collect();
    if rows.is_empty() {
        println!("No products found.");
        return;
    }

    println!(
        "{:>3} | {:<32} | {:>8} | {:>7} | {:>7} | {:>7} | {:<16} | {:<19}",
        "#", "Product", "Calories", "Protein", "Carbs", "Fat", "Serving", "Updated"
    );
    println!("{}", "-".repeat(118));
    for (i, r) in rows.iter().enumerate() {
        println!(
            "{:>3} | {:<32} | {:>8} | {:>7} | {:>7} | {:>7} | {:<16} | {:<19}",
            i + 1,
            truncate(&r.name, 32),
            short(&r.calories),
            short(&r.protein),
            short(&r.carbs),
            short(&r.fat),
            truncate(short(&r.serving_size), 16),
            r.last_updated
        );
    }
    println!("\n{} of {} products", rows.len(), registry.len());
}

fn short(v: &str) -> &str {
    if v == registry::NOT_AVAILABLE {
        "-"
    } else {
        v
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
