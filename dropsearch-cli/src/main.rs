use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use dropsearch_core::{
    Dropsearch, DropsearchConfig, DropsearchError, SearchHit, SearchRequest, SortOrder, SyncSummary,
};
use indicatif::{ProgressBar, ProgressStyle};
use tabled::{Table, Tabled};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dropsearch")]
#[command(author, version, about = "Dropsearch - keep a Dropbox folder searchable")]
#[command(after_help = "Examples:
  dropsearch sync                       Index new files once
  dropsearch search \"invoice\"           Search indexed files
  dropsearch search \"\" --sort asc       Browse oldest first
  dropsearch daemon                     Sync on an interval until Ctrl+C
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass now
    #[command(alias = "index")]
    Sync,

    /// Search indexed files
    #[command(alias = "find", alias = "s")]
    Search {
        /// Search query; empty browses everything
        #[arg(default_value = "")]
        query: String,
        /// Sort by creation time (asc or desc)
        #[arg(long, default_value = "desc")]
        sort: SortOrder,
        /// Maximum results (capped by DROPSEARCH_MAX_RESULTS)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Run the sync scheduler until interrupted
    #[command(alias = "watch")]
    Daemon,

    /// Show effective configuration with secrets masked
    Config,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Total")]
    total: usize,
    #[tabled(rename = "Indexed")]
    processed: usize,
    #[tabled(rename = "Skipped")]
    skipped: usize,
    #[tabled(rename = "Errors")]
    errored: usize,
}

impl From<SyncSummary> for SummaryRow {
    fn from(s: SyncSummary) -> Self {
        Self {
            total: s.total,
            processed: s.processed,
            skipped: s.skipped,
            errored: s.errored,
        }
    }
}

#[derive(Tabled)]
struct HitRow {
    #[tabled(rename = "File")]
    filename: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Preview")]
    preview: String,
}

impl From<&SearchHit> for HitRow {
    fn from(hit: &SearchHit) -> Self {
        let source = hit.highlight.first().unwrap_or(&hit.text);
        Self {
            filename: hit.filename.clone(),
            created: hit.created_at.format("%Y-%m-%d %H:%M").to_string(),
            score: hit.score.map(|s| format!("{:.2}", s)).unwrap_or_else(|| "-".into()),
            preview: preview(source, 60),
        }
    }
}

/// First `max` characters of `text` on one line
fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}...", flat.chars().take(max).collect::<String>())
    }
}

fn print_header(text: &str) {
    println!("\n{} {}", "=>".bright_green(), text.bold());
}

fn print_success(text: &str) {
    println!("{} {}", "✓".bright_green(), text);
}

fn print_error(text: &str) {
    println!("{} {}", "✗".bright_red(), text);
}

fn print_info(text: &str) {
    println!("{} {}", "•".bright_blue(), text);
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dropsearch_core=info".into());
    let json = std::env::var("DROPSEARCH_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let config = match DropsearchConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            print_error(&e.to_string());
            print_info("Set the variables in the environment or a .env file");
            std::process::exit(2);
        }
    };

    let app = Dropsearch::with_config(config)?;

    match cli.command {
        Commands::Sync => {
            print_header("Syncing Dropbox folder");

            let pb = spinner("Listing and indexing files...");
            let result = app.sync_once().await;
            pb.finish_and_clear();

            match result {
                Ok(summary) => {
                    println!("{}", Table::new([SummaryRow::from(summary)]));
                    if summary.errored > 0 {
                        print_error(&format!(
                            "{} file(s) failed; they will be retried on the next pass",
                            summary.errored
                        ));
                    } else {
                        print_success("Sync complete");
                    }
                }
                Err(DropsearchError::PassInProgress) => {
                    print_info("A sync pass is already running");
                }
                Err(e) => {
                    print_error(&format!("Sync failed: {}", e));
                    std::process::exit(1);
                }
            }
        }

        Commands::Search { query, sort, limit } => {
            if query.trim().is_empty() {
                print_header("Browsing indexed files");
            } else {
                print_header(&format!("Searching for \"{}\"", query.bright_yellow()));
            }

            let request = SearchRequest {
                limit,
                ..SearchRequest::new(query).with_sort(sort)
            };
            let hits = app.search(&request).await?;

            if hits.is_empty() {
                print_info("No files found. Try a different search?");
            } else {
                println!("\n{} {} files:\n", "Found".bright_green(), hits.len());
                let rows: Vec<HitRow> = hits.iter().map(HitRow::from).collect();
                println!("{}", Table::new(rows));
                for hit in &hits {
                    println!("  {} {}", hit.filename.bright_cyan(), hit.url.dimmed());
                }
            }
        }

        Commands::Daemon => {
            let scheduler = app.scheduler();
            print_header(&format!(
                "Syncing every {}s (first pass starts now)",
                app.config().sync_interval_secs
            ));
            println!("{}", "Press Ctrl+C to stop".dimmed());

            scheduler.start();
            tokio::signal::ctrl_c().await?;

            println!("\n{}", "Stopping scheduler...".dimmed());
            scheduler.stop();

            let stats = scheduler.stats().await;
            print_info(&format!(
                "{} pass(es) run, {} failed",
                stats.total_passes, stats.failed_passes
            ));
            if let Some(summary) = stats.last_summary {
                println!("{}", Table::new([SummaryRow::from(summary)]));
            }
            print_success("Stopped");
        }

        Commands::Config => {
            print_header("Dropsearch configuration");
            for (key, value) in app.config().describe() {
                println!("  {:<34} {}", key.bright_blue(), value);
            }
        }
    }

    Ok(())
}
