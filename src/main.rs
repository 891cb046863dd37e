use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use lifeweeks::birthdate;
use lifeweeks::config::{Config, LoggingConfig};
use lifeweeks::scheduler;
use lifeweeks::stats::{self, LifeStats};
use lifeweeks::svg::{self, Theme};

/// Your life in weeks, delivered daily.
#[derive(Parser)]
#[command(name = "lifeweeks", version, about)]
struct Cli {
    /// Config file (defaults to ./lifeweeks.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot and the daily summary.
    Run,

    /// Print the summary for a birthdate.
    Report {
        /// Birthdate, day first (DD.MM.YYYY).
        #[arg(short, long)]
        birthdate: String,
        /// Evaluate as of this date (YYYY-MM-DD) instead of today.
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Write the life chart for a birthdate as PNG, or as SVG when the
    /// output file ends in `.svg`.
    Chart {
        /// Birthdate, day first (DD.MM.YYYY).
        #[arg(short, long)]
        birthdate: String,
        #[arg(short, long, default_value = "life_in_weeks.png")]
        out: PathBuf,
        /// Overrides the configured chart theme.
        #[arg(long, value_enum)]
        theme: Option<Theme>,
    },
}

fn init_tracing(config: &LoggingConfig) {
    let base_level = config.level.as_deref().unwrap_or("info");
    let mut filter_str = base_level.to_string();

    for (module, level) in &config.filters {
        filter_str.push(',');
        filter_str.push_str(module);
        filter_str.push('=');
        filter_str.push_str(level);
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&filter_str))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.format.as_str() {
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

fn parse_birthdate(input: &str, today: NaiveDate) -> Result<NaiveDate> {
    birthdate::parse_birthdate(input, today).map_err(|e| anyhow!("invalid birthdate: {e}"))
}

async fn execute(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Run => lifeweeks::app::run(config).await,
        Commands::Report { birthdate, today } => {
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let birthdate = parse_birthdate(&birthdate, today)?;
            let stats = LifeStats::compute(birthdate, today, &config.lifespan);
            println!(
                "{}",
                stats::summary_text(birthdate, today, &stats, &config.lifespan)
            );
            Ok(())
        }
        Commands::Chart {
            birthdate,
            out,
            theme,
        } => {
            let today = Local::now().date_naive();
            let birthdate = parse_birthdate(&birthdate, today)?;
            let stats = LifeStats::compute(birthdate, today, &config.lifespan);
            let theme = theme.unwrap_or(config.chart.theme);
            let document = scheduler::chart_svg(stats.weeks_lived, &config.lifespan, theme);
            let bytes = if out.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("svg")) {
                document.into_bytes()
            } else {
                svg::rasterize(&document).context("Failed to rasterize chart")?
            };

            fs::write(&out, bytes).with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Generated {} successfully.", out.display());
            Ok(())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
