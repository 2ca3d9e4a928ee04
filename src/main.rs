use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use traffic_analysis::ForecastMode;
use wiki_traffic::catalog;
use wiki_traffic::{NewEvent, NewPage};
use wikitrends::{
    logging, AnalysisRequest, AnalysisResponse, AppConfig, Pipeline, PipelineError, Result,
};

#[derive(Parser)]
#[command(name = "wikitrends")]
#[command(about = "Trend analysis of daily Wikipedia page views")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh traffic data (at most once a day unless forced)
    Update {
        #[arg(long)]
        force: bool,
    },
    /// Run all four analyses and print the results as JSON
    Analyze {
        /// Maximum peaks per page
        #[arg(long)]
        peaks: Option<usize>,
        /// Autocorrelation window in days
        #[arg(long)]
        window: Option<usize>,
        /// Maximum cross-correlation lag in days
        #[arg(long)]
        max_lag: Option<usize>,
        /// Days to forecast
        #[arg(long, conflicts_with = "rolling")]
        steps: Option<usize>,
        /// Rolling one-step evaluation instead of a plain forecast
        #[arg(long)]
        rolling: bool,
    },
    /// Manage tracked events
    Events {
        #[command(subcommand)]
        action: EventAction,
    },
    /// Manage tracked Wikipedia pages
    Pages {
        #[command(subcommand)]
        action: PageAction,
    },
    /// Seed the catalog from JSON files
    Bootstrap {
        #[arg(long)]
        events: PathBuf,
        #[arg(long)]
        pages: PathBuf,
    },
    /// Delete cached results, the traffic mirror and all figures
    Reset,
}

#[derive(Subcommand)]
enum EventAction {
    List,
    Add {
        name: String,
        #[arg(long, default_value = "en")]
        language: String,
        /// Creation date, `DD/MM/YYYY` or `YYYY-MM-DD`
        #[arg(long)]
        created: String,
        #[arg(long)]
        code: i64,
    },
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum PageAction {
    List,
    Add {
        title: String,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long)]
        event_code: i64,
        #[arg(long, default_value_t = 0)]
        views: i64,
        #[arg(long, default_value = "")]
        url: String,
    },
    Delete { id: i64 },
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let pipeline = Pipeline::open(config)?;

    match cli.command {
        Commands::Update { force } => {
            let today = Utc::now().date_naive();
            let refreshed = pipeline.refresh(today, force)?;
            println!(
                "{}",
                if refreshed {
                    "Traffic data updated"
                } else {
                    "Traffic data already up to date"
                }
            );
        }
        Commands::Analyze {
            peaks,
            window,
            max_lag,
            steps,
            rolling,
        } => {
            let mut request = AnalysisRequest::from_config(pipeline.config());
            if let Some(peaks) = peaks {
                request.target_peak_count = peaks;
            }
            if let Some(window) = window {
                request.window_days = window;
            }
            if let Some(max_lag) = max_lag {
                request.max_lag = max_lag;
            }
            if rolling {
                request.forecast = ForecastMode::Rolling {
                    train_ratio: pipeline.config().forecast.train_ratio,
                };
            } else if let Some(steps) = steps {
                request.forecast = ForecastMode::Plain { steps };
            }

            let response = pipeline.handle_request(&request);
            print_json(&response)?;
            if matches!(response, AnalysisResponse::Failure { .. }) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Events { action } => match action {
            EventAction::List => print_json(&catalog::all_events(pipeline.store())?)?,
            EventAction::Add {
                name,
                language,
                created,
                code,
            } => {
                let id = catalog::create_event(
                    pipeline.store(),
                    &NewEvent {
                        name,
                        language,
                        created_datetime: created,
                        event_code: code,
                    },
                )?;
                println!("Created event {}", id);
            }
            EventAction::Delete { id } => {
                if !catalog::delete_event(pipeline.store(), id)? {
                    return Err(PipelineError::NotFound(format!("event {}", id)));
                }
                println!("Deleted event {}", id);
            }
        },
        Commands::Pages { action } => match action {
            PageAction::List => print_json(&catalog::all_pages(pipeline.store())?)?,
            PageAction::Add {
                title,
                language,
                event_code,
                views,
                url,
            } => {
                let id = catalog::create_page(
                    pipeline.store(),
                    &NewPage {
                        title,
                        language,
                        views,
                        event_code,
                        url,
                    },
                )?;
                println!("Created page {}", id);
            }
            PageAction::Delete { id } => {
                if !catalog::delete_page(pipeline.store(), id)? {
                    return Err(PipelineError::NotFound(format!("page {}", id)));
                }
                println!("Deleted page {}", id);
            }
        },
        Commands::Bootstrap { events, pages } => {
            let events = catalog::load_default_events(pipeline.store(), &events)?;
            let pages = catalog::load_default_pages(pipeline.store(), &pages)?;
            println!("Loaded {} events and {} pages", events, pages);
        }
        Commands::Reset => {
            pipeline.reset()?;
            println!("Cached results removed");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
