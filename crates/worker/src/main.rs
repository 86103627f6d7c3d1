use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use longtou_core::backtest::engine::{BacktestEngine, BacktestOptions};
use longtou_core::backtest::ledger::ProgressLedger;
use longtou_core::backtest::pattern::{self, AnalyzeOptions};
use longtou_core::config::Settings;
use longtou_core::domain::logic::LogicLibrary;
use longtou_core::domain::request::{
    AnalyzeRequest, BacktestRequest, EngineRequest, ReportRequest, ScreenRequest,
};
use longtou_core::ingest::provider::{HttpJsonMarketData, MarketDataProvider};
use longtou_core::ingest::rate_limit::RateLimiter;
use longtou_core::screen::screener::{ScreenOptions, Screener};
use longtou_core::storage::lock::RunKind;
use longtou_core::storage::samples::PgLedger;
use longtou_core::time::cn_market;

#[derive(Debug, Parser)]
#[command(name = "longtou_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Produce the daily watch-list.
    Screen {
        /// Trade date (YYYY-MM-DD). Defaults to the latest completed session.
        #[arg(long)]
        as_of_date: Option<String>,

        /// Popularity floor.
        #[arg(long, default_value_t = 30)]
        top_n: usize,

        /// Minimum logic strength for overlap-only candidates.
        #[arg(long, default_value_t = 4)]
        min_logic_strength: u8,

        /// Do everything except writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Sample historical events and their forward outcomes.
    Backtest {
        /// Window end date (YYYY-MM-DD). Defaults to the latest completed session.
        #[arg(long)]
        end_date: Option<String>,

        #[arg(long, default_value_t = 30)]
        window_days: usize,

        #[arg(long, default_value_t = 100)]
        sample_cap: usize,
    },

    /// Mine the sampled outcomes for patterns and tuning suggestions.
    Analyze {
        #[arg(long, default_value_t = 30)]
        window_days: usize,

        #[arg(long, default_value_t = 5)]
        min_samples: usize,

        #[arg(long, default_value_t = 15)]
        confidence_samples: usize,

        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },

    /// Print a persisted watch-list.
    Report {
        /// Trade date (YYYY-MM-DD). Defaults to the latest snapshot.
        #[arg(long)]
        as_of_date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let now = chrono::Utc::now();

    match args.command {
        Command::Screen {
            as_of_date,
            top_n,
            min_logic_strength,
            dry_run,
        } => {
            let request = ScreenRequest {
                as_of_date: cn_market::resolve_as_of_date(as_of_date.as_deref(), now)?,
                top_n,
                min_logic_strength,
            };
            route(EngineRequest::Screen(request), &settings, dry_run).await
        }
        Command::Backtest {
            end_date,
            window_days,
            sample_cap,
        } => {
            let request = BacktestRequest {
                end_date: cn_market::resolve_as_of_date(end_date.as_deref(), now)?,
                window_days,
                sample_cap,
            };
            route(EngineRequest::Backtest(request), &settings, false).await
        }
        Command::Analyze {
            window_days,
            min_samples,
            confidence_samples,
            top_k,
        } => {
            let request = AnalyzeRequest {
                window_days,
                min_samples,
                confidence_samples,
                top_k,
            };
            route(EngineRequest::Analyze(request), &settings, false).await
        }
        Command::Report { as_of_date } => {
            let as_of_date = as_of_date
                .as_deref()
                .map(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d"))
                .transpose()
                .context("bad --as-of-date")?;
            route(
                EngineRequest::Report(ReportRequest { as_of_date }),
                &settings,
                false,
            )
            .await
        }
    }
}

async fn route(request: EngineRequest, settings: &Settings, dry_run: bool) -> anyhow::Result<()> {
    match request {
        EngineRequest::Screen(request) => run_screen(request, settings, dry_run).await,
        EngineRequest::Backtest(request) => run_backtest(request, settings).await,
        EngineRequest::Analyze(request) => run_analyze(request, settings).await,
        EngineRequest::Report(request) => run_report(request, settings).await,
    }
}

async fn run_screen(
    request: ScreenRequest,
    settings: &Settings,
    dry_run: bool,
) -> anyhow::Result<()> {
    let as_of_date = request.as_of_date;
    let provider = build_provider(settings)?;
    let library = LogicLibrary::load(Path::new(settings.require_logic_library_path()?))?;

    let prev_trade_date = previous_trading_day(provider.as_ref(), as_of_date).await?;

    if dry_run {
        let options = ScreenOptions {
            top_n: request.top_n,
            min_logic_strength: request.min_logic_strength,
        };
        let mut screener = Screener::new(provider, library, options);
        let watchlist = screener.run(as_of_date, prev_trade_date).await?;
        println!("{}", serde_json::to_string_pretty(&watchlist)?);
        tracing::info!(%as_of_date, dry_run = true, entries = watchlist.entries.len(), "screen finished");
        return Ok(());
    }

    let pool = connect(settings).await?;
    longtou_core::storage::migrate(&pool).await?;

    let acquired =
        longtou_core::storage::lock::try_acquire_run_lock(&pool, RunKind::Screen, as_of_date)
            .await?;
    if !acquired {
        tracing::warn!(%as_of_date, "screen lock not acquired; another run in progress");
        return Ok(());
    }

    let prev_leaders =
        longtou_core::storage::leader_state::load_snapshot(&pool, prev_trade_date).await?;

    let options = ScreenOptions {
        top_n: request.top_n,
        min_logic_strength: request.min_logic_strength,
    };
    let mut screener =
        Screener::new(provider, library, options).with_previous_leaders(prev_leaders);

    let result = screener.run(as_of_date, prev_trade_date).await;

    match result {
        Ok(watchlist) => {
            let snapshot_id =
                longtou_core::storage::watchlists::persist_success(&pool, &watchlist).await?;
            longtou_core::storage::leader_state::save_snapshot(
                &pool,
                as_of_date,
                &watchlist.leader_snapshot(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&watchlist)?);
            tracing::info!(%as_of_date, %snapshot_id, entries = watchlist.entries.len(), "persisted watch-list snapshot");
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            let snapshot_id = longtou_core::storage::watchlists::persist_failure(
                &pool,
                as_of_date,
                chrono::Utc::now(),
                &format!("{err:#}"),
            )
            .await?;
            tracing::error!(%as_of_date, %snapshot_id, error = %err, "screening run failed");
        }
    }

    let _ =
        longtou_core::storage::lock::release_run_lock(&pool, RunKind::Screen, as_of_date).await;
    Ok(())
}

async fn run_backtest(request: BacktestRequest, settings: &Settings) -> anyhow::Result<()> {
    let provider = build_provider(settings)?;
    let pool = connect(settings).await?;
    longtou_core::storage::migrate(&pool).await?;

    let acquired = longtou_core::storage::lock::try_acquire_run_lock(
        &pool,
        RunKind::Backtest,
        request.end_date,
    )
    .await?;
    if !acquired {
        tracing::warn!(end_date = %request.end_date, "backtest lock not acquired; another run in progress");
        return Ok(());
    }

    let ledger: Arc<dyn ProgressLedger> = Arc::new(PgLedger::new(pool.clone()));
    let mut options = BacktestOptions::from_env();
    options.window_days = request.window_days;
    options.sample_cap = request.sample_cap;

    let engine = BacktestEngine::new(provider, ledger, options);
    let result = engine.run(request.end_date).await;

    match &result {
        Ok(samples) => {
            let incomplete = samples.iter().filter(|s| s.incomplete).count();
            tracing::info!(
                end_date = %request.end_date,
                samples = samples.len(),
                incomplete,
                "backtest finished"
            );
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(err);
            tracing::error!(end_date = %request.end_date, error = %err, "backtest failed");
        }
    }

    let _ =
        longtou_core::storage::lock::release_run_lock(&pool, RunKind::Backtest, request.end_date)
            .await;
    result.map(|_| ())
}

async fn run_analyze(request: AnalyzeRequest, settings: &Settings) -> anyhow::Result<()> {
    let provider = build_provider(settings)?;
    let library = LogicLibrary::load(Path::new(settings.require_logic_library_path()?))?;
    let pool = connect(settings).await?;
    longtou_core::storage::migrate(&pool).await?;

    let end_date = cn_market::resolve_as_of_date(None, chrono::Utc::now())?;
    let window = provider.trading_days(end_date, request.window_days).await?;
    let start = *window.first().context("empty analysis window")?;

    let ledger = PgLedger::new(pool);
    let samples = ledger.samples_in_window(start, end_date).await?;

    let options = AnalyzeOptions {
        min_samples: request.min_samples,
        confidence_samples: request.confidence_samples,
        top_k: request.top_k,
        ..AnalyzeOptions::default()
    };
    let report = pattern::analyze(&samples, &library, &options);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Err(err) = report.require_conclusive() {
        tracing::warn!(error = %err, "analysis window too thin for conclusions");
    }
    Ok(())
}

async fn run_report(request: ReportRequest, settings: &Settings) -> anyhow::Result<()> {
    let pool = connect(settings).await?;
    longtou_core::storage::migrate(&pool).await?;

    match longtou_core::storage::watchlists::latest_payload(&pool, request.as_of_date).await? {
        Some(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        None => {
            tracing::warn!(as_of_date = ?request.as_of_date, "no persisted watch-list found");
            Ok(())
        }
    }
}

fn build_provider(settings: &Settings) -> anyhow::Result<Arc<HttpJsonMarketData>> {
    let limiter = Arc::new(RateLimiter::from_env());
    Ok(Arc::new(HttpJsonMarketData::from_settings(
        settings, limiter,
    )?))
}

async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")
}

/// The trading day before `as_of_date`, from the provider calendar with a
/// weekday fallback.
async fn previous_trading_day(
    provider: &dyn MarketDataProvider,
    as_of_date: chrono::NaiveDate,
) -> anyhow::Result<chrono::NaiveDate> {
    let days = provider.trading_days(as_of_date, 2).await?;
    days.iter()
        .copied()
        .filter(|d| *d < as_of_date)
        .next_back()
        .or_else(|| cn_market::recent_weekdays(as_of_date, 2).first().copied())
        .context("cannot resolve previous trading day")
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
