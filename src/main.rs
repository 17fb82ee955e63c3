use std::{process, sync::Arc, time::Duration};

use classlist::{
    application::{
        error::AppError, filter::RawReportParams, report::ClassListService,
        repos::ClassListStore,
    },
    cache::CacheConfig,
    config,
    infra::{
        db::{PostgresStore, ensure_indexes},
        error::InfraError,
        http::{self, HttpState},
        memory::InMemoryStore,
        telemetry,
    },
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Dispatch, Level, debug, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Report(args) => run_report(settings, args).await,
        config::Command::Options(_) => run_options(settings).await,
        config::Command::EnsureIndexes(_) => run_ensure_indexes(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let service = Arc::new(ClassListService::from_settings(store, &settings));

    let cache = CacheConfig::from(&settings.cache);
    let sweeper = spawn_cache_sweeper(Arc::clone(&service), cache.sweep_interval);
    let result = serve_http(&settings, HttpState::new(service)).await;

    if let Some(handle) = sweeper {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_report(settings: config::Settings, args: config::ReportArgs) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let service = ClassListService::from_settings(store, &settings);

    let params = RawReportParams {
        semester: args.semester,
        subject: args.subject,
        page: args.page,
        page_size: args.page_size,
    };
    let report = service.report(&params).await?;

    info!(
        target = "classlist::report",
        signature = %report.signature,
        rows = report.rows.len(),
        dropped_rows = report.dropped_rows,
        "report computed"
    );
    print_json(&report.to_response())
}

async fn run_options(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let service = ClassListService::from_settings(store, &settings);
    let options = service.filter_options().await?;
    print_json(&options.to_response())
}

async fn run_ensure_indexes(settings: config::Settings) -> Result<(), AppError> {
    let store = connect_postgres(&settings).await?;
    let ensured = ensure_indexes(store.primary())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    info!(
        target = "classlist::ensure_indexes",
        count = ensured.len(),
        "indexes ensured"
    );
    Ok(())
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn ClassListStore>, AppError> {
    if settings.database.url.is_some() {
        let store = connect_postgres(settings).await?;
        info!(
            replicas = settings.database.replica_urls.len(),
            "using postgres class list store"
        );
        return Ok(Arc::new(store));
    }

    let path = settings.database.dataset.as_ref().ok_or_else(|| {
        AppError::from(InfraError::configuration(
            "either database.url or database.dataset must be configured",
        ))
    })?;
    let store = InMemoryStore::load(path).await?;
    Ok(Arc::new(store))
}

async fn connect_postgres(settings: &config::Settings) -> Result<PostgresStore, AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresStore::connect(&settings.database, url)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

fn spawn_cache_sweeper(
    service: Arc<ClassListService>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            let removed = service.sweep_expired();
            if removed > 0 {
                debug!(removed, "swept expired cache entries");
            }
        }
    }))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "class list service listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{body}");
    Ok(())
}
