//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::resilience::{ReadConcern, ReadPreference};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "classlist";
const ENV_PREFIX: &str = "CLASSLIST";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CACHE_TTL_SECS: u64 = 120;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 256;
const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_PAGE_SIZE: u32 = 25;
const DEFAULT_MAX_PAGE_SIZE: u32 = 50;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_MS: u64 = 100;
const DEFAULT_BACKOFF_MAX_MS: u64 = 2_000;

/// Command-line arguments for the classlist binary.
#[derive(Debug, Parser)]
#[command(name = "classlist", version, about = "Class list reporting service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CLASSLIST_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the class list HTTP API.
    Serve(Box<ServeArgs>),
    /// Compute one class list page and print it as JSON.
    Report(ReportArgs),
    /// Print the subject and semester filter options as JSON.
    Options(OptionsArgs),
    /// Create the indexes the class list queries rely on.
    #[command(name = "ensure-indexes")]
    EnsureIndexes(EnsureIndexesArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Serve from a JSON dataset instead of a database.
    #[arg(long = "dataset", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub dataset: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override how long a computed report stays cached.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the maximum number of cached reports.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,

    /// Override the read preference (primary|primary_preferred|secondary|secondary_preferred|nearest).
    #[arg(long = "read-preference", value_name = "MODE")]
    pub read_preference: Option<String>,

    /// Override the per-operation store timeout.
    #[arg(long = "operation-timeout-ms", value_name = "MILLIS")]
    pub operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReportArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Semester identifier; omit for all semesters.
    #[arg(long, value_name = "ID")]
    pub semester: Option<String>,

    /// Subject code; omit for all subjects.
    #[arg(long, value_name = "CODE")]
    pub subject: Option<String>,

    /// One-based page number.
    #[arg(long, value_name = "PAGE")]
    pub page: Option<String>,

    /// Students per page.
    #[arg(long = "page-size", value_name = "COUNT")]
    pub page_size: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct OptionsArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct EnsureIndexesArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub report: ReportSettings,
    pub resilience: ResilienceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Primary connection URL; `None` selects the JSON dataset.
    pub url: Option<String>,
    pub replica_urls: Vec<String>,
    pub max_connections: NonZeroU32,
    pub dataset: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub max_entries: usize,
    /// `Duration::ZERO` disables the background sweeper.
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub default_page_size: NonZeroU32,
    pub max_page_size: NonZeroU32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResilienceSettings {
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    pub backoff_max: Duration,
    pub read_preference: ReadPreference,
    pub read_concern: ReadConcern,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("database.replica_urls")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Report(args)) => raw.apply_database_override(&args.database),
        Some(Command::Options(args)) => raw.apply_database_override(&args.database),
        Some(Command::EnsureIndexes(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    report: RawReportSettings,
    resilience: RawResilienceSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(preference) = overrides.read_preference.as_ref() {
            self.resilience.read_preference = Some(preference.clone());
        }
        if let Some(timeout) = overrides.operation_timeout_ms {
            self.resilience.operation_timeout_ms = Some(timeout);
        }

        self.apply_database_override(&overrides.database);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(path) = overrides.dataset.as_ref() {
            self.database.dataset = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            report,
            resilience,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            report: build_report_settings(report)?,
            resilience: build_resilience_settings(resilience)?,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            },
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            database: DatabaseSettings {
                url: None,
                replica_urls: Vec::new(),
                max_connections: NonZeroU32::new(DEFAULT_DB_MAX_CONNECTIONS)
                    .unwrap_or(NonZeroU32::MIN),
                dataset: None,
            },
            cache: CacheSettings {
                ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
                max_entries: DEFAULT_CACHE_MAX_ENTRIES as usize,
                sweep_interval: Duration::from_secs(DEFAULT_CACHE_SWEEP_INTERVAL_SECS),
            },
            report: ReportSettings {
                default_page_size: NonZeroU32::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroU32::MIN),
                max_page_size: NonZeroU32::new(DEFAULT_MAX_PAGE_SIZE).unwrap_or(NonZeroU32::MIN),
                request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            },
            resilience: ResilienceSettings {
                operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
                max_retries: DEFAULT_MAX_RETRIES,
                backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
                backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
                read_preference: ReadPreference::default(),
                read_concern: ReadConcern::default(),
            },
        }
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.as_deref().and_then(non_blank);
    let replica_urls = database
        .replica_urls
        .unwrap_or_default()
        .iter()
        .filter_map(|value| non_blank(value))
        .collect::<Vec<_>>();

    if url.is_none() && !replica_urls.is_empty() {
        return Err(LoadError::invalid(
            "database.replica_urls",
            "replicas require a primary `database.url`",
        ));
    }

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    let dataset = database
        .dataset
        .filter(|path| !path.as_os_str().is_empty());

    Ok(DatabaseSettings {
        url,
        replica_urls,
        max_connections,
        dataset,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let max_entries_value = cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);
    if max_entries_value == 0 {
        return Err(LoadError::invalid(
            "cache.max_entries",
            "must be greater than zero",
        ));
    }
    let max_entries = usize::try_from(max_entries_value).map_err(|_| {
        LoadError::invalid(
            "cache.max_entries",
            "value exceeds supported range for usize",
        )
    })?;

    let sweep_seconds = cache
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_SECS);

    Ok(CacheSettings {
        ttl: Duration::from_secs(ttl_seconds),
        max_entries,
        sweep_interval: Duration::from_secs(sweep_seconds),
    })
}

fn build_report_settings(report: RawReportSettings) -> Result<ReportSettings, LoadError> {
    let default_page_size = non_zero_u32(
        report.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE).into(),
        "report.default_page_size",
    )?;
    let max_page_size = non_zero_u32(
        report.max_page_size.unwrap_or(DEFAULT_MAX_PAGE_SIZE).into(),
        "report.max_page_size",
    )?;
    if default_page_size > max_page_size {
        return Err(LoadError::invalid(
            "report.default_page_size",
            format!("must not exceed report.max_page_size ({max_page_size})"),
        ));
    }

    let request_timeout_ms = report
        .request_timeout_ms
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    if request_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "report.request_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(ReportSettings {
        default_page_size,
        max_page_size,
        request_timeout: Duration::from_millis(request_timeout_ms),
    })
}

fn build_resilience_settings(
    resilience: RawResilienceSettings,
) -> Result<ResilienceSettings, LoadError> {
    let operation_timeout_ms = resilience
        .operation_timeout_ms
        .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS);
    if operation_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "resilience.operation_timeout_ms",
            "must be greater than zero",
        ));
    }

    let backoff_ms = resilience.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS);
    let backoff_max_ms = resilience.backoff_max_ms.unwrap_or(DEFAULT_BACKOFF_MAX_MS);
    if backoff_max_ms < backoff_ms {
        return Err(LoadError::invalid(
            "resilience.backoff_max_ms",
            "must be at least resilience.backoff_ms",
        ));
    }

    let read_preference = match resilience.read_preference {
        Some(value) => ReadPreference::from_str(&value)
            .map_err(|reason| LoadError::invalid("resilience.read_preference", reason))?,
        None => ReadPreference::default(),
    };
    let read_concern = match resilience.read_concern {
        Some(value) => ReadConcern::from_str(&value)
            .map_err(|reason| LoadError::invalid("resilience.read_concern", reason))?,
        None => ReadConcern::default(),
    };

    Ok(ResilienceSettings {
        operation_timeout: Duration::from_millis(operation_timeout_ms),
        max_retries: resilience.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        backoff: Duration::from_millis(backoff_ms),
        backoff_max: Duration::from_millis(backoff_max_ms),
        read_preference,
        read_concern,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    replica_urls: Option<Vec<String>>,
    max_connections: Option<u32>,
    dataset: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_seconds: Option<u64>,
    max_entries: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReportSettings {
    default_page_size: Option<u32>,
    max_page_size: Option<u32>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawResilienceSettings {
    operation_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    backoff_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    read_preference: Option<String>,
    read_concern: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
