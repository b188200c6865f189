//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{CliArgs, Command, DatabaseOverride, MigrateArgs, ServeArgs, ServeOverrides};

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::pricing::PricingPolicy;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "storefront";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_CACHE_CAPACITY: u64 = 1024;
const DEFAULT_CACHE_TTL_SECS: u64 = 900;
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_CACHE_TIMEOUT_MS: u64 = 100;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5000;
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_DISK_PATH: &str = "/";
const DEFAULT_DISK_MAX_PERCENT: f64 = 90.0;
const DEFAULT_MEMORY_MIN_MB: u64 = 256;
const DEFAULT_PAYMENT_TIMEOUT_MS: u64 = 10_000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub catalog: CatalogSettings,
    pub checkout: CheckoutSettings,
    pub health: HealthSettings,
    pub payments: PaymentSettings,
    pub admin: AdminSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub capacity: NonZeroUsize,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub cache_timeout: Duration,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub pricing: PricingPolicy,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub probe_timeout: Duration,
    pub disk_path: PathBuf,
    pub disk_max_percent: f64,
    pub memory_min_mb: u64,
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// `None` selects manual settlement.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AdminSettings {
    /// `None` disables the admin API.
    pub api_token: Option<String>,
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

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("STOREFRONT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
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
    catalog: RawCatalogSettings,
    checkout: RawCheckoutSettings,
    health: RawHealthSettings,
    payments: RawPaymentSettings,
    admin: RawAdminSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(capacity) = overrides.cache_capacity {
            self.cache.capacity = Some(capacity);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(endpoint) = overrides.payments_endpoint.as_ref() {
            self.payments.endpoint = Some(endpoint.clone());
        }

        self.apply_database_override(&overrides.database);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
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
            catalog,
            checkout,
            health,
            payments,
            admin,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            catalog: build_catalog_settings(catalog)?,
            checkout: build_checkout_settings(checkout)?,
            health: build_health_settings(health)?,
            payments: build_payment_settings(payments)?,
            admin: AdminSettings {
                api_token: non_blank(admin.api_token),
            },
        })
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

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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
    let max = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url: non_blank(database.url),
        max_connections: non_zero_u32(max.into(), "database.max_connections")?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let capacity = cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    let capacity = usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("cache.capacity", "must be greater than zero"))?;

    let ttl = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        capacity,
        ttl: Duration::from_secs(ttl),
    })
}

fn build_catalog_settings(catalog: RawCatalogSettings) -> Result<CatalogSettings, LoadError> {
    let max_page_size = non_zero_u32(
        catalog
            .max_page_size
            .unwrap_or(DEFAULT_MAX_PAGE_SIZE)
            .into(),
        "catalog.max_page_size",
    )?
    .get();
    let default_page_size = non_zero_u32(
        catalog
            .default_page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .into(),
        "catalog.default_page_size",
    )?
    .get();
    if default_page_size > max_page_size {
        return Err(LoadError::invalid(
            "catalog.default_page_size",
            format!("must not exceed catalog.max_page_size ({max_page_size})"),
        ));
    }

    Ok(CatalogSettings {
        default_page_size,
        max_page_size,
        cache_timeout: positive_millis(
            catalog.cache_timeout_ms.unwrap_or(DEFAULT_CACHE_TIMEOUT_MS),
            "catalog.cache_timeout_ms",
        )?,
        query_timeout: positive_millis(
            catalog.query_timeout_ms.unwrap_or(DEFAULT_QUERY_TIMEOUT_MS),
            "catalog.query_timeout_ms",
        )?,
    })
}

fn build_checkout_settings(checkout: RawCheckoutSettings) -> Result<CheckoutSettings, LoadError> {
    let defaults = PricingPolicy::default();
    let free_shipping_threshold = parse_money(
        checkout.free_shipping_threshold,
        "checkout.free_shipping_threshold",
        defaults.free_shipping_threshold,
    )?;
    let flat_shipping_fee = parse_money(
        checkout.flat_shipping_fee,
        "checkout.flat_shipping_fee",
        defaults.flat_shipping_fee,
    )?;
    let tax_rate = parse_money(checkout.tax_rate, "checkout.tax_rate", defaults.tax_rate)?;
    if tax_rate >= Decimal::ONE {
        return Err(LoadError::invalid(
            "checkout.tax_rate",
            "must be a fraction below 1",
        ));
    }

    let currency = checkout
        .currency
        .map(|value| value.trim().to_ascii_uppercase())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(LoadError::invalid(
            "checkout.currency",
            "must be a three-letter ISO 4217 code",
        ));
    }

    Ok(CheckoutSettings {
        pricing: PricingPolicy {
            free_shipping_threshold,
            flat_shipping_fee,
            tax_rate,
        },
        currency,
    })
}

fn build_health_settings(health: RawHealthSettings) -> Result<HealthSettings, LoadError> {
    let disk_max_percent = health.disk_max_percent.unwrap_or(DEFAULT_DISK_MAX_PERCENT);
    if !(disk_max_percent > 0.0 && disk_max_percent <= 100.0) {
        return Err(LoadError::invalid(
            "health.disk_max_percent",
            "must be within (0, 100]",
        ));
    }

    let disk_path = health
        .disk_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DISK_PATH));
    if disk_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "health.disk_path",
            "path must not be empty",
        ));
    }

    Ok(HealthSettings {
        probe_timeout: positive_millis(
            health.probe_timeout_ms.unwrap_or(DEFAULT_PROBE_TIMEOUT_MS),
            "health.probe_timeout_ms",
        )?,
        disk_path,
        disk_max_percent,
        memory_min_mb: health.memory_min_mb.unwrap_or(DEFAULT_MEMORY_MIN_MB),
    })
}

fn build_payment_settings(payments: RawPaymentSettings) -> Result<PaymentSettings, LoadError> {
    let endpoint = non_blank(payments.endpoint);
    if let Some(endpoint) = endpoint.as_deref()
        && !(endpoint.starts_with("https://") || endpoint.starts_with("http://"))
    {
        return Err(LoadError::invalid(
            "payments.endpoint",
            "must be an http(s) URL",
        ));
    }

    Ok(PaymentSettings {
        endpoint,
        api_key: non_blank(payments.api_key),
        timeout: positive_millis(
            payments.timeout_ms.unwrap_or(DEFAULT_PAYMENT_TIMEOUT_MS),
            "payments.timeout_ms",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
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
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    capacity: Option<u64>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCatalogSettings {
    default_page_size: Option<u32>,
    max_page_size: Option<u32>,
    cache_timeout_ms: Option<u64>,
    query_timeout_ms: Option<u64>,
}

/// Money is read as strings so amounts never pass through binary floats.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCheckoutSettings {
    free_shipping_threshold: Option<String>,
    flat_shipping_fee: Option<String>,
    tax_rate: Option<String>,
    currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHealthSettings {
    probe_timeout_ms: Option<u64>,
    disk_path: Option<PathBuf>,
    disk_max_percent: Option<f64>,
    memory_min_mb: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPaymentSettings {
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    api_token: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn parse_money(
    raw: Option<String>,
    key: &'static str,
    default: Decimal,
) -> Result<Decimal, LoadError> {
    let Some(raw) = non_blank(raw) else {
        return Ok(default);
    };
    let value = Decimal::from_str(&raw)
        .map_err(|err| LoadError::invalid(key, format!("failed to parse `{raw}`: {err}")))?;
    if value.is_sign_negative() {
        return Err(LoadError::invalid(key, "must not be negative"));
    }
    Ok(value.normalize())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests;
