//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{collections::HashSet, net::SocketAddr, num::NonZeroUsize, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::{
    application::resource::ExtendedHeaders,
    domain::{entry::Expiration, media::MediaType},
};

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "restcache";
const ENV_PREFIX: &str = "RESTCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 11222;
const DEFAULT_CONTEXT_PATH: &str = "/rest/v2/caches";
const DEFAULT_NODE_NAME: &str = "node-1";
const DEFAULT_CACHE_NAME: &str = "default";
const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub workers: WorkerSettings,
    pub cluster: ClusterSettings,
    pub caches: Vec<CacheSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub context_path: String,
    pub node_name: String,
    pub extended_headers: ExtendedHeaders,
    /// Principal for internal metadata reads; `None` runs them as the service.
    pub elevated_principal: Option<String>,
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
pub struct WorkerSettings {
    pub pool_size: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// Always contains the local node.
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub name: String,
    pub lifespan: Expiration,
    pub max_idle: Expiration,
    pub storage_media_type: Option<MediaType>,
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cluster.members")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::CheckConfig) | None => {}
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
    workers: RawWorkerSettings,
    cluster: RawClusterSettings,
    caches: Vec<RawCacheSettings>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(name) = overrides.node_name.as_ref() {
            self.server.node_name = Some(name.clone());
        }
        if let Some(policy) = overrides.extended_headers.as_ref() {
            self.server.extended_headers = Some(policy.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(workers) = overrides.workers {
            self.workers.pool_size = Some(workers);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            workers,
            cluster,
            caches,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let workers = build_worker_settings(workers)?;
        let cluster = build_cluster_settings(cluster, &server.node_name)?;
        let caches = build_cache_settings(caches)?;

        Ok(Self {
            server,
            logging,
            workers,
            cluster,
            caches,
        })
    }

    /// One-line-per-setting summary for `check-config`.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![
            format!("server.addr = {}", self.server.addr),
            format!("server.context_path = {}", self.server.context_path),
            format!("server.node_name = {}", self.server.node_name),
            format!(
                "server.extended_headers = {}",
                match self.server.extended_headers {
                    ExtendedHeaders::Never => "never",
                    ExtendedHeaders::OnDemand => "on_demand",
                }
            ),
            format!("logging.level = {}", self.logging.level),
            format!("workers.pool_size = {}", self.workers.pool_size),
            format!("cluster.members = {}", self.cluster.members.join(",")),
        ];
        for cache in &self.caches {
            lines.push(format!(
                "caches.{} = lifespan {} max_idle {} storage {}",
                cache.name,
                cache.lifespan.header_value(),
                cache.max_idle.header_value(),
                cache
                    .storage_media_type
                    .as_ref()
                    .map_or_else(|| "unconfigured".to_string(), ToString::to_string),
            ));
        }
        lines
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

    let context_path = server
        .context_path
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CONTEXT_PATH.to_string());
    if !context_path.starts_with('/') {
        return Err(LoadError::invalid(
            "server.context_path",
            "must start with `/`",
        ));
    }

    let node_name = non_empty(server.node_name).unwrap_or_else(|| DEFAULT_NODE_NAME.to_string());

    let extended_headers = match server.extended_headers.as_deref().map(str::trim) {
        None => ExtendedHeaders::default(),
        Some(value) if value.eq_ignore_ascii_case("never") => ExtendedHeaders::Never,
        Some(value)
            if value.eq_ignore_ascii_case("on_demand") || value.eq_ignore_ascii_case("on-demand") =>
        {
            ExtendedHeaders::OnDemand
        }
        Some(other) => {
            return Err(LoadError::invalid(
                "server.extended_headers",
                format!("expected `never` or `on_demand`, got `{other}`"),
            ));
        }
    };

    Ok(ServerSettings {
        addr,
        context_path,
        node_name,
        extended_headers,
        elevated_principal: non_empty(server.elevated_principal),
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

fn build_worker_settings(workers: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    let value = workers.pool_size.unwrap_or(DEFAULT_WORKER_POOL_SIZE);
    let pool_size = NonZeroUsize::new(value)
        .ok_or_else(|| LoadError::invalid("workers.pool_size", "must be greater than zero"))?;
    Ok(WorkerSettings { pool_size })
}

fn build_cluster_settings(
    cluster: RawClusterSettings,
    node_name: &str,
) -> Result<ClusterSettings, LoadError> {
    let mut members = Vec::new();
    for member in cluster.members {
        let member = member.trim();
        if member.is_empty() {
            return Err(LoadError::invalid(
                "cluster.members",
                "member names must not be empty",
            ));
        }
        if !members.iter().any(|existing| existing == member) {
            members.push(member.to_string());
        }
    }
    if !members.iter().any(|existing| existing == node_name) {
        members.push(node_name.to_string());
    }
    Ok(ClusterSettings { members })
}

fn build_cache_settings(caches: Vec<RawCacheSettings>) -> Result<Vec<CacheSettings>, LoadError> {
    if caches.is_empty() {
        return Ok(vec![CacheSettings {
            name: DEFAULT_CACHE_NAME.to_string(),
            lifespan: Expiration::Unlimited,
            max_idle: Expiration::Unlimited,
            storage_media_type: None,
        }]);
    }

    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(caches.len());
    for raw in caches {
        let name = raw.name.trim().to_string();
        if name.is_empty() || name.contains('/') {
            return Err(LoadError::invalid(
                "caches.name",
                format!("`{name}` is not a valid cache name"),
            ));
        }
        if !seen.insert(name.clone()) {
            return Err(LoadError::invalid(
                "caches.name",
                format!("cache `{name}` is defined twice"),
            ));
        }

        let storage_media_type = match non_empty(raw.storage_media_type) {
            None => None,
            Some(value) => {
                let media_type = MediaType::from_str(&value).map_err(|err| {
                    LoadError::invalid("caches.storage_media_type", err.to_string())
                })?;
                if media_type.is_wildcard() {
                    return Err(LoadError::invalid(
                        "caches.storage_media_type",
                        "storage format must be a concrete media type",
                    ));
                }
                Some(media_type)
            }
        };

        resolved.push(CacheSettings {
            name,
            lifespan: expiration(raw.lifespan_seconds, "caches.lifespan_seconds")?,
            max_idle: expiration(raw.max_idle_seconds, "caches.max_idle_seconds")?,
            storage_media_type,
        });
    }
    Ok(resolved)
}

fn expiration(seconds: Option<u64>, key: &'static str) -> Result<Expiration, LoadError> {
    match seconds {
        Some(0) => Err(LoadError::invalid(
            key,
            "must be greater than zero; omit for unlimited",
        )),
        other => Ok(Expiration::from_seconds(other)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("failed to parse `{candidate}`: {err}"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    context_path: Option<String>,
    node_name: Option<String>,
    extended_headers: Option<String>,
    elevated_principal: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    pool_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClusterSettings {
    members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCacheSettings {
    name: String,
    #[serde(default)]
    lifespan_seconds: Option<u64>,
    #[serde(default)]
    max_idle_seconds: Option<u64>,
    #[serde(default)]
    storage_media_type: Option<String>,
}
