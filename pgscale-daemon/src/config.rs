//! Bridge configuration loading from `pgscale.toml`.
//!
//! Configuration is optional: every section and field has a default that
//! reproduces the classic bridge (loopback port 1137, `/pgstat/<view>`,
//! sequential serving, legacy body format).
//!
//! # Example Configuration
//!
//! ```toml
//! [listener]
//! address = "127.0.0.1"
//! port = 1137
//! backlog = 10
//!
//! [request]
//! buffer_size = 1024
//! read_timeout_ms = 5000
//!
//! [routes]
//! namespace = "pgstat"
//! policy = "parametrized"
//! max_name_len = 40
//! allowed_views = ["connections", "pgscale_tables"]
//!
//! [response]
//! format = "legacy"
//!
//! [server]
//! mode = "sequential"
//! max_connections = 16
//!
//! [worker]
//! name = "pgscale_http_worker"
//! restart = "on_failure"
//! restart_delay_ms = 1000
//!
//! [database]
//! path = "stats.duckdb"
//! init_sql = "seed.sql"
//! ```

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use pgscale_core::pipeline::Pipeline;
use pgscale_core::result_set::BodyFormat;
use pgscale_core::router::{
    DispatchPolicy, PolicyKind, RouteRejection, RouteTable, ViewName, DEFAULT_MAX_NAME_LEN,
};

use crate::server::{ServeMode, ServerSettings, DEFAULT_MAX_CONNECTIONS};
use crate::worker::{RestartKind, RestartPolicy, WorkerConfig};

/// File name looked up by [`BridgeConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "pgscale.toml";

/// Database path that selects a private in-memory engine.
pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("listener address {0} is not a loopback address")]
    NotLoopback(IpAddr),
    #[error("request buffer size must be at least 1 byte")]
    InvalidBufferSize,
    #[error("server max_connections must be at least 1")]
    InvalidMaxConnections,
    #[error("route namespace {0:?} must be a single non-empty path segment")]
    InvalidNamespace(String),
    #[error("invalid view name in configuration: {0}")]
    InvalidView(#[from] RouteRejection),
}

/// Root configuration structure loaded from `pgscale.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub request: RequestConfig,

    #[serde(default)]
    pub routes: RoutesConfig,

    #[serde(default)]
    pub response: ResponseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Where the bridge listens. Only loopback addresses are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_address")]
    pub address: IpAddr,

    /// TCP port. `0` asks the OS for a free port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Pending-connection queue length passed to `listen(2)`.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    1137
}

fn default_backlog() -> u32 {
    10
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

/// Bounds on reading a request.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// Size of the single read; a request line longer than this is rejected.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// How long to wait for the client to send anything. `0` waits forever.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_buffer_size() -> usize {
    1024
}

fn default_read_timeout_ms() -> u64 {
    5000
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// URL namespace and dispatch policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub policy: PolicyKind,

    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,

    /// View served by the `fixed` policy.
    #[serde(default = "default_fixed_view")]
    pub fixed_view: String,

    /// When set, only these views can be requested.
    #[serde(default)]
    pub allowed_views: Option<Vec<String>>,
}

fn default_namespace() -> String {
    "pgstat".to_string()
}

fn default_max_name_len() -> usize {
    DEFAULT_MAX_NAME_LEN
}

fn default_fixed_view() -> String {
    "pgscale_tables".to_string()
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            policy: PolicyKind::default(),
            max_name_len: default_max_name_len(),
            fixed_view: default_fixed_view(),
            allowed_views: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseConfig {
    #[serde(default)]
    pub format: BodyFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServeMode,

    /// Cap on concurrently handled connections in `per_connection` mode.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: ServeMode::default(),
            max_connections: default_max_connections(),
        }
    }
}

/// Background worker registration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_worker_name")]
    pub name: String,

    #[serde(default)]
    pub restart: RestartKind,

    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

fn default_worker_name() -> String {
    WorkerConfig::default().name
}

fn default_restart_delay_ms() -> u64 {
    1000
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            restart: RestartKind::default(),
            restart_delay_ms: default_restart_delay_ms(),
        }
    }
}

/// The statistics engine the bridge queries.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// DuckDB file, or `:memory:` for a private in-memory engine.
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Attach to an existing file without installing the schema.
    #[serde(default)]
    pub read_only: bool,

    /// SQL file run once at startup (creates/seeds host tables).
    #[serde(default)]
    pub init_sql: Option<PathBuf>,
}

fn default_database_path() -> String {
    IN_MEMORY.to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            read_only: false,
            init_sql: None,
        }
    }
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.path == IN_MEMORY
    }
}

impl BridgeConfig {
    /// Load and validate configuration from an explicit path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `pgscale.toml` from `dir` if present.
    ///
    /// A missing file yields defaults. A file that can't be read or parsed
    /// is logged and also yields defaults; an explicit `--config` goes
    /// through [`BridgeConfig::load`] instead, which fails hard.
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        match Self::load(&config_path) {
            Ok(config) => Ok(config),
            Err(e @ (ConfigError::Read { .. } | ConfigError::Parse { .. })) => {
                tracing::warn!("{}, using defaults", e);
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Check values serde can't: loopback-only listener, a usable buffer,
    /// a namespace that fits in one path segment, valid view names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.listener.address.is_loopback() {
            return Err(ConfigError::NotLoopback(self.listener.address));
        }
        if self.request.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections);
        }

        let namespace = self.routes.namespace.trim_matches('/');
        if namespace.is_empty() || namespace.contains('/') {
            return Err(ConfigError::InvalidNamespace(self.routes.namespace.clone()));
        }

        if self.routes.policy == PolicyKind::Fixed {
            ViewName::parse(&self.routes.fixed_view, self.routes.max_name_len)?;
        }
        for view in self.routes.allowed_views.iter().flatten() {
            ViewName::parse(view, self.routes.max_name_len)?;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listener.address, self.listener.port)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        match self.request.read_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn route_table(&self) -> Result<RouteTable, ConfigError> {
        let routes = &self.routes;
        let policy = match routes.policy {
            PolicyKind::Parametrized => DispatchPolicy::Parametrized {
                max_name_len: routes.max_name_len,
            },
            PolicyKind::Fixed => DispatchPolicy::Fixed {
                view: ViewName::parse(&routes.fixed_view, routes.max_name_len)?,
            },
        };

        let table = RouteTable::new(&routes.namespace, policy);
        Ok(match &routes.allowed_views {
            Some(views) => table.with_allowed_views(views.iter().cloned()),
            None => table,
        })
    }

    pub fn pipeline(&self) -> Result<Pipeline, ConfigError> {
        Ok(Pipeline::new(
            self.route_table()?,
            self.response.format,
            self.request.buffer_size,
        ))
    }

    pub fn server_settings(&self) -> Result<ServerSettings, ConfigError> {
        Ok(ServerSettings {
            addr: self.listen_addr(),
            backlog: self.listener.backlog,
            read_timeout: self.read_timeout(),
            mode: self.server.mode,
            max_connections: self.server.max_connections,
            pipeline: self.pipeline()?,
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let restart = match self.worker.restart {
            RestartKind::Never => RestartPolicy::Never,
            RestartKind::OnFailure => RestartPolicy::OnFailure {
                delay: Duration::from_millis(self.worker.restart_delay_ms),
            },
        };
        WorkerConfig {
            name: self.worker.name.clone(),
            restart,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgscale_core::router::{Outcome, QueryId};
    use tempfile::tempdir;

    fn parse(toml_src: &str) -> BridgeConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:1137".parse().unwrap());
        assert_eq!(config.listener.backlog, 10);
        assert_eq!(config.request.buffer_size, 1024);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.routes.namespace, "pgstat");
        assert_eq!(config.routes.policy, PolicyKind::Parametrized);
        assert_eq!(config.response.format, BodyFormat::Legacy);
        assert_eq!(config.server.mode, ServeMode::Sequential);
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.worker_config(), WorkerConfig::default());
        assert!(config.database.is_in_memory());
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_file_matches_defaults() {
        let config = parse("");
        assert_eq!(config.listener.port, 1137);
        assert_eq!(config.routes.fixed_view, "pgscale_tables");
        assert!(config.routes.allowed_views.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
            [listener]
            address = "::1"
            port = 8137

            [request]
            buffer_size = 512
            read_timeout_ms = 0

            [routes]
            namespace = "/stats/"
            allowed_views = ["connections"]

            [response]
            format = "json"

            [server]
            mode = "per_connection"
            max_connections = 4

            [worker]
            name = "stats_worker"
            restart = "on_failure"
            restart_delay_ms = 250

            [database]
            path = "stats.duckdb"
            read_only = true
            "#,
        );
        config.validate().unwrap();

        assert_eq!(config.listen_addr(), "[::1]:8137".parse().unwrap());
        assert_eq!(config.read_timeout(), None);
        assert_eq!(config.response.format, BodyFormat::Json);
        assert_eq!(config.server.mode, ServeMode::PerConnection);
        assert_eq!(
            config.worker_config(),
            WorkerConfig {
                name: "stats_worker".to_string(),
                restart: RestartPolicy::OnFailure {
                    delay: Duration::from_millis(250)
                },
            }
        );
        assert!(!config.database.is_in_memory());
        assert!(config.database.read_only);

        let routes = config.route_table().unwrap();
        assert_eq!(routes.prefix(), "/stats/");
        assert!(matches!(
            routes.route("GET", "/stats/connections"),
            Outcome::Dispatch(_)
        ));
        assert_eq!(routes.route("GET", "/stats/locks"), Outcome::NotFound);

        let settings = config.server_settings().unwrap();
        assert_eq!(settings.pipeline.buffer_size(), 512);
        assert_eq!(settings.max_connections, 4);
    }

    #[test]
    fn test_fixed_policy() {
        let config = parse(
            r#"
            [routes]
            policy = "fixed"
            fixed_view = "connections"
            "#,
        );
        let routes = config.route_table().unwrap();
        let expected = QueryId::new(ViewName::parse("connections", 40).unwrap());
        assert_eq!(
            routes.route("GET", "/pgstat/anything/at/all"),
            Outcome::Dispatch(expected)
        );
    }

    #[test]
    fn test_rejects_non_loopback() {
        let config = parse("[listener]\naddress = \"0.0.0.0\"");
        assert!(matches!(config.validate(), Err(ConfigError::NotLoopback(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = parse("[request]\nbuffer_size = 0");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBufferSize)
        ));

        let config = parse("[server]\nmax_connections = 0");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMaxConnections)
        ));

        let config = parse("[routes]\nnamespace = \"a/b\"");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNamespace(_))
        ));

        let config = parse("[routes]\npolicy = \"fixed\"\nfixed_view = \"pg_stat; drop\"");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidView(_))));

        let config = parse("[routes]\nallowed_views = [\"\"]");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidView(RouteRejection::EmptyName))
        ));
    }

    #[test]
    fn test_unknown_enum_value_fails_to_parse() {
        let result: Result<BridgeConfig, _> = toml::from_str("[server]\nmode = \"threaded\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_and_discover() {
        let dir = tempdir().unwrap();

        // No file: defaults.
        let config = BridgeConfig::discover(dir.path()).unwrap();
        assert_eq!(config.listener.port, 1137);

        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[listener]\nport = 4000\n").unwrap();
        assert_eq!(BridgeConfig::load(&path).unwrap().listener.port, 4000);
        assert_eq!(BridgeConfig::discover(dir.path()).unwrap().listener.port, 4000);

        // Broken file: explicit load fails, discovery falls back.
        std::fs::write(&path, "[listener\nport = ").unwrap();
        assert!(matches!(
            BridgeConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert_eq!(BridgeConfig::discover(dir.path()).unwrap().listener.port, 1137);

        // Invalid values are never silently replaced.
        std::fs::write(&path, "[listener]\naddress = \"10.0.0.1\"\n").unwrap();
        assert!(BridgeConfig::discover(dir.path()).is_err());

        assert!(matches!(
            BridgeConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
