//! Layered configuration
//!
//! Sources, lowest precedence first: built-in defaults, the YAML file named
//! by `--config`, `FLEETDECK_`-prefixed environment variables (sections
//! split on `__`, e.g. `FLEETDECK_KUBERNETES__DELETE_TIMEOUT_SECS`), then
//! command line flags.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use fleetdeck_kube::{LifecycleSettings, ToolConfig};
use fleetdeck_repo::{DEFAULT_PER_PAGE, DEFAULT_RELEASES_URL, DEFAULT_TTL_HOURS};

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "fleetdeck")]
#[command(version)]
#[command(about = "Deploy, observe and remove isolated n8n versions on Kubernetes", long_about = None)]
pub struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "./config.yaml", help = "Path to configuration file")]
    pub config: PathBuf,

    #[arg(long, env = "HOST", help = "Server bind address")]
    pub host: Option<String>,

    #[arg(long, env = "PORT", help = "Server bind port")]
    pub port: Option<u16>,

    #[arg(long, env = "LOG_LEVEL", help = "Log level: trace, debug, info, warn, error")]
    pub log_level: Option<String>,

    #[arg(long, env = "LOG_FORMAT", help = "Log format: text or json")]
    pub log_format: Option<LogFormat>,

    #[arg(long, env = "SYSTEM_NAMESPACE", help = "Namespace holding redis and backup storage")]
    pub system_namespace: Option<String>,

    #[arg(long, env = "WORKDIR", help = "Working directory of the deploy scripts")]
    pub workdir: Option<PathBuf>,

    #[arg(long, env = "VERSION_CACHE_FILE", help = "Where the version cache is persisted")]
    pub cache_file: Option<PathBuf>,
}

fn remove_nulls(value: serde_json::Value) -> serde_json::Value {
    use serde_json::{Map, Value};

    match value {
        Value::Object(map) => {
            let filtered: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| {
                    let cleaned = remove_nulls(v);
                    match &cleaned {
                        Value::Null => None,
                        Value::Object(obj) if obj.is_empty() => None,
                        _ => Some((k, cleaned)),
                    }
                })
                .collect();
            Value::Object(filtered)
        }
        other => other,
    }
}

impl Cli {
    fn to_figment_map(&self) -> serde_json::Value {
        use serde_json::json;

        let value = json!({
            "server": {
                "host": self.host,
                "port": self.port,
                "log_level": self.log_level,
                "log_format": self.log_format,
            },
            "kubernetes": {
                "system_namespace": self.system_namespace,
            },
            "tools": {
                "workdir": self.workdir,
            },
            "versions": {
                "cache_file": self.cache_file,
            }
        });

        remove_nulls(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_system_namespace")]
    pub system_namespace: String,

    /// Label selector of deployment namespaces
    #[serde(default = "default_deployment_selector")]
    pub deployment_selector: String,

    #[serde(default = "default_config_map")]
    pub config_map: String,

    #[serde(default = "default_delete_timeout_secs")]
    pub delete_timeout_secs: u64,

    #[serde(default = "default_delete_poll_interval_ms")]
    pub delete_poll_interval_ms: u64,

    #[serde(default = "default_watch_timeout_secs")]
    pub watch_timeout_secs: u32,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    #[serde(default = "default_helm")]
    pub helm: String,

    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,

    #[serde(default = "default_uninstall_timeout_secs")]
    pub uninstall_timeout_secs: u64,

    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,

    #[serde(default = "default_snapshot_timeout_secs")]
    pub snapshot_timeout_secs: u64,

    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionsConfig {
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Unset keeps the cache in memory only
    #[serde(default = "default_cache_file")]
    pub cache_file: Option<PathBuf>,

    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub versions: VersionsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_system_namespace() -> String {
    "n8n-system".to_string()
}

fn default_deployment_selector() -> String {
    "app=n8n".to_string()
}

fn default_config_map() -> String {
    "n8n-config".to_string()
}

fn default_delete_timeout_secs() -> u64 {
    60
}

fn default_delete_poll_interval_ms() -> u64 {
    1000
}

fn default_watch_timeout_secs() -> u32 {
    290
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_workdir() -> PathBuf {
    PathBuf::from("/workspace")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("/workspace/scripts")
}

fn default_helm() -> String {
    "helm".to_string()
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_deploy_timeout_secs() -> u64 {
    120
}

fn default_uninstall_timeout_secs() -> u64 {
    60
}

fn default_list_timeout_secs() -> u64 {
    30
}

fn default_snapshot_timeout_secs() -> u64 {
    300
}

fn default_query_timeout_secs() -> u64 {
    5
}

fn default_feed_url() -> String {
    DEFAULT_RELEASES_URL.to_string()
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

fn default_cache_file() -> Option<PathBuf> {
    Some(PathBuf::from("/app/cache/versions.json"))
}

fn default_ttl_hours() -> i64 {
    DEFAULT_TTL_HOURS
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            system_namespace: default_system_namespace(),
            deployment_selector: default_deployment_selector(),
            config_map: default_config_map(),
            delete_timeout_secs: default_delete_timeout_secs(),
            delete_poll_interval_ms: default_delete_poll_interval_ms(),
            watch_timeout_secs: default_watch_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            scripts_dir: default_scripts_dir(),
            helm: default_helm(),
            kubectl: default_kubectl(),
            deploy_timeout_secs: default_deploy_timeout_secs(),
            uninstall_timeout_secs: default_uninstall_timeout_secs(),
            list_timeout_secs: default_list_timeout_secs(),
            snapshot_timeout_secs: default_snapshot_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl Default for VersionsConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            per_page: default_per_page(),
            cache_file: default_cache_file(),
            ttl_hours: default_ttl_hours(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load from the process arguments and environment
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(&Cli::parse())
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, figment::Error> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        if cli.config.exists() {
            figment = figment.merge(Yaml::file(&cli.config));
        }

        figment = figment
            .merge(Env::prefixed("FLEETDECK_").split("__"))
            .merge(Serialized::defaults(cli.to_figment_map()));

        figment.extract()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn tool_config(&self) -> ToolConfig {
        let tools = &self.tools;
        ToolConfig {
            workdir: tools.workdir.clone(),
            scripts_dir: tools.scripts_dir.clone(),
            helm: tools.helm.clone(),
            kubectl: tools.kubectl.clone(),
            deploy_timeout: Duration::from_secs(tools.deploy_timeout_secs),
            uninstall_timeout: Duration::from_secs(tools.uninstall_timeout_secs),
            list_timeout: Duration::from_secs(tools.list_timeout_secs),
            snapshot_timeout: Duration::from_secs(tools.snapshot_timeout_secs),
            query_timeout: Duration::from_secs(tools.query_timeout_secs),
        }
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        let kube = &self.kubernetes;
        LifecycleSettings {
            deployment_selector: kube.deployment_selector.clone(),
            config_map: kube.config_map.clone(),
            delete_timeout: Duration::from_secs(kube.delete_timeout_secs),
            poll_interval: Duration::from_millis(kube.delete_poll_interval_ms),
            watch_timeout_secs: kube.watch_timeout_secs,
            heartbeat: Duration::from_secs(kube.heartbeat_secs),
        }
    }

    pub fn version_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.versions.ttl_hours)
    }
}
