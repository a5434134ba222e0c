//! Service configuration
//!
//! Read once at startup from an optional file named by `AUTOSCALER_CONFIG`,
//! then from `AUTOSCALER_*` environment variables with `__` separating
//! nested keys, e.g. `AUTOSCALER_SCALING__MAX_WORKERS=4`.

use anyhow::{bail, Context, Result};
use autoscaler_lib::control::DEFAULT_CHECK_INTERVAL;
use autoscaler_lib::sources::aci::{AciConfig, WorkerTemplate};
use autoscaler_lib::sources::upstash::DEFAULT_QUEUE_KEY_PREFIX;
use autoscaler_lib::ScalingConfig;
use serde::Deserialize;
use tracing::debug;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "AUTOSCALER_CONFIG";

const DEFAULT_WORKER_ENV: &str = "REDIS_HOST,REDIS_USE_SSL,INTERVAL,COUNT,RAILS_ENV,\
MAX_QUEUE_SIZE,CPU_TIME_LIMIT,MAX_CPU_TIME_LIMIT,CPU_EXTRA_TIME,MAX_CPU_EXTRA_TIME,\
WALL_TIME_LIMIT,MAX_WALL_TIME_LIMIT,MEMORY_LIMIT,MAX_MEMORY_LIMIT,STACK_LIMIT,\
MAX_STACK_LIMIT,MAX_PROCESSES_AND_OR_THREADS,MAX_MAX_PROCESSES_AND_OR_THREADS,\
ENABLE_PER_PROCESS_AND_THREAD_TIME_LIMIT,ALLOW_ENABLE_PER_PROCESS_AND_THREAD_TIME_LIMIT";

/// Values sent to workers when the variable is unset or empty
const WORKER_ENV_FALLBACKS: &[(&str, &str)] = &[
    ("REDIS_USE_SSL", "false"),
    ("INTERVAL", "1"),
    ("MAX_QUEUE_SIZE", "100"),
    ("RAILS_ENV", "production"),
];

const DEFAULT_WORKER_SECURE_ENV: &str =
    "DATABASE_URL,REDIS_URL,SECRET_KEY_BASE,AUTHN_TOKEN,AUTHZ_TOKEN";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process simulated pool, for local runs
    #[default]
    Memory,
    /// Azure Container Instances with Upstash Redis and PostgreSQL telemetry
    Azure,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Azure => "azure",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP port for status, trigger, health and metrics
    #[serde(default = "default_port")]
    pub port: u16,

    /// Period of timer-driven checks; 0 disables the timer
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Name prefix of the worker container groups
    #[serde(default = "default_pool")]
    pub pool: String,

    /// Job queue whose depth drives scaling
    #[serde(default = "default_queue")]
    pub queue: String,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub scaling: ScalingConfig,

    pub redis: Option<RedisConfig>,

    pub database: Option<DatabaseConfig>,

    pub azure: Option<AciConfig>,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub memory: MemoryBackendConfig,
}

fn default_port() -> u16 {
    8080
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL.as_secs()
}

fn default_pool() -> String {
    "judge0-worker".to_string()
}

fn default_queue() -> String {
    "1.13.1".to_string()
}

/// Upstash Redis REST endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub token: String,
    #[serde(default = "default_queue_key_prefix")]
    pub queue_key_prefix: String,
}

fn default_queue_key_prefix() -> String {
    DEFAULT_QUEUE_KEY_PREFIX.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_acquire_timeout() -> u64 {
    10
}

/// Definition of newly created workers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub location: String,
    pub image: String,
    pub cpu: f64,
    pub memory_gb: f64,
    pub restart_policy: String,
    pub environment: String,
    /// Comma separated variable names copied from this process into workers
    pub env_passthrough: String,
    /// Same, passed as secure values
    pub secure_env_passthrough: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let template = WorkerTemplate::default();
        Self {
            location: template.location,
            image: template.image,
            cpu: template.cpu,
            memory_gb: template.memory_gb,
            restart_policy: template.restart_policy,
            environment: template.environment,
            env_passthrough: DEFAULT_WORKER_ENV.to_string(),
            secure_env_passthrough: DEFAULT_WORKER_SECURE_ENV.to_string(),
        }
    }
}

impl WorkerSettings {
    /// Build the worker template, resolving pass-through variables with `lookup`
    pub fn template(&self, lookup: impl Fn(&str) -> Option<String>) -> WorkerTemplate {
        WorkerTemplate {
            location: self.location.clone(),
            image: self.image.clone(),
            cpu: self.cpu,
            memory_gb: self.memory_gb,
            restart_policy: self.restart_policy.clone(),
            environment: self.environment.clone(),
            env: resolve(&self.env_passthrough, &lookup),
            secure_env: resolve(&self.secure_env_passthrough, &lookup),
            ..WorkerTemplate::default()
        }
    }
}

fn resolve(names: &str, lookup: &impl Fn(&str) -> Option<String>) -> Vec<(String, String)> {
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| {
            let value = lookup(name)
                .filter(|v| !v.is_empty())
                .or_else(|| fallback(name));
            match value {
                Some(value) => Some((name.to_string(), value)),
                None => {
                    debug!(variable = %name, "Worker variable not set, skipping");
                    None
                }
            }
        })
        .collect()
}

fn fallback(name: &str) -> Option<String> {
    WORKER_ENV_FALLBACKS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Seed of the in-process pool
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryBackendConfig {
    pub running_workers: u32,
    pub stopped_workers: u32,
    pub queue_depth: u64,
    pub backlog: u64,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            running_workers: 0,
            stopped_workers: 2,
            queue_depth: 0,
            backlog: 0,
        }
    }
}

impl AppConfig {
    /// Load configuration from the optional file and the environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("AUTOSCALER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        app.validate()?;
        Ok(app)
    }

    /// Check scaling invariants and that the selected backend is configured
    pub fn validate(&self) -> Result<()> {
        self.scaling.validate()?;

        if self.pool.is_empty() {
            bail!("pool name must not be empty");
        }

        if self.backend == Backend::Azure {
            if self.azure.is_none() {
                bail!("azure backend selected but [azure] settings are missing");
            }
            if self.redis.is_none() {
                bail!("azure backend selected but [redis] settings are missing");
            }
            if self.database.is_none() {
                bail!("azure backend selected but [database] settings are missing");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_json(json: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let app = from_json("{}");
        assert_eq!(app.port, 8080);
        assert_eq!(app.check_interval_secs, 15);
        assert_eq!(app.pool, "judge0-worker");
        assert_eq!(app.backend, Backend::Memory);
        assert_eq!(app.scaling, ScalingConfig::default());
        assert!(app.validate().is_ok());
    }

    #[test]
    fn test_nested_scaling_overrides() {
        let app = from_json(r#"{"scaling": {"min_workers": 1, "max_workers": 4}}"#);
        assert_eq!(app.scaling.min_workers, 1);
        assert_eq!(app.scaling.max_workers, 4);
        assert_eq!(app.scaling.scale_up_threshold, 5);
    }

    #[test]
    fn test_invalid_bounds_fail_validation() {
        let app = from_json(r#"{"scaling": {"min_workers": 5, "max_workers": 2}}"#);
        assert!(app.validate().is_err());
    }

    #[test]
    fn test_azure_backend_requires_settings() {
        let app = from_json(r#"{"backend": "azure"}"#);
        let err = app.validate().unwrap_err();
        assert!(err.to_string().contains("azure"));
    }

    #[test]
    fn test_worker_template_resolves_passthrough() {
        let settings = WorkerSettings {
            env_passthrough: "REDIS_HOST, UNSET_VAR,".to_string(),
            secure_env_passthrough: "DATABASE_URL".to_string(),
            ..Default::default()
        };
        let template = settings.template(|name| match name {
            "REDIS_HOST" => Some("redis.internal".to_string()),
            "DATABASE_URL" => Some("postgres://judge0".to_string()),
            _ => None,
        });

        assert_eq!(
            template.env,
            vec![("REDIS_HOST".to_string(), "redis.internal".to_string())]
        );
        assert_eq!(template.secure_env.len(), 1);
        assert_eq!(template.command, vec!["./scripts/workers".to_string()]);
    }

    #[test]
    fn test_default_worker_env_applies_fallbacks() {
        let template = WorkerSettings::default().template(|name| match name {
            "REDIS_HOST" => Some("redis.internal".to_string()),
            "RAILS_ENV" => Some("staging".to_string()),
            "MAX_QUEUE_SIZE" => Some(String::new()),
            "ENABLE_PER_PROCESS_AND_THREAD_TIME_LIMIT" => Some("true".to_string()),
            _ => None,
        });

        let value = |name: &str| {
            template
                .env
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        assert_eq!(value("REDIS_HOST"), Some("redis.internal"));
        assert_eq!(value("RAILS_ENV"), Some("staging"));
        assert_eq!(value("REDIS_USE_SSL"), Some("false"));
        assert_eq!(value("INTERVAL"), Some("1"));
        assert_eq!(value("MAX_QUEUE_SIZE"), Some("100"));
        assert_eq!(value("ENABLE_PER_PROCESS_AND_THREAD_TIME_LIMIT"), Some("true"));
        assert_eq!(value("COUNT"), None);
        assert_eq!(value("CPU_TIME_LIMIT"), None);
        assert!(template.secure_env.is_empty());
    }
}
