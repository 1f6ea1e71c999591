//! Process configuration
//!
//! Loaded from the environment (after `.env` via dotenvy) and stored once per
//! process. Invalid values fall back to defaults with a warning.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use tracing::warn;

use crate::security::middleware::PipelineMode;
use crate::security::policy::PolicyLimits;
use crate::security::validator::ValidatorConfig;

/// Runtime configuration of the execution service
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory under which per-job workspaces are created
    pub workspace_root: PathBuf,
    /// Which pipeline stages wrap the orchestrator
    pub pipeline: PipelineMode,
    /// Shell used to run synthesized commands (None: bash if present, else sh)
    pub shell: Option<String>,
    /// Per-stream capture cap in bytes
    pub output_limit_bytes: usize,
    /// Apply the policy memory ceiling as RLIMIT_AS
    pub rlimit_memory: bool,
    /// Size of the in-memory event history
    pub history_max_events: usize,
    /// Override for the embedded language table
    pub languages_path: Option<PathBuf>,
    pub validator: ValidatorConfig,
    pub policy: PolicyLimits,
    /// JSONL audit log location
    pub audit_path: PathBuf,
    pub redis_url: String,
    /// Number of jobs the worker runs at once
    pub worker_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: env::temp_dir(),
            pipeline: PipelineMode::Secure,
            shell: None,
            output_limit_bytes: 1024 * 1024,
            rlimit_memory: false,
            history_max_events: 20,
            languages_path: None,
            validator: ValidatorConfig::default(),
            policy: PolicyLimits::default(),
            audit_path: env::temp_dir().join("polyexec_audit.jsonl"),
            redis_url: "redis://localhost:6379".into(),
            worker_concurrency: 4,
        }
    }
}

impl Config {
    /// Build configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let validator = ValidatorConfig {
            max_code_bytes: env_parse("SEC_MAX_CODE_BYTES", defaults.validator.max_code_bytes),
            max_lines: env_parse("SEC_MAX_LINES", defaults.validator.max_lines),
            max_blocks: env_parse("SEC_MAX_BLOCKS", defaults.validator.max_blocks),
            allow_network: env_flag("SEC_ALLOW_NET", defaults.validator.allow_network),
            language_whitelist: env::var("SEC_LANG_WHITELIST")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
        };

        let policy = PolicyLimits::new(
            defaults.policy.min_timeout_secs,
            env_parse("SEC_MAX_TIMEOUT", defaults.policy.max_timeout_secs),
            defaults.policy.min_memory_mb,
            env_parse("SEC_MAX_MEMORY_MB", defaults.policy.max_memory_mb),
        )
        .with_max_processes(env_parse("SEC_MAX_PROCESSES", defaults.policy.max_processes))
        .with_max_open_files(env_parse("SEC_MAX_OPEN_FILES", defaults.policy.max_open_files));

        Self {
            workspace_root: env::var("EXEC_WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            pipeline: env_parse("EXEC_PIPELINE", defaults.pipeline),
            shell: env::var("EXEC_SHELL").ok().filter(|s| !s.trim().is_empty()),
            output_limit_bytes: env_parse("EXEC_OUTPUT_LIMIT_BYTES", defaults.output_limit_bytes),
            rlimit_memory: env_flag("EXEC_RLIMIT_MEMORY", defaults.rlimit_memory),
            history_max_events: env_parse("EXEC_HISTORY_MAX_EVENTS", defaults.history_max_events),
            languages_path: env::var("LANGUAGES_CONFIG").ok().map(PathBuf::from),
            validator,
            policy,
            audit_path: env::var("SEC_AUDIT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.audit_path),
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            worker_concurrency: env_parse("WORKER_CONCURRENCY", defaults.worker_concurrency)
                .max(1),
        }
    }
}

pub(crate) fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid value for {}: {:?}, using default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => parse_flag(&raw),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Split a comma separated list, lower-casing and dropping empty entries
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Global configuration
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Install the process-wide configuration
pub fn init_config(config: Config) -> anyhow::Result<()> {
    CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!("Configuration already initialized"))?;

    Ok(())
}

/// Get the process-wide configuration
pub fn get_config() -> &'static Config {
    CONFIG.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<Config> = OnceLock::new();

        warn!("Configuration not initialized, using default");
        DEFAULT.get_or_init(Config::default)
    })
}
