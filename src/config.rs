//! Service configuration
//!
//! Defaults, then `ROUTE_VIZ_*` environment variables, then command-line
//! flags. The optimizer credential itself is never stored here; only the name
//! of the variable it is read from at call time.

use crate::error::ConfigError;
use crate::optimizer::GenerativeSettings;
use crate::playback::TICK_INTERVAL;
use crate::scenario::{validate_node_count, DEFAULT_NODE_COUNT};
use std::time::Duration;

const ENV_PREFIX: &str = "ROUTE_VIZ_";

pub const USAGE: &str = "\
Usage: route_viz_server [options]

Options:
  --bind <addr>            Listen address (default 127.0.0.1:3000)
  --endpoint <url>         Generative API base URL
  --model <name>           Model name
  --api-key-env <var>      Environment variable holding the API key (default API_KEY)
  --tick-ms <ms>           Playback tick interval in milliseconds (default 2000)
  --timeout-secs <s>       Optimize request timeout (default 60)
  --rate <n>               Optimize requests per minute per session (default 10)
  --nodes <n>              Default random node count (3-30, default 10)
  --idle-secs <s>          Close sessions idle this long (default 1800)
  --max-sessions <n>       Live session cap (default 256)
  --session-rate <n>       New sessions per minute per client (default 30)
  --json-logs              Emit logs as JSON
  --help                   Print this message";

/// Runtime configuration of the server.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub endpoint: String,
    pub model: String,
    pub tick_interval: Duration,
    pub request_timeout: Duration,
    pub optimize_per_minute: u32,
    pub default_node_count: usize,
    /// Sessions with no requests and no event stream for this long are closed
    pub session_idle_timeout: Duration,
    pub max_sessions: usize,
    pub sessions_per_minute: u32,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            api_key_env: "API_KEY".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            tick_interval: TICK_INTERVAL,
            request_timeout: Duration::from_secs(60),
            optimize_per_minute: 10,
            default_node_count: DEFAULT_NODE_COUNT,
            session_idle_timeout: Duration::from_secs(30 * 60),
            max_sessions: 256,
            sessions_per_minute: 30,
            log_json: false,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum CliAction {
    Run(AppConfig),
    Help,
}

impl AppConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each
    /// `ROUTE_VIZ_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for key in [
            "BIND",
            "ENDPOINT",
            "MODEL",
            "API_KEY_ENV",
            "TICK_MS",
            "TIMEOUT_SECS",
            "RATE",
            "NODES",
            "IDLE_SECS",
            "MAX_SESSIONS",
            "SESSION_RATE",
            "JSON_LOGS",
        ] {
            let full = format!("{}{}", ENV_PREFIX, key);
            if let Some(value) = lookup(&full).filter(|v| !v.trim().is_empty()) {
                config.set(&full, key, value.trim())?;
            }
        }
        Ok(config)
    }

    /// Apply `--flag value` overrides. `args` excludes the program name.
    pub fn apply_args(mut self, args: &[String]) -> Result<CliAction, ConfigError> {
        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let key = match flag {
                "--help" | "-h" => return Ok(CliAction::Help),
                "--json-logs" => {
                    self.log_json = true;
                    i += 1;
                    continue;
                }
                "--bind" => "BIND",
                "--endpoint" => "ENDPOINT",
                "--model" => "MODEL",
                "--api-key-env" => "API_KEY_ENV",
                "--tick-ms" => "TICK_MS",
                "--timeout-secs" => "TIMEOUT_SECS",
                "--rate" => "RATE",
                "--nodes" => "NODES",
                "--idle-secs" => "IDLE_SECS",
                "--max-sessions" => "MAX_SESSIONS",
                "--session-rate" => "SESSION_RATE",
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            };
            let value = args
                .get(i + 1)
                .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))?;
            self.set(flag, key, value)?;
            i += 2;
        }
        Ok(CliAction::Run(self))
    }

    fn set(&mut self, name: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: name.to_string(),
            value: value.to_string(),
        };
        match key {
            "BIND" => self.bind_addr = value.to_string(),
            "ENDPOINT" => self.endpoint = value.trim_end_matches('/').to_string(),
            "MODEL" => self.model = value.to_string(),
            "API_KEY_ENV" => self.api_key_env = value.to_string(),
            "TICK_MS" => {
                let ms: u64 = value.parse().map_err(|_| invalid())?;
                if ms == 0 {
                    return Err(invalid());
                }
                self.tick_interval = Duration::from_millis(ms);
            }
            "TIMEOUT_SECS" => {
                let secs: u64 = value.parse().map_err(|_| invalid())?;
                self.request_timeout = Duration::from_secs(secs.max(1));
            }
            "RATE" => {
                let rate: u32 = value.parse().map_err(|_| invalid())?;
                if rate == 0 {
                    return Err(invalid());
                }
                self.optimize_per_minute = rate;
            }
            "NODES" => {
                let n: usize = value.parse().map_err(|_| invalid())?;
                self.default_node_count = validate_node_count(n).map_err(|_| invalid())?;
            }
            "IDLE_SECS" => {
                let secs: u64 = value.parse().map_err(|_| invalid())?;
                if secs == 0 {
                    return Err(invalid());
                }
                self.session_idle_timeout = Duration::from_secs(secs);
            }
            "MAX_SESSIONS" => {
                let max: usize = value.parse().map_err(|_| invalid())?;
                if max == 0 {
                    return Err(invalid());
                }
                self.max_sessions = max;
            }
            "SESSION_RATE" => {
                let rate: u32 = value.parse().map_err(|_| invalid())?;
                if rate == 0 {
                    return Err(invalid());
                }
                self.sessions_per_minute = rate;
            }
            "JSON_LOGS" => {
                self.log_json = match value {
                    "1" | "true" | "yes" => true,
                    "0" | "false" | "no" => false,
                    _ => return Err(invalid()),
                }
            }
            _ => return Err(ConfigError::UnknownArgument(name.to_string())),
        }
        Ok(())
    }

    pub fn generative_settings(&self) -> GenerativeSettings {
        GenerativeSettings {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            api_key_env: self.api_key_env.clone(),
        }
    }
}
