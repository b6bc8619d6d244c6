//! Configuration management for citizen-shell.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::session::{Handshake, RebootPolicy};
use crate::shell::Policy;
use crate::transport::default_shell;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell defaults.
    pub shell: ShellSection,
    /// Login handshake for character-stream connections.
    pub connection: ConnectionSection,
    /// Reboot-and-reconnect timing.
    pub reboot: RebootSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Shell configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    /// Program interpreting commands.
    pub program: String,
    /// Fail on a non-zero exit code.
    pub check_xc: bool,
    /// Fail on any stderr output.
    pub check_err: bool,
    /// Drain all output before returning.
    pub wait: bool,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            program: default_shell().to_string(),
            check_xc: false,
            check_err: false,
            wait: true,
        }
    }
}

/// Connection configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub username: Option<String>,
    pub password: Option<String>,
    pub login_prompt: String,
    pub password_prompt: String,
    pub ready_prompt: Option<String>,
    pub logout_command: Option<String>,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            login_prompt: "login: ".to_string(),
            password_prompt: "Password: ".to_string(),
            ready_prompt: None,
            logout_command: Some("exit".to_string()),
        }
    }
}

/// Reboot configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebootSection {
    pub command: String,
    pub disconnect_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RebootSection {
    fn default() -> Self {
        Self {
            command: "reboot".to_string(),
            disconnect_delay_ms: 1000,
            poll_interval_ms: 1000,
            timeout_secs: 60,
        }
    }
}

/// The binary prints command output itself, so traffic channels stay quiet.
const DEFAULT_LEVEL: &str = "citizen_shell=warn,citizen_shell::err=off";

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level or filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(program) = var("CITIZEN_SHELL_PROGRAM") {
            if !program.is_empty() {
                self.shell.program = program;
            }
        }

        if let Some(flag) = var("CITIZEN_SHELL_CHECK_XC").as_deref().and_then(parse_flag) {
            self.shell.check_xc = flag;
        }

        if let Some(flag) = var("CITIZEN_SHELL_CHECK_ERR").as_deref().and_then(parse_flag) {
            self.shell.check_err = flag;
        }

        if let Some(level) = var("CITIZEN_SHELL_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if args.check_xc {
            self.shell.check_xc = true;
        }

        if args.check_err {
            self.shell.check_err = true;
        }

        if args.stream {
            self.shell.wait = false;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Config::default();

        // Load from config file if specified
        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        // Apply environment variable overrides
        config.apply_env();

        // Apply CLI argument overrides (highest priority)
        config.apply_args(args);

        Ok(config)
    }

    /// Default checking policy for shells.
    pub fn policy(&self) -> Policy {
        Policy {
            check_xc: self.shell.check_xc,
            check_err: self.shell.check_err,
            wait: self.shell.wait,
        }
    }

    /// Handshake for character-stream connections. Prompts are only
    /// waited for when the matching credential is configured.
    pub fn handshake(&self) -> Handshake {
        let c = &self.connection;
        Handshake {
            username: c.username.clone(),
            password: c.password.clone(),
            login_prompt: c.username.as_ref().map(|_| c.login_prompt.clone()),
            password_prompt: c.password.as_ref().map(|_| c.password_prompt.clone()),
            ready_prompt: c.ready_prompt.clone(),
            logout_command: c.logout_command.clone(),
        }
    }

    pub fn reboot_policy(&self) -> RebootPolicy {
        RebootPolicy {
            command: self.reboot.command.clone(),
            disconnect_delay: Duration::from_millis(self.reboot.disconnect_delay_ms),
            poll_interval: Duration::from_millis(self.reboot.poll_interval_ms),
            timeout: Duration::from_secs(self.reboot.timeout_secs),
        }
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
