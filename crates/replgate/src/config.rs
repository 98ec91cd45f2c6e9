//! Layered configuration: built-in defaults, a TOML file, then `REPLGATE__*` env vars.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::interpreter::{CODE_PLACEHOLDER, SENTINEL_PLACEHOLDER};

pub const APP_NAME: &str = "replgate";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub interpreter: InterpreterConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.interpreter
            .validate()
            .context("invalid [interpreter] section")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// How to start and drive the interpreter behind every session.
///
/// The interpreter must read commands line by line from stdin. `stdout_marker` and
/// `stderr_marker` are single-line commands in the interpreter's own language that print
/// `{sentinel}` on the respective stream and flush it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Interpreter binary, looked up in PATH
    pub program: String,
    /// Arguments that put the interpreter in interactive, unbuffered mode
    pub args: Vec<String>,
    /// Code run once during the startup handshake (e.g. to silence prompts)
    pub prelude: String,
    /// Single-line command that runs `{code}` as one unit. Empty sends code verbatim.
    pub code_template: String,
    /// Command printing the sentinel on stdout
    pub stdout_marker: String,
    /// Command printing the sentinel on stderr
    pub stderr_marker: String,
    /// Working directory for new interpreters. Supports ~ and environment variables.
    pub working_dir: Option<String>,
    /// Deadline for a single execution, in milliseconds
    pub execution_timeout_ms: u64,
    /// Deadline for the startup handshake, in milliseconds
    pub startup_timeout_ms: u64,
    /// Extra environment variables for new interpreters
    pub env: HashMap<String, String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self::python()
    }
}

impl InterpreterConfig {
    /// `python3` in quiet, interactive, unbuffered mode with the prompts switched off.
    pub fn python() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-q".to_string(), "-i".to_string(), "-u".to_string()],
            prelude: "__import__('sys').ps1 = ''; __import__('sys').ps2 = ''".to_string(),
            code_template: "exec(compile({code}, '<stdin>', 'exec'))".to_string(),
            stdout_marker: "print('{sentinel}', flush=True)".to_string(),
            stderr_marker: "print('{sentinel}', file=__import__('sys').stderr, flush=True)"
                .to_string(),
            working_dir: None,
            execution_timeout_ms: 2_000,
            startup_timeout_ms: 10_000,
            env: HashMap::new(),
        }
    }

    /// A POSIX shell reading commands from stdin.
    pub fn posix_shell() -> Self {
        Self {
            program: "sh".to_string(),
            args: Vec::new(),
            prelude: String::new(),
            code_template: String::new(),
            stdout_marker: "echo '{sentinel}'".to_string(),
            stderr_marker: "echo '{sentinel}' >&2".to_string(),
            working_dir: None,
            execution_timeout_ms: 2_000,
            startup_timeout_ms: 10_000,
            env: HashMap::new(),
        }
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn working_dir(&self) -> Result<Option<PathBuf>> {
        self.working_dir
            .as_deref()
            .map(expand_str_path)
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(anyhow!("program must not be empty"));
        }
        if self.execution_timeout_ms == 0 {
            return Err(anyhow!("execution_timeout_ms must be greater than zero"));
        }
        if self.startup_timeout_ms == 0 {
            return Err(anyhow!("startup_timeout_ms must be greater than zero"));
        }
        if !self.code_template.is_empty() {
            if !self.code_template.contains(CODE_PLACEHOLDER) {
                return Err(anyhow!("code_template must contain {CODE_PLACEHOLDER}"));
            }
            if self.code_template.contains('\n') {
                return Err(anyhow!("code_template must be a single line"));
            }
        }
        for (name, marker) in [
            ("stdout_marker", &self.stdout_marker),
            ("stderr_marker", &self.stderr_marker),
        ] {
            if !marker.contains(SENTINEL_PLACEHOLDER) {
                return Err(anyhow!("{name} must contain {SENTINEL_PLACEHOLDER}"));
            }
            if marker.contains('\n') {
                return Err(anyhow!("{name} must be a single line"));
            }
        }
        Ok(())
    }
}

/// Load the configuration, writing a default file first if none exists.
pub fn load_or_init(config_file: &Path, dry_run: bool) -> Result<AppConfig> {
    if !config_file.exists() {
        if dry_run {
            log::info!(
                "dry-run: would create default config at {}",
                config_file.display()
            );
        } else {
            write_default_config(config_file)?;
        }
    }
    load(config_file)
}

pub fn load(config_file: &Path) -> Result<AppConfig> {
    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080_i64)?
        .set_default("logging.level", "info")?
        .add_source(
            File::from(config_file)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(env_prefix.as_str())
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("reading config from {}", config_file.display()))?;

    let config: AppConfig = built
        .try_deserialize()
        .context("deserializing configuration")?;
    config.validate()?;
    Ok(config)
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Every key can be overridden with ");
    buffer.push_str(&env_prefix());
    buffer.push_str("__SECTION__KEY environment variables.\n");
    buffer.push('\n');
    buffer
}

/// Resolve the config file path from an optional `--config` override.
pub fn resolve_config_file(override_path: Option<PathBuf>) -> Result<PathBuf> {
    let config_file = match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                expanded.join("config.toml")
            } else {
                expanded
            }
        }
        None => default_config_dir()?.join("config.toml"),
    };

    if config_file.parent().is_none() {
        return Err(anyhow!("invalid config file path: {config_file:?}"));
    }
    Ok(config_file)
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
