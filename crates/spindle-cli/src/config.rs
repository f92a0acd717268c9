//! Configuration Vault – reads/writes `~/.spindle/config.toml`.

use serde::{Deserialize, Serialize};
use spindle_middleware::FeedbackSettings;
use spindle_runtime::ControllerConfig;
use spindle_types::{
    AnglePolicy, DEFAULT_PULSES_PER_REVOLUTION, FeedbackAuth, MAX_DUTY_PERCENT, SpindleError,
};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroize;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_VAR: &str = "SPINDLE_CONFIG";

/// Persisted controller configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host of the remote observer (WebSocket feedback server).
    #[serde(default = "default_server_address")]
    pub server_address: String,

    /// Local address the UDP command socket binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_command_port")]
    pub command_port: u16,

    #[serde(default = "default_feedback_port")]
    pub feedback_port: u16,

    /// Encoder pulses per shaft revolution.
    #[serde(default = "default_pulses_per_revolution")]
    pub pulses_per_revolution: u32,

    /// Silence after which the duty cycle is forced to zero.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,

    /// Hold time between applying a duty cycle and reading the encoder back.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Largest duty-cycle magnitude ever applied, in percent.
    #[serde(default = "default_duty_clamp")]
    pub duty_clamp: f64,

    #[serde(default)]
    pub angle_policy: AnglePolicy,

    #[serde(default = "default_pwm_channel")]
    pub pwm_channel: String,

    /// Encoder speed of the simulation driver at full duty.
    #[serde(default = "default_sim_counts_per_second")]
    pub sim_counts_per_second: f64,

    #[serde(default = "default_feedback_name")]
    pub feedback_name: String,

    /// Observer password (stored as plain text; the file is written 0o600).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feedback_password: String,

    /// Shared command cipher key.  Empty means the identity transform.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cipher_key: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server_address", &self.server_address)
            .field("bind_address", &self.bind_address)
            .field("command_port", &self.command_port)
            .field("feedback_port", &self.feedback_port)
            .field("pulses_per_revolution", &self.pulses_per_revolution)
            .field("command_timeout_ms", &self.command_timeout_ms)
            .field("publish_interval_ms", &self.publish_interval_ms)
            .field("settle_delay_ms", &self.settle_delay_ms)
            .field("reconnect_backoff_ms", &self.reconnect_backoff_ms)
            .field("duty_clamp", &self.duty_clamp)
            .field("angle_policy", &self.angle_policy)
            .field("pwm_channel", &self.pwm_channel)
            .field("sim_counts_per_second", &self.sim_counts_per_second)
            .field("feedback_name", &self.feedback_name)
            .field("feedback_password", redacted(&self.feedback_password))
            .field("cipher_key", redacted(&self.cipher_key))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static dyn std::fmt::Debug {
    if secret.is_empty() { &"<not set>" } else { &"<redacted>" }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.feedback_password.zeroize();
        self.cipher_key.zeroize();
    }
}

fn default_server_address() -> String {
    "10.250.25.253".to_string()
}
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_command_port() -> u16 {
    8766
}
fn default_feedback_port() -> u16 {
    8765
}
fn default_pulses_per_revolution() -> u32 {
    DEFAULT_PULSES_PER_REVOLUTION
}
fn default_command_timeout_ms() -> u64 {
    1000
}
fn default_publish_interval_ms() -> u64 {
    100
}
fn default_settle_delay_ms() -> u64 {
    100
}
fn default_reconnect_backoff_ms() -> u64 {
    1000
}
fn default_duty_clamp() -> f64 {
    MAX_DUTY_PERCENT
}
fn default_pwm_channel() -> String {
    "DAC".to_string()
}
fn default_sim_counts_per_second() -> f64 {
    f64::from(DEFAULT_PULSES_PER_REVOLUTION)
}
fn default_feedback_name() -> String {
    "motor_controller".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            bind_address: default_bind_address(),
            command_port: default_command_port(),
            feedback_port: default_feedback_port(),
            pulses_per_revolution: default_pulses_per_revolution(),
            command_timeout_ms: default_command_timeout_ms(),
            publish_interval_ms: default_publish_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            duty_clamp: default_duty_clamp(),
            angle_policy: AnglePolicy::default(),
            pwm_channel: default_pwm_channel(),
            sim_counts_per_second: default_sim_counts_per_second(),
            feedback_name: default_feedback_name(),
            feedback_password: String::new(),
            cipher_key: String::new(),
        }
    }
}

impl Config {
    /// Reject values the controller cannot run with.
    pub fn validate(&self) -> Result<(), SpindleError> {
        let invalid = |msg: &str| -> Result<(), SpindleError> { Err(SpindleError::Config(msg.to_string())) };
        if self.server_address.trim().is_empty() {
            return invalid("server_address must not be empty");
        }
        if self.command_port == 0 || self.feedback_port == 0 {
            return invalid("command_port and feedback_port must be non-zero");
        }
        if self.pulses_per_revolution == 0 {
            return invalid("pulses_per_revolution must be greater than zero");
        }
        if [
            self.command_timeout_ms,
            self.publish_interval_ms,
            self.settle_delay_ms,
            self.reconnect_backoff_ms,
        ]
        .contains(&0)
        {
            return invalid("timeouts and intervals must be positive");
        }
        if !(self.duty_clamp > 0.0 && self.duty_clamp <= MAX_DUTY_PERCENT) {
            return invalid("duty_clamp must be within (0, 100]");
        }
        if !(self.sim_counts_per_second.is_finite() && self.sim_counts_per_second >= 0.0) {
            return invalid("sim_counts_per_second must be a non-negative number");
        }
        Ok(())
    }

    /// `ws://host:port` of the observer.
    pub fn feedback_url(&self) -> String {
        let host = self.server_address.trim();
        match host.parse::<Ipv6Addr>() {
            Ok(_) => format!("ws://[{host}]:{}", self.feedback_port),
            Err(_) => format!("ws://{host}:{}", self.feedback_port),
        }
    }

    pub fn to_controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            bind_address: self.bind_address,
            command_port: self.command_port,
            feedback_url: self.feedback_url(),
            feedback_auth: FeedbackAuth {
                name: self.feedback_name.clone(),
                password: self.feedback_password.clone(),
            },
            feedback: FeedbackSettings {
                publish_interval: Duration::from_millis(self.publish_interval_ms),
                reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            },
            pwm_channel: self.pwm_channel.clone(),
            pulses_per_revolution: self.pulses_per_revolution,
            angle_policy: self.angle_policy,
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            duty_clamp: self.duty_clamp,
        }
    }
}

/// Return the config path: `$SPINDLE_CONFIG`, else `~/.spindle/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_VAR)
        && !explicit.trim().is_empty()
    {
        return PathBuf::from(explicit);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".spindle").join("config.toml")
}

/// Load the config from disk, falling back to defaults when the file does
/// not exist.  Environment overrides are applied either way.
pub fn load() -> Result<(Config, Option<PathBuf>), SpindleError> {
    let path = config_path();
    let loaded = load_from(&path)?;
    let found = loaded.is_some().then_some(path);
    let mut cfg = loaded.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok((cfg, found))
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, SpindleError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        SpindleError::Config(format!("Failed to read config at {}: {}", path.display(), e))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| SpindleError::Config(format!("Failed to parse config: {}", e)))?;
    Ok(Some(cfg))
}

/// Apply `SPINDLE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SPINDLE_SERVER_ADDRESS` | `server_address` |
/// | `SPINDLE_COMMAND_PORT` | `command_port` |
/// | `SPINDLE_FEEDBACK_PORT` | `feedback_port` |
/// | `SPINDLE_FEEDBACK_PASSWORD` | `feedback_password` |
///
/// Unparseable ports are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SPINDLE_SERVER_ADDRESS") {
        cfg.server_address = v;
    }
    if let Ok(v) = std::env::var("SPINDLE_COMMAND_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.command_port = port;
    }
    if let Ok(v) = std::env::var("SPINDLE_FEEDBACK_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.feedback_port = port;
    }
    if let Ok(v) = std::env::var("SPINDLE_FEEDBACK_PASSWORD") {
        cfg.feedback_password.zeroize();
        cfg.feedback_password = v;
    }
}

/// Save the config to a specific path with owner-only permissions.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), SpindleError> {
    let fail = |what: &str, e: std::io::Error| SpindleError::Config(format!("{what}: {e}"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fail("Failed to create config directory", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| fail("Failed to set config directory permissions", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| SpindleError::Config(format!("Failed to serialize config: {}", e)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| fail(&format!("Failed to write config at {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| fail(&format!("Failed to write config at {}", path.display()), e))?;
    Ok(())
}
