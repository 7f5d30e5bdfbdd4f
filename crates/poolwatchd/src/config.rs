//! poolwatch.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use poolwatch_monitor::policy::parse_duration;
use poolwatch_monitor::{
    CommandSampler, ConfigError, ContactHeader, DeliveryPolicy, Policy, SmtpConfig,
};
use poolwatch_state::StateStore;

/// Location read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/poolwatch.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolwatchConfig {
    pub monitor: MonitorConfig,
    pub state: StateConfig,
    pub sampler: SamplerConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub poll_interval: String,
    pub reminder_interval: String,
    pub sample_timeout: String,
    pub notify_timeout: String,
    pub delivery_policy: DeliveryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: "8h".to_string(),
            reminder_interval: "7d".to_string(),
            sample_timeout: "30s".to_string(),
            notify_timeout: "90s".to_string(),
            delivery_policy: DeliveryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    pub snapshot_file: PathBuf,
    pub meta_file: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            snapshot_file: PathBuf::from("/var/lib/poolwatch/pool_status.json"),
            meta_file: PathBuf::from("/var/lib/poolwatch/pool_meta.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerConfig {
    pub list_command: Vec<String>,
    pub detail_command: Option<Vec<String>>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            list_command: ["zpool", "list", "-H", "-o", "name,health"]
                .map(String::from)
                .to_vec(),
            detail_command: Some(["zpool", "status"].map(String::from).to_vec()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    /// Host named in the subject line. Defaults to the machine hostname.
    pub hostname: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        let smtp = SmtpConfig::default();
        Self {
            smtp_server: smtp.server,
            smtp_port: smtp.port,
            sender: None,
            recipient: None,
            hostname: None,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub poll_interval: Option<String>,
    pub reminder_interval: Option<String>,
}

impl PoolwatchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path`, or the default location if present, or built-in defaults.
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load, apply command-line overrides and validate the timing policy.
    pub fn effective(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply(overrides);
        config.policy()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(v) = &overrides.poll_interval {
            self.monitor.poll_interval = v.clone();
        }
        if let Some(v) = &overrides.reminder_interval {
            self.monitor.reminder_interval = v.clone();
        }
    }

    /// Validated timing and delivery policy.
    pub fn policy(&self) -> Result<Policy, ConfigError> {
        let m = &self.monitor;
        Ok(Policy::new(
            parse_duration(&m.poll_interval)?,
            parse_duration(&m.reminder_interval)?,
        )?
        .with_timeouts(
            parse_duration(&m.sample_timeout)?,
            parse_duration(&m.notify_timeout)?,
        )?
        .with_delivery(m.delivery_policy))
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(&self.state.snapshot_file, &self.state.meta_file)
    }

    pub fn sampler(&self, timeout: Duration) -> Result<CommandSampler, ConfigError> {
        if self.sampler.list_command.is_empty() {
            return Err(ConfigError::EmptyCommand("sampler.list_command"));
        }
        let sampler = CommandSampler::new(self.sampler.list_command.clone(), timeout);
        match &self.sampler.detail_command {
            Some(cmd) if cmd.is_empty() => Err(ConfigError::EmptyCommand("sampler.detail_command")),
            Some(cmd) => Ok(sampler.with_detail_command(cmd.clone())),
            None => Ok(sampler),
        }
    }

    pub fn smtp(&self, timeout: Duration) -> SmtpConfig {
        SmtpConfig {
            server: self.notify.smtp_server.clone(),
            port: self.notify.smtp_port,
            timeout,
        }
    }

    /// Sender, recipient and host for outgoing messages.
    ///
    /// Sender and recipient are required unless `dry_run` is set, in which
    /// case placeholders are used.
    pub fn contact_header(&self, dry_run: bool) -> Result<ContactHeader, ConfigError> {
        let hostname = self.notify.hostname.clone().unwrap_or_else(detect_hostname);
        let pick = |value: &Option<String>, field: &'static str| match value {
            Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ if dry_run => Ok(format!("poolwatch@{hostname}")),
            _ => Err(ConfigError::Missing(field)),
        };
        Ok(ContactHeader {
            sender: pick(&self.notify.sender, "notify.sender")?,
            recipient: pick(&self.notify.recipient, "notify.recipient")?,
            hostname: hostname.clone(),
        })
    }
}

/// Best-effort machine hostname.
pub fn detect_hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}
