use crate::audit::AuditConfig;
use crate::flows::FlowsConfig;
use crate::language::LanguageConfig;
use crate::lockout::LockoutPolicy;
use crate::masquerade::MasqueradeConfig;
use crate::timezone::TimezoneConfig;
use serde::{Deserialize, Serialize};

/// Main configuration for the quarterdeck extensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub lockout: LockoutPolicy,
    #[serde(default)]
    pub language: LanguageConfig,
    #[serde(default)]
    pub timezone: TimezoneConfig,
    #[serde(default)]
    pub masquerade: MasqueradeConfig,
    #[serde(default)]
    pub flows: FlowsConfig,
}

/// Builder for [`Config`] with environment variable support.
///
/// Environment variables use the `QUARTERDECK_` prefix:
///
/// - `QUARTERDECK_AUDIT_ENABLED`
/// - `QUARTERDECK_LOCKOUT_ENABLED`
/// - `QUARTERDECK_LOCKOUT_FAILURE_LIMIT`
/// - `QUARTERDECK_LOCKOUT_COOLOFF_SECS`
/// - `QUARTERDECK_LOCKOUT_URL`
/// - `QUARTERDECK_LOCKOUT_TEMPLATE`
/// - `QUARTERDECK_DEFAULT_LANGUAGE`
/// - `QUARTERDECK_SUPPORTED_LANGUAGES` (comma-separated)
/// - `QUARTERDECK_DEFAULT_TIMEZONE`
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Enable or disable audit logging.
    pub fn with_audit_enabled(mut self, enabled: bool) -> Self {
        self.config.audit.enabled = enabled;
        self
    }

    /// Replace the lockout policy.
    pub fn with_lockout(mut self, policy: LockoutPolicy) -> Self {
        self.config.lockout = policy;
        self
    }

    /// Replace the language configuration.
    pub fn with_language(mut self, language: LanguageConfig) -> Self {
        self.config.language = language;
        self
    }

    /// Set the system default timezone.
    pub fn with_default_timezone(mut self, tz: chrono_tz::Tz) -> Self {
        self.config.timezone.default = tz;
        self
    }

    /// Replace the masquerade view configuration.
    pub fn with_masquerade(mut self, masquerade: MasqueradeConfig) -> Self {
        self.config.masquerade = masquerade;
        self
    }

    /// Replace the flows configuration.
    pub fn with_flows(mut self, flows: FlowsConfig) -> Self {
        self.config.flows = flows;
        self
    }

    /// Overlay values from the environment.
    pub fn from_env(mut self) -> Self {
        if let Some(enabled) = env_bool("QUARTERDECK_AUDIT_ENABLED") {
            self.config.audit.enabled = enabled;
        }
        if let Some(enabled) = env_bool("QUARTERDECK_LOCKOUT_ENABLED") {
            self.config.lockout.enabled = enabled;
        }
        if let Some(limit) = env_parse::<u32>("QUARTERDECK_LOCKOUT_FAILURE_LIMIT") {
            self.config.lockout.failure_limit = limit;
        }
        if let Some(secs) = env_parse::<u64>("QUARTERDECK_LOCKOUT_COOLOFF_SECS") {
            self.config.lockout.cooloff_secs = secs;
        }
        if let Ok(url) = std::env::var("QUARTERDECK_LOCKOUT_URL") {
            self.config.lockout.lockout_url = url;
        }
        if let Ok(template) = std::env::var("QUARTERDECK_LOCKOUT_TEMPLATE") {
            self.config.lockout.lockout_template = template;
        }
        if let Ok(default) = std::env::var("QUARTERDECK_DEFAULT_LANGUAGE") {
            self.config.language.default = default;
        }
        if let Ok(supported) = std::env::var("QUARTERDECK_SUPPORTED_LANGUAGES") {
            self.config.language.supported = supported
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(tz) = env_parse::<chrono_tz::Tz>("QUARTERDECK_DEFAULT_TIMEZONE") {
            self.config.timezone.default = tz;
        }
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
