// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use eventhub_sink::errors::ConfigError;
use std::env;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the forwarder process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    /// Event hub base URL, e.g. https://ns.servicebus.windows.net/hub
    pub endpoint: Option<String>,
    /// Value of the Authorization header
    pub sas_token: Option<String>,
    /// Record messages in memory instead of publishing them
    pub dry_run: bool,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    pub timeout: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            sas_token: None,
            dry_run: false,
            https_proxy: None,
            timeout: DEFAULT_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl ForwarderConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup("EVENTHUB_ENDPOINT");
        let sas_token = lookup("EVENTHUB_SAS_TOKEN");
        let dry_run = lookup("EVENTHUB_DRY_RUN")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let https_proxy = lookup("EVENTHUB_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY"));
        let timeout = match lookup("EVENTHUB_TIMEOUT_SECS") {
            Some(val) => {
                let secs = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: "EVENTHUB_TIMEOUT_SECS",
                    value: val.clone(),
                })?;
                Duration::from_secs(secs)
            }
            None => DEFAULT_TIMEOUT,
        };
        let log_level = lookup("EVENTHUB_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|| "info".to_string());

        let config = Self {
            endpoint,
            sas_token,
            dry_run,
            https_proxy,
            timeout,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dry_run {
            if self.endpoint.as_deref().map_or(true, |e| e.trim().is_empty()) {
                return Err(ConfigError::Missing("EVENTHUB_ENDPOINT"));
            }
            if self.sas_token.as_deref().map_or(true, |t| t.trim().is_empty()) {
                return Err(ConfigError::Missing("EVENTHUB_SAS_TOKEN"));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "EVENTHUB_LOG_LEVEL",
                value: self.log_level.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ForwarderConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ForwarderConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_endpoint_required_unless_dry_run() {
        assert_eq!(
            from_vars(&[]),
            Err(ConfigError::Missing("EVENTHUB_ENDPOINT"))
        );
        assert_eq!(
            from_vars(&[("EVENTHUB_ENDPOINT", "https://ns.example/hub")]),
            Err(ConfigError::Missing("EVENTHUB_SAS_TOKEN"))
        );

        let config = from_vars(&[("EVENTHUB_DRY_RUN", "TRUE")]).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.endpoint, None);
    }

    #[test]
    fn test_reads_connection_settings() {
        let config = from_vars(&[
            ("EVENTHUB_ENDPOINT", "https://ns.example/hub"),
            ("EVENTHUB_SAS_TOKEN", "SharedAccessSignature sr=x"),
            ("HTTPS_PROXY", "http://proxy:3128"),
            ("EVENTHUB_TIMEOUT_SECS", "3"),
            ("EVENTHUB_LOG_LEVEL", "DEBUG"),
        ])
        .unwrap();

        assert_eq!(config.endpoint.as_deref(), Some("https://ns.example/hub"));
        assert_eq!(config.https_proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = ForwarderConfig {
            dry_run: true,
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_timeout() {
        let result = from_vars(&[("EVENTHUB_DRY_RUN", "true"), ("EVENTHUB_TIMEOUT_SECS", "soon")]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "EVENTHUB_TIMEOUT_SECS",
                ..
            })
        ));
    }
}
