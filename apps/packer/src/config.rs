use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use packaging_core::{HttpGatewayConfig, WorkflowConfig};
use serde::Deserialize;
use toml::{Table, Value};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "packer.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub service_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub notice_timeout_ms: u64,
    pub request_timeout_secs: u64,
    pub abandon_comment: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8000/sap/opu/odata/sap/ZPACKAGING_SRV/".into(),
            username: None,
            password: None,
            notice_timeout_ms: 5000,
            request_timeout_secs: 30,
            abandon_comment: None,
        }
    }
}

pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        settings.apply_file(&raw);
    }
    settings.apply_env(|key| std::env::var(key).ok());

    settings
}

impl Settings {
    /// Flat top-level keys; a file that does not parse is ignored. Numeric keys accept either
    /// integers or quoted numbers.
    pub fn apply_file(&mut self, raw: &str) {
        let Ok(file_cfg) = raw.parse::<Table>() else {
            return;
        };
        if let Some(v) = text(&file_cfg, "service_url") {
            self.service_url = v;
        }
        if let Some(v) = text(&file_cfg, "username") {
            self.username = Some(v);
        }
        if let Some(v) = text(&file_cfg, "password") {
            self.password = Some(v);
        }
        if let Some(v) = number(&file_cfg, "notice_timeout_ms") {
            self.notice_timeout_ms = v;
        }
        if let Some(v) = number(&file_cfg, "request_timeout_secs") {
            self.request_timeout_secs = v;
        }
        if let Some(v) = text(&file_cfg, "abandon_comment") {
            self.abandon_comment = Some(v);
        }
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PACKER_SERVICE_URL") {
            self.service_url = v;
        }
        if let Some(v) = var("APP__SERVICE_URL") {
            self.service_url = v;
        }

        if let Some(v) = var("APP__USERNAME") {
            self.username = Some(v);
        }
        if let Some(v) = var("APP__PASSWORD") {
            self.password = Some(v);
        }

        if let Some(v) = var("APP__NOTICE_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.notice_timeout_ms = parsed;
            }
        }
        if let Some(v) = var("APP__REQUEST_TIMEOUT_SECS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.request_timeout_secs = parsed;
            }
        }

        if let Some(v) = var("APP__ABANDON_COMMENT") {
            self.abandon_comment = Some(v);
        }
    }

    pub fn gateway_config(&self) -> anyhow::Result<HttpGatewayConfig> {
        let service_url = Url::parse(self.service_url.trim())
            .with_context(|| format!("invalid service url '{}'", self.service_url))?;
        if !matches!(service_url.scheme(), "http" | "https") {
            anyhow::bail!("service url '{service_url}' must use http or https");
        }
        Ok(HttpGatewayConfig {
            service_url,
            username: self.username.clone().filter(|user| !user.trim().is_empty()),
            password: self.password.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        let mut config = WorkflowConfig {
            notice_timeout: Duration::from_millis(self.notice_timeout_ms),
            ..WorkflowConfig::default()
        };
        if let Some(comment) = self.abandon_comment.as_ref().filter(|c| !c.trim().is_empty()) {
            config.abandon_comment = comment.clone();
        }
        config
    }
}

fn text(table: &Table, key: &str) -> Option<String> {
    table.get(key).and_then(Value::as_str).map(str::to_string)
}

fn number(table: &Table, key: &str) -> Option<u64> {
    match table.get(key)? {
        Value::Integer(v) => u64::try_from(*v).ok(),
        Value::String(v) => v.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
