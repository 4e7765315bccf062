//! `prepdesk.toml` configuration.
//!
//! Every field has a default, so an empty or missing file is valid. Values are
//! layered: file, then environment (`PREPDESK_*`, with `.env` honored by the
//! binary), then CLI flags applied by the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fulfillment::eligibility::EligibilityPolicy;
use crate::fulfillment::engine::EngineSettings;
use crate::fulfillment::gateway::RetryPolicy;
use crate::fulfillment::lifecycle::MirrorRules;
use crate::fulfillment::models::AssignmentStatus;
use crate::fulfillment::server::ServerConfig;

/// Directory holding the config file and the database by default.
pub const DATA_DIR: &str = ".prepdesk";

/// Config file name inside [`DATA_DIR`].
pub const CONFIG_FILE: &str = "prepdesk.toml";

pub const ENV_UPSTREAM_URL: &str = "PREPDESK_UPSTREAM_URL";
pub const ENV_UPSTREAM_TOKEN: &str = "PREPDESK_UPSTREAM_TOKEN";
pub const ENV_DB_PATH: &str = "PREPDESK_DB_PATH";

/// Default config path relative to `base`.
pub fn default_config_path(base: &Path) -> PathBuf {
    base.join(DATA_DIR).join(CONFIG_FILE)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrepdeskToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub eligibility: EligibilityPolicy,
    #[serde(default)]
    pub lifecycle: LifecycleSection,
    #[serde(default)]
    pub revalidation: RevalidationSection,
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Permissive CORS and bind on all interfaces.
    #[serde(default)]
    pub dev: bool,
}

fn default_port() -> u16 {
    3150
}

fn default_db_path() -> String {
    format!("{}/prepdesk.db", DATA_DIR)
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
            dev: false,
        }
    }
}

/// `[upstream]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api/v1".to_string()
}
fn default_attempt_timeout_ms() -> u64 {
    5_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    2_000
}
fn default_page_size() -> u32 {
    50
}
fn default_max_pages() -> u32 {
    20
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: None,
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

/// `[queue]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    /// Upstream status filters the default allocation policy lists.
    #[serde(default = "default_queue_statuses")]
    pub statuses: Vec<String>,
    /// Upstream status written on claim. Overrides
    /// `[lifecycle.mirror.assigned].target` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_status: Option<String>,
}

fn default_queue_statuses() -> Vec<String> {
    vec!["under_review".to_string()]
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            statuses: default_queue_statuses(),
            claimed_status: None,
        }
    }
}

/// `[lifecycle]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LifecycleSection {
    #[serde(default)]
    pub mirror: MirrorRules,
}

/// `[revalidation]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevalidationSection {
    /// Overall budget for upstream fetches while listing active assignments.
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
    #[serde(default)]
    pub auto_complete_on_label_presence: bool,
}

fn default_request_deadline_ms() -> u64 {
    8_000
}

impl Default for RevalidationSection {
    fn default() -> Self {
        Self {
            request_deadline_ms: default_request_deadline_ms(),
            auto_complete_on_label_presence: false,
        }
    }
}

impl PrepdeskToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse prepdesk.toml")
    }

    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize prepdesk.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `PREPDESK_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_UPSTREAM_URL) {
            self.upstream.base_url = url;
        }
        if let Some(token) = non_empty(ENV_UPSTREAM_TOKEN) {
            self.upstream.access_token = Some(token);
        }
        if let Some(path) = non_empty(ENV_DB_PATH) {
            self.server.db_path = path;
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.upstream.max_attempts,
            base_delay: Duration::from_millis(self.upstream.base_delay_ms),
            max_delay: Duration::from_millis(self.upstream.max_delay_ms),
            attempt_timeout: Duration::from_millis(self.upstream.attempt_timeout_ms),
        }
    }

    /// The mirror table with `queue.claimed_status` folded in.
    pub fn mirror_rules(&self) -> MirrorRules {
        let mut rules = self.lifecycle.mirror.clone();
        if let Some(claimed) = self.queue.claimed_status.as_ref().filter(|s| !s.trim().is_empty()) {
            rules.assigned.target = Some(claimed.trim().to_string());
        }
        rules
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            queue_statuses: self.queue.statuses.clone(),
            eligibility: self.eligibility.clone(),
            mirror: self.mirror_rules(),
            request_deadline: Duration::from_millis(self.revalidation.request_deadline_ms),
            auto_complete_on_label_presence: self.revalidation.auto_complete_on_label_presence,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.server.port,
            db_path: PathBuf::from(&self.server.db_path),
            dev_mode: self.server.dev,
            upstream_url: self.upstream.base_url.clone(),
            upstream_token: self.upstream.access_token.clone(),
            retry: self.retry_policy(),
            page_size: self.upstream.page_size,
            max_pages: self.upstream.max_pages,
            engine: self.engine_settings(),
        }
    }

    /// Validate the configuration and return human-readable warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let url = self.upstream.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            warnings.push(format!(
                "upstream.base_url '{}' should start with http:// or https://",
                self.upstream.base_url
            ));
        }
        if self.upstream.max_attempts == 0 {
            warnings.push("upstream.max_attempts is 0; every call is tried once".to_string());
        }
        if self.upstream.page_size == 0 || self.upstream.max_pages == 0 {
            warnings.push("upstream.page_size and upstream.max_pages must be at least 1".to_string());
        }
        if self.upstream.base_delay_ms > self.upstream.max_delay_ms {
            warnings.push(format!(
                "upstream.base_delay_ms ({}) exceeds upstream.max_delay_ms ({})",
                self.upstream.base_delay_ms, self.upstream.max_delay_ms
            ));
        }

        if self.queue.statuses.is_empty() {
            warnings.push("queue.statuses is empty; unfiltered workers will never find work".to_string());
        }
        for status in &self.queue.statuses {
            if !self.eligibility.is_eligible(status, None) {
                warnings.push(format!(
                    "queue status '{}' is not in eligibility.statuses; its orders can never be claimed",
                    status
                ));
            }
        }
        if let Some(claimed) = self.mirror_rules().target_for(AssignmentStatus::Assigned)
            && self.queue.statuses.iter().any(|s| s.trim().eq_ignore_ascii_case(claimed))
        {
            warnings.push(format!(
                "queue.statuses contains the claimed status '{}'; claimed orders are listed again on every claim",
                claimed
            ));
        }
        if self.eligibility.statuses.is_empty() {
            warnings.push("eligibility.statuses is empty; no order is ever eligible".to_string());
        }

        let rules = self.mirror_rules();
        for status in [AssignmentStatus::Completed, AssignmentStatus::Removed] {
            if let Some(target) = rules.target_for(status)
                && self.eligibility.is_eligible(target, None)
            {
                warnings.push(format!(
                    "mirror target '{}' for '{}' is still an eligible status; the order would re-enter the queue",
                    target, status
                ));
            }
        }

        if self.revalidation.request_deadline_ms < self.upstream.attempt_timeout_ms {
            warnings.push(format!(
                "revalidation.request_deadline_ms ({}) is below upstream.attempt_timeout_ms ({}); slow fetches are always served from cache",
                self.revalidation.request_deadline_ms, self.upstream.attempt_timeout_ms
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::lifecycle::MirrorRequirement;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = PrepdeskToml::parse("").unwrap();
        assert_eq!(config, PrepdeskToml::default());
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.server.port, 3150);
        assert_eq!(config.server.db_path, ".prepdesk/prepdesk.db");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.engine_settings(), EngineSettings::default());
    }

    #[test]
    fn test_parse_sections() {
        let config = PrepdeskToml::parse(
            r#"
            [server]
            port = 9000
            dev = true

            [upstream]
            base_url = "https://store.example/api"
            max_attempts = 5
            attempt_timeout_ms = 1500

            [queue]
            statuses = ["under_review"]
            claimed_status = "preparing_now"

            [eligibility]
            statuses = ["under_review", "preparing_now"]

            [lifecycle.mirror.waiting]
            target = "on_hold"
            mode = "required"

            [revalidation]
            request_deadline_ms = 3000
            auto_complete_on_label_presence = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(config.server.dev);
        assert_eq!(config.upstream.max_attempts, 5);
        assert_eq!(config.upstream.page_size, 50);
        assert_eq!(config.eligibility.sub_statuses, EligibilityPolicy::default().sub_statuses);

        let settings = config.engine_settings();
        assert_eq!(settings.queue_statuses, vec!["under_review".to_string()]);
        assert_eq!(settings.mirror.target_for(AssignmentStatus::Assigned), Some("preparing_now"));
        assert_eq!(settings.mirror.waiting.mode, MirrorRequirement::Required);
        assert_eq!(settings.request_deadline, Duration::from_secs(3));
        assert!(settings.auto_complete_on_label_presence);

        let server = config.server_config();
        assert_eq!(server.retry.attempt_timeout, Duration::from_millis(1500));
        assert!(server.dev_mode);
    }

    #[test]
    fn test_unknown_mirror_mode_is_rejected() {
        let err = PrepdeskToml::parse("[lifecycle.mirror.shipped]\nmode = \"sometimes\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_UPSTREAM_URL, "https://override.example"),
            (ENV_UPSTREAM_TOKEN, "s3cret"),
            (ENV_DB_PATH, "  "),
        ]
        .into_iter()
        .collect();
        let mut config = PrepdeskToml::default();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.upstream.base_url, "https://override.example");
        assert_eq!(config.upstream.access_token.as_deref(), Some("s3cret"));
        assert_eq!(config.server.db_path, default_db_path(), "blank values are ignored");
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = PrepdeskToml::default();
        config.upstream.base_url = "store.example".into();
        config.upstream.max_attempts = 0;
        config.queue.statuses.push("shipped".into());
        config.lifecycle.mirror.completed.target = Some("under_review".into());
        config.revalidation.request_deadline_ms = 100;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 5, "{warnings:#?}");
        assert!(warnings.iter().any(|w| w.contains("base_url")));
        assert!(warnings.iter().any(|w| w.contains("'shipped'")));
        assert!(warnings.iter().any(|w| w.contains("re-enter the queue")));
    }

    #[test]
    fn test_claimed_status_in_queue_warns() {
        let mut config = PrepdeskToml::default();
        config.queue.statuses.push("In_Progress".into());
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1, "{warnings:#?}");
        assert!(warnings[0].contains("claimed status 'in_progress'"));

        config.queue.claimed_status = Some("picking".into());
        config.eligibility.statuses.push("picking".into());
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = PrepdeskToml::default();
        config.queue.claimed_status = Some("in_progress".into());
        config.save(&path).unwrap();

        let loaded = PrepdeskToml::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(PrepdeskToml::load_or_default(&dir.path().join("missing.toml")).is_ok());
    }

    #[test]
    fn test_default_config_path() {
        assert_eq!(
            default_config_path(Path::new("/srv")),
            PathBuf::from("/srv/.prepdesk/prepdesk.toml")
        );
    }
}
