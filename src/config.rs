// src/config.rs
//! Configuration file parsing for Bodhi
//!
//! Supports TOML configuration files with the following sections:
//! - [general] - System users, admin groups, base URL
//! - [karma] - Default karma thresholds for new updates
//! - [critpath] - Critical path approval policy
//! - [test_gating] - Decision service gating and retry policy
//! - [compose] - Compose worker settings
//! - [messages] - User-facing policy messages
//! - [releases.*] / [prefixes.*] - Per-release testing requirements
//!
//! The loaded [`BodhiConfig`] is passed explicitly to every component that
//! needs a policy value.

use crate::db::models::Release;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BodhiConfig {
    #[serde(default)]
    pub general: GeneralSection,

    #[serde(default)]
    pub karma: KarmaSection,

    #[serde(default)]
    pub critpath: CritpathSection,

    #[serde(default)]
    pub test_gating: TestGatingSection,

    #[serde(default)]
    pub compose: ComposeSection,

    #[serde(default)]
    pub messages: MessagesSection,

    /// Per-release overrides keyed by release name (e.g. "F40")
    #[serde(default)]
    pub releases: HashMap<String, ReleasePolicy>,

    /// Per-prefix fallbacks keyed by release id prefix (e.g. "FEDORA-EPEL")
    #[serde(default)]
    pub prefixes: HashMap<String, ReleasePolicy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSection {
    /// Accounts that act on behalf of Bodhi itself
    #[serde(default = "default_system_users")]
    pub system_users: Vec<String>,

    /// Groups whose positive karma counts as an admin approval
    #[serde(default = "default_admin_groups")]
    pub admin_groups: Vec<String>,

    /// Base URL used when linking to other updates in comments
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            system_users: default_system_users(),
            admin_groups: default_admin_groups(),
            base_url: default_base_url(),
        }
    }
}

fn default_system_users() -> Vec<String> {
    vec!["bodhi".to_string()]
}

fn default_admin_groups() -> Vec<String> {
    vec![
        "proventesters".to_string(),
        "qa".to_string(),
        "releng".to_string(),
    ]
}

fn default_base_url() -> String {
    "https://bodhi.fedoraproject.org".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct KarmaSection {
    #[serde(default = "default_stable_karma")]
    pub default_stable_karma: i32,

    #[serde(default = "default_unstable_karma")]
    pub default_unstable_karma: i32,
}

impl Default for KarmaSection {
    fn default() -> Self {
        Self {
            default_stable_karma: default_stable_karma(),
            default_unstable_karma: default_unstable_karma(),
        }
    }
}

fn default_stable_karma() -> i32 {
    3
}

fn default_unstable_karma() -> i32 {
    -3
}

#[derive(Debug, Clone, Deserialize)]
pub struct CritpathSection {
    /// Karma a critical path update needs before it may go stable
    #[serde(default = "default_critpath_min_karma")]
    pub min_karma: i32,

    /// Admin approvals required; unset disables the requirement
    #[serde(default = "default_num_admin_approvals")]
    pub num_admin_approvals: Option<i32>,

    #[serde(default = "default_stable_after_days")]
    pub stable_after_days_without_negative_karma: i64,
}

impl Default for CritpathSection {
    fn default() -> Self {
        Self {
            min_karma: default_critpath_min_karma(),
            num_admin_approvals: default_num_admin_approvals(),
            stable_after_days_without_negative_karma: default_stable_after_days(),
        }
    }
}

fn default_critpath_min_karma() -> i32 {
    2
}

fn default_num_admin_approvals() -> Option<i32> {
    Some(2)
}

fn default_stable_after_days() -> i64 {
    14
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestGatingSection {
    /// Whether a passing gating decision is required for stable
    #[serde(default)]
    pub required: bool,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TestGatingSection {
    fn default() -> Self {
        Self {
            required: false,
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TestGatingSection {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeSection {
    /// Composes run at the same time by one worker
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Output directory; defaults to `composes/` beside the database
    #[serde(default)]
    pub compose_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub clean_old_composes: bool,
}

impl Default for ComposeSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            compose_dir: None,
            clean_old_composes: true,
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesSection {
    #[serde(default = "default_not_yet_tested")]
    pub not_yet_tested: String,

    #[serde(default = "default_not_yet_tested_epel")]
    pub not_yet_tested_epel: String,

    #[serde(default = "default_disable_autopush")]
    pub disable_automatic_push_to_stable: String,

    #[serde(default = "default_testing_approval_karma")]
    pub testing_approval_karma: String,

    /// `%d` is replaced with the number of days
    #[serde(default = "default_testing_approval_days")]
    pub testing_approval_days: String,
}

impl Default for MessagesSection {
    fn default() -> Self {
        Self {
            not_yet_tested: default_not_yet_tested(),
            not_yet_tested_epel: default_not_yet_tested_epel(),
            disable_automatic_push_to_stable: default_disable_autopush(),
            testing_approval_karma: default_testing_approval_karma(),
            testing_approval_days: default_testing_approval_days(),
        }
    }
}

fn default_not_yet_tested() -> String {
    "This update has not yet met the minimum testing requirements defined in the \
     Package Update Acceptance Criteria"
        .to_string()
}

fn default_not_yet_tested_epel() -> String {
    "This update has not yet met the minimum testing requirements defined in the \
     EPEL Update Policy"
        .to_string()
}

fn default_disable_autopush() -> String {
    "Bodhi is disabling automatic push to stable due to negative karma. The \
     maintainer may push manually if they determine that the issue is not severe."
        .to_string()
}

fn default_testing_approval_karma() -> String {
    "This update has reached the stable karma threshold and can be pushed to \
     stable now if the maintainer wishes."
        .to_string()
}

fn default_testing_approval_days() -> String {
    "This update has reached %d days in testing and can be pushed to stable now \
     if the maintainer wishes"
        .to_string()
}

/// Testing requirements for one release or release prefix
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleasePolicy {
    #[serde(default)]
    pub mandatory_days_in_testing: Option<i64>,

    #[serde(default)]
    pub critpath_min_karma: Option<i32>,
}

impl BodhiConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: BodhiConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.karma.default_stable_karma < 1 {
            return Err(Error::Config(
                "karma.default_stable_karma must be at least 1".to_string(),
            ));
        }
        if self.karma.default_unstable_karma > -1 {
            return Err(Error::Config(
                "karma.default_unstable_karma must be at most -1".to_string(),
            ));
        }
        if self.compose.max_concurrent == 0 {
            return Err(Error::Config(
                "compose.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_system_user(&self, name: &str) -> bool {
        self.general.system_users.iter().any(|u| u == name)
    }

    /// The account Bodhi itself comments as
    pub fn system_user(&self) -> &str {
        self.general
            .system_users
            .first()
            .map(String::as_str)
            .unwrap_or("bodhi")
    }

    /// Minimum days an update of `release` must spend in testing
    ///
    /// Release settings win over prefix settings; nothing configured means 0.
    pub fn mandatory_days_in_testing(&self, release: &Release) -> i64 {
        let configured = self
            .releases
            .get(&release.name)
            .and_then(|p| p.mandatory_days_in_testing)
            .or_else(|| {
                self.prefixes
                    .get(&release.id_prefix)
                    .and_then(|p| p.mandatory_days_in_testing)
            });

        match configured {
            Some(days) => days,
            None => {
                debug!(
                    "No mandatory_days_in_testing configured for {}, using 0",
                    release.name
                );
                0
            }
        }
    }

    /// Minimum karma for a critical path update of `release`
    pub fn critpath_min_karma(&self, release: &Release) -> i32 {
        self.releases
            .get(&release.name)
            .and_then(|p| p.critpath_min_karma)
            .unwrap_or(self.critpath.min_karma)
    }

    /// The "not yet tested" rejection message appropriate for `release`
    pub fn not_yet_tested_msg(&self, release: &Release) -> &str {
        if release.id_prefix == "FEDORA-EPEL" {
            &self.messages.not_yet_tested_epel
        } else {
            &self.messages.not_yet_tested
        }
    }

    /// Compose output directory, falling back to one beside the database
    pub fn compose_dir(&self, db_path: &str) -> PathBuf {
        self.compose
            .compose_dir
            .clone()
            .unwrap_or_else(|| crate::db::paths::compose_dir(db_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ReleaseState;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn release(name: &str, prefix: &str) -> Release {
        let mut r = Release::new(name, &format!("Fedora {}", name), "40", prefix);
        r.state = ReleaseState::Current;
        r
    }

    #[test]
    fn test_defaults() {
        let config = BodhiConfig::default();
        assert_eq!(config.karma.default_stable_karma, 3);
        assert_eq!(config.karma.default_unstable_karma, -3);
        assert_eq!(config.critpath.min_karma, 2);
        assert_eq!(config.critpath.num_admin_approvals, Some(2));
        assert_eq!(config.test_gating.retries, 3);
        assert!(!config.test_gating.required);
        assert_eq!(config.compose.max_concurrent, 3);
        assert!(config.is_system_user("bodhi"));
        assert_eq!(config.system_user(), "bodhi");
    }

    #[test]
    fn test_load_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[test_gating]
required = true
retries = 5

[critpath]
num_admin_approvals = 0

[releases.F40]
mandatory_days_in_testing = 7
critpath_min_karma = 1

[prefixes.FEDORA-EPEL]
mandatory_days_in_testing = 14
"#
        )
        .unwrap();

        let config = BodhiConfig::load(file.path()).unwrap();
        assert!(config.test_gating.required);
        assert_eq!(config.test_gating.retries, 5);
        assert_eq!(config.test_gating.retry_backoff_ms, 1000);
        assert_eq!(config.critpath.num_admin_approvals, Some(0));
        assert_eq!(config.karma.default_stable_karma, 3);

        let f40 = release("F40", "FEDORA");
        assert_eq!(config.mandatory_days_in_testing(&f40), 7);
        assert_eq!(config.critpath_min_karma(&f40), 1);

        let epel = release("EPEL-9", "FEDORA-EPEL");
        assert_eq!(config.mandatory_days_in_testing(&epel), 14);
        assert_eq!(config.critpath_min_karma(&epel), 2);

        let f39 = release("F39", "FEDORA");
        assert_eq!(config.mandatory_days_in_testing(&f39), 0);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[karma]\ndefault_unstable_karma = 2").unwrap();
        let err = BodhiConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
