//! Settings loaded from the environment.

use std::fmt;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::date_util::parse_offset;
use crate::error::{Error, Result};

const DEFAULT_ISSUE_TYPE: &str = "Task";
const DEFAULT_PAGE_SIZE: usize = 100;
/// Identity whose GLPI user owns tickets from unmapped reporters.
pub const DEFAULT_USER_IDENTITY: &str = "glpi";

/// Which Jira reporter field the identity map is keyed by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    #[default]
    DisplayName,
    Email,
}

impl std::str::FromStr for IdentityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "display_name" | "displayname" | "name" => Ok(IdentityKey::DisplayName),
            "email" => Ok(IdentityKey::Email),
            other => Err(Error::Config(format!("unknown identity key: {other}"))),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum JiraAuth {
    Basic { username: String, password: String },
    Bearer(String),
}

impl fmt::Debug for JiraAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JiraAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            JiraAuth::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraSettings {
    pub base_url: String,
    pub auth: JiraAuth,
    pub project_key: String,
    pub issue_type: String,
    pub identity_key: IdentityKey,
    pub page_size: usize,
}

#[derive(Clone, PartialEq, Eq)]
pub struct GlpiSettings {
    pub base_url: String,
    pub user_token: String,
    pub app_token: String,
    /// Offset of the GLPI server clock; `date_mod` values are naive.
    pub server_offset: FixedOffset,
    pub page_size: usize,
    pub purge_on_delete: bool,
}

impl fmt::Debug for GlpiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlpiSettings")
            .field("base_url", &self.base_url)
            .field("user_token", &"<redacted>")
            .field("app_token", &"<redacted>")
            .field("server_offset", &self.server_offset)
            .field("page_size", &self.page_size)
            .field("purge_on_delete", &self.purge_on_delete)
            .finish()
    }
}

/// Everything the binary needs besides the database.
#[derive(Debug, Clone)]
pub struct Settings {
    pub jira: JiraSettings,
    pub glpi: GlpiSettings,
    pub default_user_identity: String,
    pub default_user_id: Option<u64>,
    pub allow_deletion: bool,
    pub dry_run: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| Error::Config(format!("{key} is not set")));

        let jira_auth = match get("JIRA_API_TOKEN") {
            Some(token) => JiraAuth::Bearer(token),
            None => JiraAuth::Basic {
                username: require("JIRA_USERNAME")?,
                password: require("JIRA_PASSWORD")?,
            },
        };
        let jira = JiraSettings {
            base_url: validate_url("JIRA_BASE_URL", &require("JIRA_BASE_URL")?)?,
            auth: jira_auth,
            project_key: require("JIRA_KEY_PROJECT")?,
            issue_type: get("JIRA_ISSUE_TYPE").unwrap_or_else(|| DEFAULT_ISSUE_TYPE.to_string()),
            identity_key: get("JIRA_IDENTITY_KEY")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            page_size: parse_or("JIRA_PAGE_SIZE", get("JIRA_PAGE_SIZE"), DEFAULT_PAGE_SIZE)?,
        };

        let server_offset = match get("GLPI_TIMEZONE_OFFSET") {
            Some(raw) => parse_offset(&raw)
                .ok_or_else(|| Error::Config(format!("GLPI_TIMEZONE_OFFSET is invalid: {raw}")))?,
            None => FixedOffset::east_opt(0).ok_or_else(|| Error::Config("invalid UTC offset".into()))?,
        };
        let glpi = GlpiSettings {
            base_url: validate_url("GLPI_BASE_URL", &require("GLPI_BASE_URL")?)?,
            user_token: require("GLPI_USER_TOKEN")?,
            app_token: require("GLPI_APP_TOKEN")?,
            server_offset,
            page_size: parse_or("GLPI_PAGE_SIZE", get("GLPI_PAGE_SIZE"), DEFAULT_PAGE_SIZE)?,
            purge_on_delete: parse_flag("GLPI_PURGE_ON_DELETE", get("GLPI_PURGE_ON_DELETE"))?.unwrap_or(false),
        };

        Ok(Self {
            jira,
            glpi,
            default_user_identity: get("GLPI_DEFAULT_USER").unwrap_or_else(|| DEFAULT_USER_IDENTITY.to_string()),
            default_user_id: get("GLPI_DEFAULT_USER_ID")
                .map(|v| parse_or("GLPI_DEFAULT_USER_ID", Some(v), 0u64))
                .transpose()?,
            allow_deletion: parse_flag("ALLOW_DELETION", get("ALLOW_DELETION"))?.unwrap_or(false),
            dry_run: parse_flag("DRY_RUN", get("DRY_RUN"))?.unwrap_or(false),
        })
    }
}

fn validate_url(key: &str, raw: &str) -> Result<String> {
    let url = url::Url::parse(raw).map_err(|e| Error::Config(format!("{key} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(raw.trim_end_matches('/').to_string()),
        other => Err(Error::Config(format!("{key} must be http or https, got {other}"))),
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(v) => v
            .parse()
            .map_err(|_| Error::Config(format!("{key} is not a valid number: {v}"))),
        None => Ok(default),
    }
}

/// Parse `true/false/1/0/yes/no/on/off`.
pub fn parse_flag(key: &str, raw: Option<String>) -> Result<Option<bool>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => Err(Error::Config(format!("{key} must be a boolean, got {other}"))),
    }
}
