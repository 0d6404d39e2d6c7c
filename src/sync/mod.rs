pub mod change;
pub mod matcher;
pub mod reconciler;

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{parse_flag, Settings};
use crate::correspondence::ConflictRule;
use crate::error::{Error, Result};
use crate::ticket::SourceSystem;

/// `app_config` keys that override policy fields.
pub const POLICY_KEYS: &[&str] = &[
    "allow_deletion",
    "dry_run",
    "provenance_tags",
    "recency",
    "on_fetch_failure",
    "link_conflicts",
];

/// When a matched pair differs, which side gets written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyRule {
    /// Update the target only if the source was modified strictly later.
    #[default]
    SourceNewer,
    /// Update the target whenever content differs.
    SourceAlwaysWins,
}

/// What a pass does when fetching one side fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    /// Fail the pass without touching anything.
    #[default]
    Abort,
    /// Continue with an empty snapshot for the failed side. Every item on
    /// the other side then looks unmatched and gets a new counterpart.
    TreatAsEmpty,
}

/// Knobs for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    pub recency: RecencyRule,
    /// Honour and write provenance tags.
    pub provenance_tags: bool,
    pub allow_deletion: bool,
    /// Log intended writes without performing them.
    pub dry_run: bool,
    pub on_fetch_failure: FetchFailurePolicy,
    pub link_conflicts: ConflictRule,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            recency: RecencyRule::default(),
            provenance_tags: true,
            allow_deletion: false,
            dry_run: false,
            on_fetch_failure: FetchFailurePolicy::default(),
            link_conflicts: ConflictRule::default(),
        }
    }
}

impl From<&Settings> for SyncPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            allow_deletion: settings.allow_deletion,
            dry_run: settings.dry_run,
            ..Self::default()
        }
    }
}

impl SyncPolicy {
    /// Apply one persisted override. Keys outside [`POLICY_KEYS`] are
    /// ignored.
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<()> {
        let flag = |current: bool| -> Result<bool> {
            Ok(parse_flag(key, Some(value.to_string()))?.unwrap_or(current))
        };
        match key {
            "allow_deletion" => self.allow_deletion = flag(self.allow_deletion)?,
            "dry_run" => self.dry_run = flag(self.dry_run)?,
            "provenance_tags" => self.provenance_tags = flag(self.provenance_tags)?,
            "recency" => self.recency = parse_choice(key, value)?,
            "on_fetch_failure" => self.on_fetch_failure = parse_choice(key, value)?,
            "link_conflicts" => self.link_conflicts = parse_choice(key, value)?,
            _ => {}
        }
        Ok(())
    }
}

/// Parse a snake_case enum value through its serde representation.
fn parse_choice<T: DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_ascii_lowercase()))
        .map_err(|_| Error::Config(format!("invalid value for {key}: {value}")))
}

/// Which way a directional pass copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    JiraToGlpi,
    GlpiToJira,
}

impl Direction {
    pub fn source(self) -> SourceSystem {
        match self {
            Direction::JiraToGlpi => SourceSystem::Jira,
            Direction::GlpiToJira => SourceSystem::Glpi,
        }
    }

    pub fn target(self) -> SourceSystem {
        self.source().opposite()
    }
}

/// Pass identity, used in reports and the run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    JiraToGlpi,
    GlpiToJira,
    Deletions,
}

impl From<Direction> for Pass {
    fn from(d: Direction) -> Self {
        match d {
            Direction::JiraToGlpi => Pass::JiraToGlpi,
            Direction::GlpiToJira => Pass::GlpiToJira,
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pass::JiraToGlpi => "jira2glpi",
            Pass::GlpiToJira => "glpi2jira",
            Pass::Deletions => "deletions",
        })
    }
}

/// Which passes a run executes, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    JiraToGlpi,
    GlpiToJira,
    #[default]
    Both,
    Deletions,
    /// Both directional passes, then the delete pass.
    All,
}

impl SyncMode {
    pub fn passes(self) -> &'static [Pass] {
        match self {
            SyncMode::JiraToGlpi => &[Pass::JiraToGlpi],
            SyncMode::GlpiToJira => &[Pass::GlpiToJira],
            SyncMode::Both => &[Pass::JiraToGlpi, Pass::GlpiToJira],
            SyncMode::Deletions => &[Pass::Deletions],
            SyncMode::All => &[Pass::JiraToGlpi, Pass::GlpiToJira, Pass::Deletions],
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "jira2glpi" => Ok(SyncMode::JiraToGlpi),
            "glpi2jira" => Ok(SyncMode::GlpiToJira),
            "both" => Ok(SyncMode::Both),
            "deletions" => Ok(SyncMode::Deletions),
            "all" => Ok(SyncMode::All),
            other => Err(format!(
                "unknown mode '{other}' (expected jira2glpi, glpi2jira, both, deletions, all)"
            )),
        }
    }
}

/// The decision taken for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Skip,
    Delete,
}

/// Report returned after a pass completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pass: Pass,
    pub status: SyncStatus,
    pub items_seen: u64,
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub dry_run: bool,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn new(pass: Pass, dry_run: bool) -> Self {
        Self {
            pass,
            status: SyncStatus::Success,
            items_seen: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            failed: 0,
            dry_run,
            error: None,
        }
    }

    /// A pass that could not run at all.
    pub fn aborted(pass: Pass, dry_run: bool, error: String) -> Self {
        Self {
            status: SyncStatus::Failed,
            error: Some(error),
            ..Self::new(pass, dry_run)
        }
    }

    pub fn record(&mut self, action: Action) {
        match action {
            Action::Create => self.created += 1,
            Action::Update => self.updated += 1,
            Action::Delete => self.deleted += 1,
            Action::Skip => self.skipped += 1,
        }
    }

    /// Derive the final status from the counts.
    pub fn finish(mut self) -> Self {
        let written = self.created + self.updated + self.deleted;
        self.status = if self.failed == 0 {
            SyncStatus::Success
        } else if written > 0 || self.skipped > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failed
        };
        if self.failed > 0 && self.error.is_none() {
            self.error = Some(format!("{} items failed", self.failed));
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Success => "completed",
            SyncStatus::PartialFailure => "partial",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Callbacks for progress output. All methods default to no-ops.
pub trait SyncProgress: Send + Sync {
    fn on_pass_start(&self, _pass: Pass) {}
    fn on_fetched(&self, _system: SourceSystem, _count: usize) {}
    fn on_action(&self, _pass: Pass, _action: Action, _ticket: &str) {}
    fn on_pass_complete(&self, _report: &SyncReport) {}
}

pub struct NoopProgress;

impl SyncProgress for NoopProgress {}
