pub mod config;
pub mod correspondence;
pub mod date_util;
pub mod error;
pub mod identity;
pub mod provenance;
pub mod source;
pub mod storage;
pub mod sync;
pub mod text;
pub mod ticket;

use std::path::Path;

pub use config::Settings;
pub use correspondence::{CorrespondenceMap, CorrespondenceStore, JsonFileStore, Link};
pub use error::{Error, Result};
pub use identity::UserIdentityMap;
pub use storage::Database;
pub use sync::reconciler::Reconciler;
pub use sync::{NoopProgress, SyncMode, SyncPolicy, SyncProgress, SyncReport, SyncStatus};
pub use ticket::{LogicalTicket, SourceSystem};

// Re-export repository row types needed by the binary crate, but not the module itself
pub use storage::repository::{GlpiUserRow, SyncRunRow};

use source::{GlpiClient, JiraClient, TicketSource};
use storage::repository;

/// `glpi_users.source` for rows written by [`JiraGlpiSync::refresh_users`].
pub const USERS_FROM_GLPI: &str = "glpi";
/// `glpi_users.source` for rows set by hand.
pub const USERS_MANUAL: &str = "manual";

/// Counts shown by `status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    pub links: u64,
    pub users: u64,
    pub recent_runs: Vec<SyncRunRow>,
}

/// Main entry point: owns the local database and wires the remote clients,
/// the correspondence store and the policy into reconciliation runs.
pub struct JiraGlpiSync {
    db: Database,
}

impl JiraGlpiSync {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Policy ─────────────────────────────────────────────────────

    /// `base` with the overrides stored in `app_config` applied.
    pub async fn policy(&self, base: SyncPolicy) -> Result<SyncPolicy> {
        let mut policy = base;
        for (key, value) in self.config_list().await? {
            policy.apply_override(&key, &value)?;
        }
        Ok(policy)
    }

    /// Load the identity map from `glpi_users`.
    pub async fn identity_map(&self, settings: &Settings) -> Result<UserIdentityMap> {
        let entries = self
            .db
            .reader()
            .call(|conn| repository::load_identity_entries(conn))
            .await?;
        Ok(UserIdentityMap::new(
            entries,
            &settings.default_user_identity,
            settings.default_user_id,
        ))
    }

    // ── Sync ───────────────────────────────────────────────────────

    /// Connect to both systems and run `mode`. The GLPI session is closed
    /// whatever the outcome. Links live in the database unless `store`
    /// is given.
    pub async fn sync(
        &self,
        settings: &Settings,
        mode: SyncMode,
        policy: &SyncPolicy,
        store: Option<&dyn CorrespondenceStore>,
        progress: &dyn SyncProgress,
    ) -> Result<Vec<SyncReport>> {
        let users = self.identity_map(settings).await?;
        let jira = JiraClient::new(settings.jira.clone(), policy.allow_deletion)?;
        let glpi = GlpiClient::connect(settings.glpi.clone(), policy.allow_deletion).await?;

        let store: &dyn CorrespondenceStore = match store {
            Some(store) => store,
            None => &self.db,
        };
        let result = self
            .run_with(&jira, &glpi, store, &users, policy, mode, progress)
            .await;
        glpi.close().await;
        result
    }

    /// Run the passes of `mode` against the given sources, recording each
    /// pass in `sync_runs`. A pass that fails outright is reported as
    /// failed and the remaining passes still run.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_with(
        &self,
        jira: &dyn TicketSource,
        glpi: &dyn TicketSource,
        store: &dyn CorrespondenceStore,
        users: &UserIdentityMap,
        policy: &SyncPolicy,
        mode: SyncMode,
        progress: &dyn SyncProgress,
    ) -> Result<Vec<SyncReport>> {
        let reconciler = Reconciler::new(jira, glpi, store, users, policy).with_progress(progress);
        let mut reports = Vec::new();
        for &pass in mode.passes() {
            let pass_name = pass.to_string();
            let dry_run = policy.dry_run;
            let run_id = self
                .db
                .writer()
                .call(move |conn| repository::insert_sync_run(conn, &pass_name, dry_run))
                .await?;

            let report = match reconciler.run_pass(pass).await {
                Ok(report) => report,
                Err(e) => {
                    log::error!("{pass} pass failed: {e}");
                    let report = SyncReport::aborted(pass, dry_run, e.to_string());
                    progress.on_pass_complete(&report);
                    report
                }
            };

            self.db
                .writer()
                .call({
                    let report = report.clone();
                    move |conn| repository::finish_sync_run(conn, run_id, &report)
                })
                .await?;
            reports.push(report);
        }
        Ok(reports)
    }

    // ── Users ──────────────────────────────────────────────────────

    /// Rebuild the GLPI-sourced part of the identity map from `/User`.
    /// Manually set identities are kept. Returns the number of rows written.
    pub async fn refresh_users(&self, settings: &Settings) -> Result<usize> {
        let glpi = GlpiClient::connect(settings.glpi.clone(), false).await?;
        let users = glpi.list_users().await;
        glpi.close().await;
        let users = users?;

        let mut entries: Vec<(String, u64)> = Vec::new();
        for user in &users {
            for identity in user.identities() {
                let key = text::normalize_identity(&identity);
                if entries.iter().any(|(k, _)| *k == key) {
                    log::debug!("Identity '{key}' already mapped, ignoring GLPI user {}", user.id);
                    continue;
                }
                entries.push((key, user.id));
            }
        }
        log::info!("Fetched {} GLPI users ({} identities)", users.len(), entries.len());

        let written = self
            .db
            .writer()
            .call(move |conn| repository::replace_glpi_users(conn, USERS_FROM_GLPI, &entries))
            .await?;
        Ok(written)
    }

    pub async fn set_user(&self, identity: &str, glpi_user_id: u64) -> Result<()> {
        let key = text::normalize_identity(identity);
        if key.is_empty() {
            return Err(Error::Config("identity must not be empty".into()));
        }
        self.db
            .writer()
            .call(move |conn| repository::upsert_glpi_user(conn, &key, glpi_user_id, USERS_MANUAL))
            .await?;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<GlpiUserRow>> {
        self.db
            .reader()
            .call(|conn| repository::list_glpi_users(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Links ──────────────────────────────────────────────────────

    pub async fn links(&self) -> Result<Vec<Link>> {
        let map = self.db.load().await?;
        Ok(map.links().cloned().collect())
    }

    /// Merge links from a JSON map file. Links that conflict with existing
    /// ones are skipped with a warning. Returns how many were added.
    pub async fn import_links(&self, path: impl AsRef<Path>) -> Result<usize> {
        let incoming = JsonFileStore::new(path).load().await?;
        let mut map = self.db.load().await?;
        let before = map.len();
        for link in incoming.links() {
            if let Err(conflict) = map.link(link.clone(), correspondence::ConflictRule::Reject) {
                log::warn!(
                    "Skipping Jira {} <-> GLPI {}: already linked as Jira {} <-> GLPI {}",
                    link.jira_id,
                    link.glpi_id,
                    conflict.existing.jira_id,
                    conflict.existing.glpi_id
                );
            }
        }
        self.db.save(&map).await?;
        Ok(map.len() - before)
    }

    /// Write every link to a JSON map file. Returns how many were written.
    pub async fn export_links(&self, path: impl AsRef<Path>) -> Result<usize> {
        let map = self.db.load().await?;
        JsonFileStore::new(path).save(&map).await?;
        Ok(map.len())
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Store a config value. Policy keys are validated before they are
    /// written.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        if sync::POLICY_KEYS.contains(&key) {
            SyncPolicy::default().apply_override(key, value)?;
        }
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Status ─────────────────────────────────────────────────────

    pub async fn status(&self, recent: usize) -> Result<StatusReport> {
        let report = self
            .db
            .reader()
            .call(move |conn| {
                Ok::<_, rusqlite::Error>(StatusReport {
                    links: repository::count_links(conn)?,
                    users: repository::count_glpi_users(conn)?,
                    recent_runs: repository::recent_sync_runs(conn, recent)?,
                })
            })
            .await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::{ConflictRule, MemoryStore};
    use crate::source::MemorySource;
    use crate::sync::{FetchFailurePolicy, Pass, RecencyRule};

    async fn setup() -> JiraGlpiSync {
        JiraGlpiSync::new(Database::open_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_policy_overrides_from_config() {
        let dw = setup().await;
        dw.config_set("recency", "source_always_wins").await.unwrap();
        dw.config_set("allow_deletion", "true").await.unwrap();
        dw.config_set("note", "free text is fine").await.unwrap();

        let policy = dw.policy(SyncPolicy::default()).await.unwrap();
        assert_eq!(policy.recency, RecencyRule::SourceAlwaysWins);
        assert!(policy.allow_deletion);
        assert_eq!(policy.on_fetch_failure, FetchFailurePolicy::Abort);

        assert!(dw.config_set("link_conflicts", "merge").await.is_err());
        assert_eq!(dw.config_get("link_conflicts").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_users_set_and_list() {
        let dw = setup().await;
        dw.set_user("  Jane Doe ", 12).await.unwrap();
        dw.set_user("glpi", 2).await.unwrap();
        assert!(dw.set_user("   ", 3).await.is_err());

        let users = dw.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].identity, "jane doe");
        assert_eq!(users[1].source, USERS_MANUAL);
    }

    #[tokio::test]
    async fn test_links_import_and_export() {
        let dw = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("map.json");
        tokio::fs::write(&input, r#"{ "10001": 7, "10002": "8" }"#).await.unwrap();

        let mut existing = CorrespondenceMap::new();
        existing
            .link(Link::new("10003", "8", Some(SourceSystem::Glpi)), ConflictRule::Reject)
            .unwrap();
        dw.db().save(&existing).await.unwrap();

        // "10002" -> "8" collides with the existing link
        assert_eq!(dw.import_links(&input).await.unwrap(), 1);
        assert_eq!(dw.links().await.unwrap().len(), 2);

        let output = dir.path().join("out.json");
        assert_eq!(dw.export_links(&output).await.unwrap(), 2);
        let written = JsonFileStore::parse(&tokio::fs::read_to_string(&output).await.unwrap()).unwrap();
        assert_eq!(written.len(), 2);
    }

    #[tokio::test]
    async fn test_run_with_records_runs() {
        let dw = setup().await;
        let jira = MemorySource::new(SourceSystem::Jira).with_tickets(vec![LogicalTicket::from_raw_body(
            SourceSystem::Jira,
            "10001",
            "VPN down",
            "Cannot connect",
        )]);
        let glpi = MemorySource::new(SourceSystem::Glpi);
        glpi.fail_fetches(true).await;
        let store = MemoryStore::new();
        let users = UserIdentityMap::new(vec![("glpi".to_string(), 2)], "glpi", None);
        let policy = SyncPolicy::default();

        let reports = dw
            .run_with(&jira, &glpi, &store, &users, &policy, SyncMode::All, &NoopProgress)
            .await
            .unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.status == SyncStatus::Failed));
        assert_eq!(reports[2].pass, Pass::Deletions);

        let status = dw.status(10).await.unwrap();
        assert_eq!(status.recent_runs.len(), 3);
        assert!(status.recent_runs.iter().all(|r| r.status == "failed"));
        assert_eq!(status.links, 0);
    }

    #[tokio::test]
    async fn test_run_with_uses_database_store() {
        let dw = setup().await;
        let jira = MemorySource::new(SourceSystem::Jira).with_tickets(vec![LogicalTicket::from_raw_body(
            SourceSystem::Jira,
            "10001",
            "VPN down",
            "Cannot connect",
        )]);
        let glpi = MemorySource::new(SourceSystem::Glpi);
        let users = UserIdentityMap::new(Vec::new(), "glpi", Some(2));
        let policy = SyncPolicy::default();

        let reports = dw
            .run_with(&jira, &glpi, dw.db(), &users, &policy, SyncMode::Both, &NoopProgress)
            .await
            .unwrap();
        assert_eq!(reports[0].created, 1);
        assert_eq!(reports[1].created, 0);

        let links = dw.links().await.unwrap();
        assert_eq!(links, vec![Link::new("10001", "1001", Some(SourceSystem::Jira))]);
        assert_eq!(dw.status(5).await.unwrap().links, 1);
    }
}
