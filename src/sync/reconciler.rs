//! Decision core: directional passes and the deletion pass.

use std::collections::HashSet;

use crate::correspondence::{CorrespondenceMap, CorrespondenceStore, Link};
use crate::date_util::is_newer;
use crate::error::{Error, Result};
use crate::identity::UserIdentityMap;
use crate::provenance::{wrap_body, ProvenanceTag};
use crate::source::TicketSource;
use crate::ticket::{LogicalTicket, NewTicket, SourceSystem, TicketUpdate};

use super::change::{desired_owner, diff};
use super::matcher::{classify, Counterparts, MatchOutcome};
use super::{
    Action, Direction, FetchFailurePolicy, NoopProgress, Pass, RecencyRule, SyncMode, SyncPolicy,
    SyncProgress, SyncReport,
};

static NOOP: NoopProgress = NoopProgress;

/// Runs reconciliation passes between two ticket sources.
///
/// Every pass fetches both sides and loads the correspondence map fresh,
/// then walks the items one at a time. The map is saved after each
/// mutation. A failing create, update or delete is logged and counted and
/// the pass moves on; only fetch, load and save failures end a pass early.
pub struct Reconciler<'a> {
    jira: &'a dyn TicketSource,
    glpi: &'a dyn TicketSource,
    store: &'a dyn CorrespondenceStore,
    users: &'a UserIdentityMap,
    policy: &'a SyncPolicy,
    progress: &'a dyn SyncProgress,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        jira: &'a dyn TicketSource,
        glpi: &'a dyn TicketSource,
        store: &'a dyn CorrespondenceStore,
        users: &'a UserIdentityMap,
        policy: &'a SyncPolicy,
    ) -> Self {
        Self {
            jira,
            glpi,
            store,
            users,
            policy,
            progress: &NOOP,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn SyncProgress) -> Self {
        self.progress = progress;
        self
    }

    fn side(&self, system: SourceSystem) -> &'a dyn TicketSource {
        match system {
            SourceSystem::Jira => self.jira,
            SourceSystem::Glpi => self.glpi,
        }
    }

    /// Run the passes selected by `mode` in order, stopping at the first
    /// pass that fails outright.
    pub async fn run(&self, mode: SyncMode) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::new();
        for pass in mode.passes() {
            reports.push(self.run_pass(*pass).await?);
        }
        Ok(reports)
    }

    pub async fn run_pass(&self, pass: Pass) -> Result<SyncReport> {
        match pass {
            Pass::JiraToGlpi => self.reconcile_jira_to_glpi().await,
            Pass::GlpiToJira => self.reconcile_glpi_to_jira().await,
            Pass::Deletions => self.reconcile_deletions().await,
        }
    }

    pub async fn reconcile_jira_to_glpi(&self) -> Result<SyncReport> {
        self.reconcile_direction(Direction::JiraToGlpi).await
    }

    pub async fn reconcile_glpi_to_jira(&self) -> Result<SyncReport> {
        self.reconcile_direction(Direction::GlpiToJira).await
    }

    async fn fetch(&self, system: SourceSystem, pass: Pass, policy: FetchFailurePolicy) -> Result<Vec<LogicalTicket>> {
        match self.side(system).fetch_all().await {
            Ok(tickets) => {
                log::info!("Fetched {} {system} tickets", tickets.len());
                self.progress.on_fetched(system, tickets.len());
                Ok(tickets)
            }
            Err(e) => match policy {
                FetchFailurePolicy::Abort => Err(Error::Sync {
                    pass: pass.to_string(),
                    message: format!("fetching {system} tickets failed: {e}"),
                }),
                FetchFailurePolicy::TreatAsEmpty => {
                    log::warn!("Fetching {system} tickets failed, continuing with none: {e}");
                    self.progress.on_fetched(system, 0);
                    Ok(Vec::new())
                }
            },
        }
    }

    async fn reconcile_direction(&self, direction: Direction) -> Result<SyncReport> {
        let pass = Pass::from(direction);
        self.progress.on_pass_start(pass);
        log::info!("Starting {pass} pass");

        let sources = self.fetch(direction.source(), pass, self.policy.on_fetch_failure).await?;
        let targets = self.fetch(direction.target(), pass, self.policy.on_fetch_failure).await?;
        let mut map = self.store.load().await?;
        let counterparts = Counterparts::new(&targets);

        let mut report = SyncReport::new(pass, self.policy.dry_run);
        report.items_seen = sources.len() as u64;

        for item in &sources {
            match classify(item, &counterparts, &map, self.policy.provenance_tags) {
                MatchOutcome::Unmatched {
                    originated_elsewhere: false,
                } => {
                    self.create_counterpart(pass, item, &mut map, &mut report).await?;
                }
                MatchOutcome::Unmatched {
                    originated_elsewhere: true,
                } => {
                    log::debug!(
                        "{} {} was copied from {}; not creating a counterpart",
                        item.system,
                        item.display_key,
                        item.system.opposite()
                    );
                    self.record(pass, &mut report, Action::Skip, item);
                }
                MatchOutcome::Dangling { counterpart_id } => {
                    log::info!(
                        "{} {}: linked {} ticket {counterpart_id} is gone, leaving it to the deletion pass",
                        item.system,
                        item.display_key,
                        item.system.opposite()
                    );
                    self.record(pass, &mut report, Action::Skip, item);
                }
                MatchOutcome::Matched(target) => {
                    let jira_id = match item.system {
                        SourceSystem::Jira => &item.remote_id,
                        SourceSystem::Glpi => &target.remote_id,
                    };
                    let origin = map.get_by_jira(jira_id).and_then(|l| l.origin);
                    self.update_counterpart(pass, item, target, origin, &mut report).await;
                }
            }
        }

        let report = report.finish();
        log::info!(
            "{pass} pass done: {} created, {} updated, {} skipped, {} failed",
            report.created,
            report.updated,
            report.skipped,
            report.failed
        );
        self.progress.on_pass_complete(&report);
        Ok(report)
    }

    fn record(&self, pass: Pass, report: &mut SyncReport, action: Action, item: &LogicalTicket) {
        report.record(action);
        self.progress.on_action(pass, action, &item.display_key);
    }

    /// Tag the counterpart of `source` should carry. The origin recorded on
    /// the link decides which side is the origin; without one, a source with
    /// no foreign tag is taken as the origin. The origin is named by the tag,
    /// otherwise the tag the target already has is kept.
    fn counterpart_tag(
        &self,
        source: &LogicalTicket,
        existing: Option<&ProvenanceTag>,
        link_origin: Option<SourceSystem>,
    ) -> Option<ProvenanceTag> {
        let source_is_origin = match link_origin {
            Some(origin) => origin == source.system,
            None => source
                .provenance
                .as_ref()
                .is_none_or(|tag| tag.system == source.system),
        };
        if self.policy.provenance_tags && source_is_origin {
            Some(source.origin_tag())
        } else {
            existing.cloned()
        }
    }

    async fn create_counterpart(
        &self,
        pass: Pass,
        item: &LogicalTicket,
        map: &mut CorrespondenceMap,
        report: &mut SyncReport,
    ) -> Result<()> {
        let target_system = item.system.opposite();
        let tag = self.counterpart_tag(item, None, None);
        let ticket = NewTicket {
            title: item.plain_title(),
            body: wrap_body(&item.plain_body(), tag.as_ref()),
            owner_id: desired_owner(item, self.users),
        };

        if self.policy.dry_run {
            log::info!(
                "[dry run] would create {target_system} counterpart for {} {} \"{}\"",
                item.system,
                item.display_key,
                item.title
            );
            self.record(pass, report, Action::Create, item);
            return Ok(());
        }

        let new_id = match self.side(target_system).create(&ticket).await {
            Ok(id) => id,
            Err(e) => {
                log::error!(
                    "Creating {target_system} counterpart for {} {} failed: {e}",
                    item.system,
                    item.display_key
                );
                report.failed += 1;
                return Ok(());
            }
        };

        let link = match item.system {
            SourceSystem::Jira => Link::new(item.remote_id.clone(), new_id.clone(), Some(item.system)),
            SourceSystem::Glpi => Link::new(new_id.clone(), item.remote_id.clone(), Some(item.system)),
        };
        if let Err(conflict) = map.link(link, self.policy.link_conflicts) {
            log::error!(
                "Created {target_system} ticket {new_id} for {} {} but could not link it: \
                 already linked as Jira {} <-> GLPI {}",
                item.system,
                item.display_key,
                conflict.existing.jira_id,
                conflict.existing.glpi_id
            );
            report.failed += 1;
            return Ok(());
        }
        self.store.save(map).await?;

        log::info!(
            "Created {target_system} ticket {new_id} from {} {}",
            item.system,
            item.display_key
        );
        self.record(pass, report, Action::Create, item);
        Ok(())
    }

    async fn update_counterpart(
        &self,
        pass: Pass,
        item: &LogicalTicket,
        target: &LogicalTicket,
        link_origin: Option<SourceSystem>,
        report: &mut SyncReport,
    ) {
        let fields = diff(item, target, self.users);
        if !fields.any() {
            self.record(pass, report, Action::Skip, item);
            return;
        }

        let source_wins = match self.policy.recency {
            RecencyRule::SourceNewer => is_newer(item.last_modified, target.last_modified),
            RecencyRule::SourceAlwaysWins => true,
        };
        if !source_wins {
            log::debug!(
                "{} {} differs from {} {} but is not newer; leaving it",
                item.system,
                item.display_key,
                target.system,
                target.display_key
            );
            self.record(pass, report, Action::Skip, item);
            return;
        }

        let mut update = TicketUpdate::default();
        if fields.title {
            update.title = Some(item.plain_title());
        }
        if fields.body {
            let tag = self.counterpart_tag(item, target.provenance.as_ref(), link_origin);
            update.body = Some(wrap_body(&item.plain_body(), tag.as_ref()));
        }
        if fields.owner {
            update.owner_id = desired_owner(item, self.users);
        }

        if self.policy.dry_run {
            log::info!(
                "[dry run] would update {} {} from {} {} ({fields:?})",
                target.system,
                target.display_key,
                item.system,
                item.display_key
            );
            self.record(pass, report, Action::Update, item);
            return;
        }

        match self.side(target.system).update(&target.remote_id, &update).await {
            Ok(()) => {
                log::info!(
                    "Updated {} {} from {} {}",
                    target.system,
                    target.display_key,
                    item.system,
                    item.display_key
                );
                self.record(pass, report, Action::Update, item);
            }
            Err(e) => {
                log::error!(
                    "Updating {} {} from {} {} failed: {e}",
                    target.system,
                    target.display_key,
                    item.system,
                    item.display_key
                );
                report.failed += 1;
            }
        }
    }

    /// Delete counterparts of linked tickets that disappeared on one side.
    ///
    /// Links whose GLPI ticket is gone are handled first (the Jira issue is
    /// deleted), then links whose Jira issue is gone. Links with both sides
    /// gone are dropped without any remote call. A fetch failure always
    /// aborts this pass.
    pub async fn reconcile_deletions(&self) -> Result<SyncReport> {
        let pass = Pass::Deletions;
        self.progress.on_pass_start(pass);
        log::info!("Starting {pass} pass");

        let jira = self.fetch(SourceSystem::Jira, pass, FetchFailurePolicy::Abort).await?;
        let glpi = self.fetch(SourceSystem::Glpi, pass, FetchFailurePolicy::Abort).await?;
        let jira_ids: HashSet<&str> = jira.iter().map(|t| t.remote_id.as_str()).collect();
        let glpi_ids: HashSet<&str> = glpi.iter().map(|t| t.remote_id.as_str()).collect();

        let mut map = self.store.load().await?;
        let mut report = SyncReport::new(pass, self.policy.dry_run);
        report.items_seen = map.len() as u64;

        let links: Vec<Link> = map.links().cloned().collect();
        for link in &links {
            if glpi_ids.contains(link.glpi_id.as_str()) {
                continue;
            }
            if jira_ids.contains(link.jira_id.as_str()) {
                self.delete_counterpart(pass, SourceSystem::Jira, link, &mut map, &mut report)
                    .await?;
            } else {
                log::info!(
                    "Jira {} and GLPI {} are both gone, dropping the link",
                    link.jira_id,
                    link.glpi_id
                );
                if !self.policy.dry_run {
                    map.unlink_jira(&link.jira_id);
                    self.store.save(&map).await?;
                }
            }
        }
        for link in &links {
            if !jira_ids.contains(link.jira_id.as_str()) && glpi_ids.contains(link.glpi_id.as_str()) {
                self.delete_counterpart(pass, SourceSystem::Glpi, link, &mut map, &mut report)
                    .await?;
            }
        }

        let report = report.finish();
        log::info!(
            "{pass} pass done: {} deleted, {} skipped, {} failed",
            report.deleted,
            report.skipped,
            report.failed
        );
        self.progress.on_pass_complete(&report);
        Ok(report)
    }

    /// Delete the `target` side of `link` because its other side is gone.
    async fn delete_counterpart(
        &self,
        pass: Pass,
        target: SourceSystem,
        link: &Link,
        map: &mut CorrespondenceMap,
        report: &mut SyncReport,
    ) -> Result<()> {
        let target_id = link.id_on(target);
        let gone = target.opposite();
        let gone_id = link.id_on(gone);

        if !self.policy.allow_deletion {
            log::info!(
                "Deletion disabled: would delete {target} ticket {target_id} because {gone} {gone_id} is gone"
            );
            report.record(Action::Skip);
            self.progress.on_action(pass, Action::Skip, target_id);
            return Ok(());
        }
        if self.policy.dry_run {
            log::info!("[dry run] would delete {target} ticket {target_id} because {gone} {gone_id} is gone");
            report.record(Action::Delete);
            self.progress.on_action(pass, Action::Delete, target_id);
            return Ok(());
        }

        match self.side(target).delete(target_id).await {
            Ok(true) => {
                map.unlink_jira(&link.jira_id);
                self.store.save(map).await?;
                log::info!("Deleted {target} ticket {target_id} because {gone} {gone_id} is gone");
                report.record(Action::Delete);
                self.progress.on_action(pass, Action::Delete, target_id);
            }
            Ok(false) => {
                report.record(Action::Skip);
                self.progress.on_action(pass, Action::Skip, target_id);
            }
            Err(e) => {
                log::error!("Deleting {target} ticket {target_id} failed: {e}");
                report.failed += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::MemoryStore;
    use crate::date_util::{parse_glpi_timestamp, parse_jira_timestamp};
    use crate::source::memory::SourceCall;
    use crate::source::MemorySource;
    use crate::sync::SyncStatus;
    use chrono::FixedOffset;

    struct Fixture {
        jira: MemorySource,
        glpi: MemorySource,
        store: MemoryStore,
        users: UserIdentityMap,
        policy: SyncPolicy,
    }

    impl Fixture {
        fn new(jira: Vec<LogicalTicket>, glpi: Vec<LogicalTicket>, links: Vec<Link>) -> Self {
            Self {
                jira: MemorySource::new(SourceSystem::Jira).with_tickets(jira),
                glpi: MemorySource::new(SourceSystem::Glpi).with_tickets(glpi),
                store: MemoryStore::with_links(links),
                users: UserIdentityMap::new(
                    vec![("Jane Doe".to_string(), 12), ("glpi".to_string(), 2)],
                    "glpi",
                    None,
                ),
                policy: SyncPolicy::default(),
            }
        }

        fn reconciler(&self) -> Reconciler<'_> {
            Reconciler::new(&self.jira, &self.glpi, &self.store, &self.users, &self.policy)
        }
    }

    fn jira_ticket(id: &str, title: &str, body: &str, updated: &str) -> LogicalTicket {
        LogicalTicket::from_raw_body(SourceSystem::Jira, id, title, body)
            .with_display_key(format!("OPS-{id}"))
            .with_reporter(Some("Jane Doe".to_string()))
            .with_last_modified(parse_jira_timestamp(updated))
    }

    fn glpi_ticket(id: &str, title: &str, body: &str, date_mod: &str) -> LogicalTicket {
        let utc = FixedOffset::east_opt(0).unwrap();
        LogicalTicket::from_raw_body(SourceSystem::Glpi, id, title, body)
            .with_owner(Some(12))
            .with_last_modified(parse_glpi_timestamp(date_mod, utc))
    }

    fn link(jira: &str, glpi: &str) -> Link {
        Link::new(jira, glpi, Some(SourceSystem::Jira))
    }

    #[tokio::test]
    async fn test_create_tags_and_links_counterpart() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN down", "Cannot connect", "2024-01-02T10:00:00.000+0000")],
            vec![],
            vec![],
        );
        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.status, SyncStatus::Success);

        let created = fx.glpi.get("1001").await.unwrap();
        assert_eq!(created.title, "VPN down");
        assert_eq!(created.body, "Cannot connect");
        assert_eq!(created.provenance, Some(ProvenanceTag::new(SourceSystem::Jira, "10001")));
        assert_eq!(created.owner_id, Some(12));

        assert_eq!(
            fx.store.snapshot().await,
            vec![Link::new("10001", "1001", Some(SourceSystem::Jira))]
        );
        assert_eq!(fx.store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_second_run_creates_nothing() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN down", "Cannot connect", "2024-01-02T10:00:00.000+0000")],
            vec![glpi_ticket("7", "Printer", "Paper jam", "2024-01-01 09:00:00")],
            vec![],
        );
        let first = fx.reconciler().run(SyncMode::Both).await.unwrap();
        assert_eq!(first.iter().map(|r| r.created).sum::<u64>(), 2);

        fx.jira.clear_calls().await;
        fx.glpi.clear_calls().await;
        let second = fx.reconciler().run(SyncMode::Both).await.unwrap();
        assert!(second.iter().all(|r| r.created == 0 && r.updated == 0));
        assert!(fx.jira.calls().await.is_empty());
        assert!(fx.glpi.calls().await.is_empty());
        assert_eq!(fx.store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_tagged_item_without_link_is_never_created() {
        let fx = Fixture::new(
            vec![],
            vec![glpi_ticket("7", "Copy", "Body\n\n[SRC:JIRA:999]", "2024-01-01 09:00:00")],
            vec![],
        );
        let report = fx.reconciler().reconcile_glpi_to_jira().await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.jira.create_count().await, 0);
    }

    #[tokio::test]
    async fn test_provenance_disabled_creates_untagged_copy() {
        let mut fx = Fixture::new(
            vec![],
            vec![glpi_ticket("7", "Copy", "Body\n\n[SRC:JIRA:999]", "2024-01-01 09:00:00")],
            vec![],
        );
        fx.policy.provenance_tags = false;
        fx.reconciler().reconcile_glpi_to_jira().await.unwrap();
        assert_eq!(
            fx.jira.calls().await,
            vec![SourceCall::Create(NewTicket {
                title: "Copy".into(),
                body: "Body".into(),
                owner_id: None,
            })]
        );
    }

    #[tokio::test]
    async fn test_entity_encoded_body_is_not_an_update() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "Bold", "<b>x</b>", "2024-01-02T10:00:00.000+0000")],
            vec![glpi_ticket("7", "Bold", "&lt;b&gt;x&lt;/b&gt;", "2024-01-01 10:00:00")],
            vec![link("10001", "7")],
        );
        let reports = fx.reconciler().run(SyncMode::Both).await.unwrap();
        assert!(reports.iter().all(|r| r.updated == 0 && r.skipped == 1));
        assert!(fx.glpi.calls().await.is_empty());
        assert!(fx.jira.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_newer_jira_updates_glpi() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "new body", "2024-01-02T10:00:00.000+0000")],
            vec![glpi_ticket("7", "VPN", "old body\n\n[SRC:JIRA:10001]", "2024-01-01 10:00:00")],
            vec![link("10001", "7")],
        );
        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            fx.glpi.calls().await,
            vec![SourceCall::Update(
                "7".into(),
                TicketUpdate {
                    title: None,
                    body: Some("new body\n\n[SRC:JIRA:10001]".into()),
                    owner_id: None,
                }
            )]
        );
        assert_eq!(fx.glpi.get("7").await.unwrap().body, "new body");
    }

    #[tokio::test]
    async fn test_older_jira_is_skipped_and_glpi_wins_its_own_pass() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "old body", "2024-01-01T10:00:00.000+0000")],
            vec![glpi_ticket("7", "VPN", "new body\n\n[SRC:JIRA:10001]", "2024-01-02 10:00:00")],
            vec![link("10001", "7")],
        );
        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.skipped, 1);
        assert!(fx.glpi.calls().await.is_empty());

        let report = fx.reconciler().reconcile_glpi_to_jira().await.unwrap();
        assert_eq!(report.updated, 1);
        // GLPI copy is not the origin, so Jira keeps its untagged body
        assert_eq!(
            fx.jira.calls().await,
            vec![SourceCall::Update(
                "10001".into(),
                TicketUpdate {
                    title: None,
                    body: Some("new body".into()),
                    owner_id: None,
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_not_newer() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "new body", "not a date")],
            vec![glpi_ticket("7", "VPN", "old body", "2024-01-01 10:00:00")],
            vec![link("10001", "7")],
        );
        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(report.updated, 0);
        assert!(fx.glpi.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_source_always_wins_ignores_timestamps() {
        let mut fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "mine", "2023-01-01T10:00:00.000+0000")],
            vec![glpi_ticket("7", "VPN", "theirs", "2024-01-01 10:00:00")],
            vec![link("10001", "7")],
        );
        fx.policy.recency = RecencyRule::SourceAlwaysWins;
        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(report.updated, 1);
    }

    #[tokio::test]
    async fn test_same_title_on_both_sides_creates_one_each() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "Printer", "Jira side", "2024-01-02T10:00:00.000+0000")],
            vec![glpi_ticket("7", "Printer", "GLPI side", "2024-01-02 10:00:00")],
            vec![],
        );
        fx.reconciler().run(SyncMode::Both).await.unwrap();

        assert_eq!(fx.jira.create_count().await, 1);
        assert_eq!(fx.glpi.create_count().await, 1);

        let map = CorrespondenceMap::from_links(fx.store.snapshot().await);
        assert_eq!(map.len(), 2);
        assert_eq!(map.counterpart(SourceSystem::Jira, "10001"), Some("1001"));
        assert_eq!(map.counterpart(SourceSystem::Glpi, "7"), Some("1001"));
    }

    #[tokio::test]
    async fn test_unknown_reporter_gets_default_owner() {
        let ticket = jira_ticket("10001", "Hi", "b", "2024-01-02T10:00:00.000+0000")
            .with_reporter(Some("Somebody New".to_string()));
        let fx = Fixture::new(vec![ticket], vec![], vec![]);
        fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(fx.glpi.get("1001").await.unwrap().owner_id, Some(2));
    }

    #[tokio::test]
    async fn test_owner_change_is_sent_to_glpi() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "same", "2024-01-02T10:00:00.000+0000")],
            vec![glpi_ticket("7", "VPN", "same", "2024-01-01 10:00:00").with_owner(Some(2))],
            vec![link("10001", "7")],
        );
        fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(
            fx.glpi.calls().await,
            vec![SourceCall::Update(
                "7".into(),
                TicketUpdate {
                    owner_id: Some(12),
                    ..TicketUpdate::default()
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let mut fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "b", "2024-01-02T10:00:00.000+0000")],
            vec![],
            vec![],
        );
        fx.policy.dry_run = true;
        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.created, 1);
        assert!(fx.glpi.calls().await.is_empty());
        assert_eq!(fx.store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_create_does_not_stop_the_pass() {
        let fx = Fixture::new(
            vec![
                jira_ticket("10001", "Broken", "b", "2024-01-02T10:00:00.000+0000"),
                jira_ticket("10002", "Fine", "b", "2024-01-02T10:00:00.000+0000"),
            ],
            vec![],
            vec![],
        );
        fx.glpi.fail_on("Broken").await;
        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.status, SyncStatus::PartialFailure);
        assert_eq!(fx.glpi.create_count().await, 2);
        assert_eq!(fx.store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_does_not_stop_the_pass() {
        let fx = Fixture::new(
            vec![
                jira_ticket("10001", "VPN", "new body", "2024-01-02T10:00:00.000+0000"),
                jira_ticket("10002", "Mail", "new body", "2024-01-02T10:00:00.000+0000"),
            ],
            vec![
                glpi_ticket("7", "VPN", "old body\n\n[SRC:JIRA:10001]", "2024-01-01 10:00:00"),
                glpi_ticket("8", "Mail", "old body\n\n[SRC:JIRA:10002]", "2024-01-01 10:00:00"),
            ],
            vec![link("10001", "7"), link("10002", "8")],
        );
        fx.glpi.fail_on("7").await;
        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.status, SyncStatus::PartialFailure);
        assert_eq!(fx.glpi.get("7").await.unwrap().body, "old body");
        assert_eq!(fx.glpi.get("8").await.unwrap().body, "new body");
        assert_eq!(fx.store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_its_link_and_continues() {
        let mut fx = Fixture::new(
            vec![
                jira_ticket("10001", "VPN", "b", "2024-01-02T10:00:00.000+0000"),
                jira_ticket("10002", "Mail", "b", "2024-01-02T10:00:00.000+0000"),
            ],
            vec![],
            vec![link("10001", "7"), link("10002", "8")],
        );
        fx.policy.allow_deletion = true;
        fx.jira.fail_on("10001").await;

        let report = fx.reconciler().reconcile_deletions().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 1);
        assert!(fx.jira.get("10001").await.is_some());
        assert!(fx.jira.get("10002").await.is_none());
        assert_eq!(fx.store.snapshot().await, vec![link("10001", "7")]);
    }

    #[tokio::test]
    async fn test_glpi_create_decodes_title() {
        let fx = Fixture::new(
            vec![],
            vec![glpi_ticket("7", "R&amp;D &lt;lab&gt;", "Body", "2024-01-01 09:00:00")],
            vec![],
        );
        fx.reconciler().reconcile_glpi_to_jira().await.unwrap();
        assert_eq!(
            fx.jira.calls().await,
            vec![SourceCall::Create(NewTicket {
                title: "R&D <lab>".into(),
                body: "Body\n\n[SRC:GLPI:7]".into(),
                owner_id: None,
            })]
        );

        // linked and otherwise identical, so neither side is touched again
        fx.jira.clear_calls().await;
        let reports = fx.reconciler().run(SyncMode::Both).await.unwrap();
        assert!(reports.iter().all(|r| r.updated == 0));
        assert!(fx.jira.calls().await.is_empty());
        assert!(fx.glpi.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_link_origin_beats_a_removed_tag() {
        // Jira copy of GLPI 7 whose [SRC:GLPI:7] line was deleted by hand
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "new body", "2024-01-02T10:00:00.000+0000")],
            vec![glpi_ticket("7", "VPN", "old body", "2024-01-01 10:00:00")],
            vec![Link::new("10001", "7", Some(SourceSystem::Glpi))],
        );
        fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(
            fx.glpi.calls().await,
            vec![SourceCall::Update(
                "7".into(),
                TicketUpdate {
                    body: Some("new body".into()),
                    ..TicketUpdate::default()
                }
            )]
        );
        assert_eq!(fx.glpi.get("7").await.unwrap().provenance, None);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_by_default() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "b", "2024-01-02T10:00:00.000+0000")],
            vec![],
            vec![],
        );
        fx.glpi.fail_fetches(true).await;
        let err = fx.reconciler().reconcile_jira_to_glpi().await.unwrap_err();
        assert!(matches!(err, Error::Sync { .. }));
        assert_eq!(fx.glpi.create_count().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_treated_as_empty() {
        let mut fx = Fixture::new(
            vec![
                jira_ticket("10001", "Linked", "b", "2024-01-02T10:00:00.000+0000"),
                jira_ticket("10002", "New", "b", "2024-01-02T10:00:00.000+0000"),
            ],
            vec![glpi_ticket("7", "Linked", "b", "2024-01-01 10:00:00")],
            vec![link("10001", "7")],
        );
        fx.policy.on_fetch_failure = FetchFailurePolicy::TreatAsEmpty;
        fx.glpi.fail_fetches(true).await;

        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);

        // the deletion pass refuses to work from a partial view
        fx.policy.allow_deletion = true;
        assert!(fx.reconciler().reconcile_deletions().await.is_err());
        assert!(fx.jira.get("10001").await.is_some());
    }

    #[tokio::test]
    async fn test_deletion_removes_jira_issue_when_allowed() {
        let mut fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "b", "2024-01-02T10:00:00.000+0000")],
            vec![],
            vec![link("10001", "7")],
        );
        fx.policy.allow_deletion = true;
        let report = fx.reconciler().reconcile_deletions().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(fx.jira.calls().await, vec![SourceCall::Delete("10001".into())]);
        assert!(fx.jira.get("10001").await.is_none());
        assert!(fx.store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_deletion_disabled_leaves_everything() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "b", "2024-01-02T10:00:00.000+0000")],
            vec![],
            vec![link("10001", "7")],
        );
        let report = fx.reconciler().reconcile_deletions().await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped, 1);
        assert!(fx.jira.calls().await.is_empty());
        assert!(fx.jira.get("10001").await.is_some());
        assert_eq!(fx.store.snapshot().await, vec![link("10001", "7")]);
    }

    #[tokio::test]
    async fn test_adapter_refusal_keeps_the_link() {
        let mut fx = Fixture::new(vec![], vec![], vec![link("10001", "7")]);
        fx.jira = MemorySource::new(SourceSystem::Jira)
            .with_tickets(vec![jira_ticket("10001", "VPN", "b", "2024-01-02T10:00:00.000+0000")])
            .with_deletion(false);
        fx.policy.allow_deletion = true;

        let report = fx.reconciler().reconcile_deletions().await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped, 1);
        assert!(fx.jira.get("10001").await.is_some());
        assert_eq!(fx.store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_deletion_of_glpi_side_and_orphaned_links() {
        let mut fx = Fixture::new(
            vec![],
            vec![glpi_ticket("7", "VPN", "b", "2024-01-01 10:00:00")],
            vec![link("10001", "7"), link("10002", "8")],
        );
        fx.policy.allow_deletion = true;
        let report = fx.reconciler().reconcile_deletions().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(fx.glpi.calls().await, vec![SourceCall::Delete("7".into())]);
        assert!(fx.jira.calls().await.is_empty());
        assert!(fx.store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_dangling_link_is_not_recreated() {
        let fx = Fixture::new(
            vec![jira_ticket("10001", "VPN", "b", "2024-01-02T10:00:00.000+0000")],
            vec![],
            vec![link("10001", "7")],
        );
        let report = fx.reconciler().reconcile_jira_to_glpi().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.glpi.create_count().await, 0);
    }
}
