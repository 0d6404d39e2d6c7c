//! The Jira <-> GLPI correspondence map and the stores that persist it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::ticket::SourceSystem;

/// One linked pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub jira_id: String,
    pub glpi_id: String,
    /// Side the pair was first created from, when known.
    pub origin: Option<SourceSystem>,
}

impl Link {
    pub fn new(jira_id: impl Into<String>, glpi_id: impl Into<String>, origin: Option<SourceSystem>) -> Self {
        Self {
            jira_id: jira_id.into(),
            glpi_id: glpi_id.into(),
            origin,
        }
    }

    pub fn id_on(&self, system: SourceSystem) -> &str {
        match system {
            SourceSystem::Jira => &self.jira_id,
            SourceSystem::Glpi => &self.glpi_id,
        }
    }
}

/// What to do when a new link would break the one-to-one mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictRule {
    /// Keep the existing link and refuse the new one.
    #[default]
    Reject,
    /// Drop whichever existing links collide and insert the new one.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConflict {
    pub existing: Link,
}

/// Bijective map keyed by Jira id with a reverse index on GLPI id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrespondenceMap {
    by_jira: BTreeMap<String, Link>,
    by_glpi: HashMap<String, String>,
}

impl CorrespondenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted links. Entries that would break the bijection
    /// are dropped with a warning; the first one seen wins.
    pub fn from_links(links: impl IntoIterator<Item = Link>) -> Self {
        let mut map = Self::new();
        for link in links {
            if let Err(conflict) = map.link(link.clone(), ConflictRule::Reject) {
                log::warn!(
                    "Ignoring link Jira {} <-> GLPI {}: conflicts with Jira {} <-> GLPI {}",
                    link.jira_id,
                    link.glpi_id,
                    conflict.existing.jira_id,
                    conflict.existing.glpi_id
                );
            }
        }
        map
    }

    /// Id of the counterpart of `id` on the other system.
    pub fn counterpart(&self, system: SourceSystem, id: &str) -> Option<&str> {
        match system {
            SourceSystem::Jira => self.by_jira.get(id).map(|l| l.glpi_id.as_str()),
            SourceSystem::Glpi => self.by_glpi.get(id).map(String::as_str),
        }
    }

    pub fn get_by_jira(&self, jira_id: &str) -> Option<&Link> {
        self.by_jira.get(jira_id)
    }

    /// Insert a link. Re-inserting an identical pair is a no-op.
    pub fn link(&mut self, link: Link, rule: ConflictRule) -> std::result::Result<(), LinkConflict> {
        let jira_clash = self
            .by_jira
            .get(&link.jira_id)
            .filter(|l| l.glpi_id != link.glpi_id)
            .cloned();
        let glpi_clash = self
            .by_glpi
            .get(&link.glpi_id)
            .filter(|j| **j != link.jira_id)
            .and_then(|j| self.by_jira.get(j))
            .cloned();

        if let Some(existing) = jira_clash.clone().or_else(|| glpi_clash.clone()) {
            if rule == ConflictRule::Reject {
                return Err(LinkConflict { existing });
            }
        }
        for stale in [jira_clash, glpi_clash].into_iter().flatten() {
            self.unlink_jira(&stale.jira_id);
        }

        self.by_glpi.insert(link.glpi_id.clone(), link.jira_id.clone());
        self.by_jira.insert(link.jira_id.clone(), link);
        Ok(())
    }

    pub fn unlink_jira(&mut self, jira_id: &str) -> Option<Link> {
        let link = self.by_jira.remove(jira_id)?;
        self.by_glpi.remove(&link.glpi_id);
        Some(link)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.by_jira.values()
    }

    pub fn len(&self) -> usize {
        self.by_jira.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_jira.is_empty()
    }
}

/// Persistence for the correspondence map. `save` always writes the whole
/// map.
#[async_trait]
pub trait CorrespondenceStore: Send + Sync {
    async fn load(&self) -> Result<CorrespondenceMap>;
    async fn save(&self, map: &CorrespondenceMap) -> Result<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    links: Mutex<Vec<Link>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links(links: Vec<Link>) -> Self {
        Self {
            links: Mutex::new(links),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Vec<Link> {
        self.links.lock().await.clone()
    }
}

#[async_trait]
impl CorrespondenceStore for MemoryStore {
    async fn load(&self) -> Result<CorrespondenceMap> {
        Ok(CorrespondenceMap::from_links(self.links.lock().await.clone()))
    }

    async fn save(&self, map: &CorrespondenceMap) -> Result<()> {
        *self.links.lock().await = map.links().cloned().collect();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Flat JSON file `{ "<jira id>": "<glpi id>" }`. GLPI ids written as
/// numbers by older tools are accepted on load.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Parse the flat record.
    pub fn parse(raw: &str) -> Result<Vec<Link>> {
        let record: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw)?;
        record
            .into_iter()
            .map(|(jira_id, value)| {
                let glpi_id = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    other => {
                        return Err(Error::Other(format!(
                            "invalid GLPI id for Jira {jira_id}: {other}"
                        )))
                    }
                };
                Ok(Link::new(jira_id, glpi_id, None))
            })
            .collect()
    }

    /// Render a map as the flat record.
    pub fn render(map: &CorrespondenceMap) -> Result<String> {
        let record: BTreeMap<&str, &str> = map
            .links()
            .map(|l| (l.jira_id.as_str(), l.glpi_id.as_str()))
            .collect();
        Ok(serde_json::to_string_pretty(&record)?)
    }
}

#[async_trait]
impl CorrespondenceStore for JsonFileStore {
    async fn load(&self) -> Result<CorrespondenceMap> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No map file at {}, starting empty", self.path.display());
                return Ok(CorrespondenceMap::new());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(CorrespondenceMap::new());
        }
        Ok(CorrespondenceMap::from_links(Self::parse(&raw)?))
    }

    async fn save(&self, map: &CorrespondenceMap) -> Result<()> {
        let rendered = Self::render(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, rendered).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
