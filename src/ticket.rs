use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provenance::ProvenanceTag;
use crate::text;

/// The system a ticket lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    Jira,
    Glpi,
}

impl SourceSystem {
    pub fn opposite(self) -> Self {
        match self {
            SourceSystem::Jira => SourceSystem::Glpi,
            SourceSystem::Glpi => SourceSystem::Jira,
        }
    }

    /// Upper-case token used inside provenance tags and persisted link rows.
    pub fn tag(self) -> &'static str {
        match self {
            SourceSystem::Jira => "JIRA",
            SourceSystem::Glpi => "GLPI",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSystem::Jira => f.write_str("Jira"),
            SourceSystem::Glpi => f.write_str("GLPI"),
        }
    }
}

impl FromStr for SourceSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jira" => Ok(SourceSystem::Jira),
            "glpi" => Ok(SourceSystem::Glpi),
            other => Err(format!("unknown system: {other}")),
        }
    }
}

/// A ticket from either system, reduced to the fields the reconciler
/// compares and writes.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalTicket {
    pub system: SourceSystem,
    pub remote_id: String,
    /// Human-facing key (Jira `OPS-12`); GLPI tickets reuse the id.
    pub display_key: String,
    pub title: String,
    /// Body as stored by the source system, provenance tag removed.
    /// GLPI content is still HTML-entity-encoded here.
    pub body: String,
    pub reporter_identity: Option<String>,
    /// GLPI requester (`users_id_recipient`). Always `None` for Jira.
    pub owner_id: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub provenance: Option<ProvenanceTag>,
}

impl LogicalTicket {
    /// Build a ticket from a raw stored body, splitting off any provenance
    /// tag so it is parsed exactly once.
    pub fn from_raw_body(
        system: SourceSystem,
        remote_id: impl Into<String>,
        title: impl Into<String>,
        raw_body: &str,
    ) -> Self {
        let (body, provenance) = ProvenanceTag::extract(raw_body);
        let remote_id = remote_id.into();
        Self {
            system,
            display_key: remote_id.clone(),
            remote_id,
            title: title.into(),
            body,
            reporter_identity: None,
            owner_id: None,
            last_modified: None,
            provenance,
        }
    }

    pub fn with_display_key(mut self, key: impl Into<String>) -> Self {
        self.display_key = key.into();
        self
    }

    pub fn with_reporter(mut self, identity: Option<String>) -> Self {
        self.reporter_identity = identity;
        self
    }

    pub fn with_owner(mut self, owner_id: Option<u64>) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn with_last_modified(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_modified = at;
        self
    }

    /// Body with GLPI entity encoding undone, ready to be compared or
    /// written to a system that stores plain text.
    pub fn plain_body(&self) -> String {
        match self.system {
            SourceSystem::Glpi => text::decode_entities(&self.body),
            SourceSystem::Jira => self.body.clone(),
        }
    }

    /// Title with GLPI entity encoding undone.
    pub fn plain_title(&self) -> String {
        match self.system {
            SourceSystem::Glpi => text::decode_entities(&self.title),
            SourceSystem::Jira => self.title.clone(),
        }
    }

    /// The tag a counterpart of this ticket should carry if this ticket is
    /// where the pair originated.
    pub fn origin_tag(&self) -> ProvenanceTag {
        ProvenanceTag::new(self.system, self.remote_id.clone())
    }
}

/// Payload for creating a counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub title: String,
    pub body: String,
    pub owner_id: Option<u64>,
}

/// Partial update; `None` fields are left untouched on the remote side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub owner_id: Option<u64>,
}
