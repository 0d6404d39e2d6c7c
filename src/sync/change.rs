//! Field comparison between a ticket and its counterpart.

use crate::identity::UserIdentityMap;
use crate::text::normalize_body;
use crate::ticket::{LogicalTicket, SourceSystem};

/// Which fields of the target differ from the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldDiff {
    pub title: bool,
    pub body: bool,
    /// Only ever set when the target is GLPI.
    pub owner: bool,
}

impl FieldDiff {
    pub fn any(&self) -> bool {
        self.title || self.body || self.owner
    }
}

/// Owner the target should carry for `source`, if the target system has
/// an owner field at all. A Jira issue that is itself a copy of a GLPI
/// ticket does not own its counterpart's requester.
pub fn desired_owner(source: &LogicalTicket, users: &UserIdentityMap) -> Option<u64> {
    let copied_from_glpi = source
        .provenance
        .as_ref()
        .is_some_and(|tag| tag.system == SourceSystem::Glpi);
    match source.system.opposite() {
        SourceSystem::Glpi if !copied_from_glpi => users.resolve(source.reporter_identity.as_deref()),
        _ => None,
    }
}

/// Compare `source` against its counterpart `target`.
///
/// Titles and bodies are compared after entity decoding, bodies also after
/// whitespace normalization with provenance tags already stripped, so
/// encoded GLPI text and the same text in Jira compare equal. An owner the identity map cannot
/// resolve never counts as a change.
pub fn diff(source: &LogicalTicket, target: &LogicalTicket, users: &UserIdentityMap) -> FieldDiff {
    let owner = match desired_owner(source, users) {
        Some(wanted) if target.system == SourceSystem::Glpi => target.owner_id != Some(wanted),
        _ => false,
    };
    FieldDiff {
        title: source.plain_title().trim() != target.plain_title().trim(),
        body: normalize_body(&source.plain_body()) != normalize_body(&target.plain_body()),
        owner,
    }
}

pub fn changed(source: &LogicalTicket, target: &LogicalTicket, users: &UserIdentityMap) -> bool {
    diff(source, target, users).any()
}
