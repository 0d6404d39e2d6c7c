use std::collections::HashMap;

use crate::text::normalize_identity;

/// Read-only lookup from a Jira reporter identity (display name or email)
/// to a GLPI user id.
#[derive(Debug, Clone, Default)]
pub struct UserIdentityMap {
    entries: HashMap<String, u64>,
    default_user_id: Option<u64>,
}

impl UserIdentityMap {
    /// Build the map. The default user is `default_user_id` when given,
    /// otherwise whatever `default_identity` maps to.
    pub fn new(
        entries: impl IntoIterator<Item = (String, u64)>,
        default_identity: &str,
        default_user_id: Option<u64>,
    ) -> Self {
        let entries: HashMap<String, u64> = entries
            .into_iter()
            .map(|(k, v)| (normalize_identity(&k), v))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        let default_user_id =
            default_user_id.or_else(|| entries.get(&normalize_identity(default_identity)).copied());
        if default_user_id.is_none() {
            log::warn!(
                "No GLPI user found for default identity '{default_identity}'; unmapped reporters will have no owner"
            );
        }
        Self {
            entries,
            default_user_id,
        }
    }

    /// Exact lookup, no fallback.
    pub fn get(&self, identity: &str) -> Option<u64> {
        self.entries.get(&normalize_identity(identity)).copied()
    }

    /// Resolve a reporter to a GLPI user id, falling back to the default
    /// user for unknown or missing identities.
    pub fn resolve(&self, identity: Option<&str>) -> Option<u64> {
        identity
            .and_then(|i| self.get(i))
            .or(self.default_user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
