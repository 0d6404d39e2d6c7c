//! Provenance tags: the marker a synced copy carries to name the ticket it
//! was created from.
//!
//! The written form is a single trailing line `[SRC:<JIRA|GLPI>:<id>]`.
//! Older copies may instead carry a free-text `GLPI-ID: 12` or
//! `Jira-ID: OPS-7` marker; those are still recognized on ingestion but
//! never written.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::ticket::SourceSystem;

static RE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[SRC:(JIRA|GLPI):([A-Za-z0-9_.\-]+)\]").unwrap());
static RE_LEGACY_GLPI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bGLPI-ID:\s*(\d+)").unwrap());
static RE_LEGACY_JIRA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bJira-ID:\s*([A-Z][A-Z0-9_]*-\d+|\d+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProvenanceTag {
    /// System the tagged ticket was copied from.
    pub system: SourceSystem,
    pub remote_id: String,
}

impl ProvenanceTag {
    pub fn new(system: SourceSystem, remote_id: impl Into<String>) -> Self {
        Self {
            system,
            remote_id: remote_id.into(),
        }
    }

    /// Split a stored body into the user-visible text and its provenance
    /// tag, if any. Every tag occurrence is removed; the first one wins.
    pub fn extract(raw: &str) -> (String, Option<ProvenanceTag>) {
        let mut found = RE_TAG.captures(raw).and_then(|caps| {
            let system = caps[1].parse::<SourceSystem>().ok()?;
            Some(ProvenanceTag::new(system, &caps[2]))
        });
        let mut body = RE_TAG.replace_all(raw, "").into_owned();

        if found.is_none() {
            if let Some(caps) = RE_LEGACY_GLPI.captures(&body) {
                found = Some(ProvenanceTag::new(SourceSystem::Glpi, &caps[1]));
            } else if let Some(caps) = RE_LEGACY_JIRA.captures(&body) {
                found = Some(ProvenanceTag::new(SourceSystem::Jira, &caps[1]));
            }
            if found.is_some() {
                body = RE_LEGACY_GLPI.replace_all(&body, "").into_owned();
                body = RE_LEGACY_JIRA.replace_all(&body, "").into_owned();
            }
        }

        (body.trim_end().to_string(), found)
    }

    /// Append this tag to `body` as its last line.
    pub fn wrap(&self, body: &str) -> String {
        let body = body.trim_end();
        if body.is_empty() {
            self.to_string()
        } else {
            format!("{body}\n\n{self}")
        }
    }
}

impl fmt::Display for ProvenanceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[SRC:{}:{}]", self.system.tag(), self.remote_id)
    }
}

/// Wrap `body` with `tag` when there is one.
pub fn wrap_body(body: &str, tag: Option<&ProvenanceTag>) -> String {
    match tag {
        Some(tag) => tag.wrap(body),
        None => body.trim_end().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_then_extract() {
        let tag = ProvenanceTag::new(SourceSystem::Jira, "10042");
        let wrapped = tag.wrap("Printer on floor 3 is jammed\n");
        assert_eq!(wrapped, "Printer on floor 3 is jammed\n\n[SRC:JIRA:10042]");

        let (body, found) = ProvenanceTag::extract(&wrapped);
        assert_eq!(body, "Printer on floor 3 is jammed");
        assert_eq!(found, Some(tag));
    }

    #[test]
    fn test_wrap_empty_body() {
        let tag = ProvenanceTag::new(SourceSystem::Glpi, "7");
        assert_eq!(tag.wrap("  "), "[SRC:GLPI:7]");
    }

    #[test]
    fn test_extract_without_tag() {
        let (body, found) = ProvenanceTag::extract("plain text [not a tag]");
        assert_eq!(body, "plain text [not a tag]");
        assert!(found.is_none());
    }

    #[test]
    fn test_extract_legacy_markers() {
        let (body, found) = ProvenanceTag::extract("VPN is down\nGLPI-ID: 381");
        assert_eq!(body, "VPN is down");
        assert_eq!(found, Some(ProvenanceTag::new(SourceSystem::Glpi, "381")));

        let (_, found) = ProvenanceTag::extract("jira-id: OPS-12\nbody");
        assert_eq!(found, Some(ProvenanceTag::new(SourceSystem::Jira, "OPS-12")));
    }

    #[test]
    fn test_structured_tag_wins_over_legacy() {
        let (body, found) = ProvenanceTag::extract("GLPI-ID: 5 mentioned\n\n[SRC:JIRA:9]");
        assert_eq!(found, Some(ProvenanceTag::new(SourceSystem::Jira, "9")));
        assert_eq!(body, "GLPI-ID: 5 mentioned");
    }

    #[test]
    fn test_wrap_body_without_tag() {
        assert_eq!(wrap_body("text\n", None), "text");
    }
}
