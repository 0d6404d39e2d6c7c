//! Pairs each item with its counterpart on the other system.

use std::collections::HashMap;

use crate::correspondence::CorrespondenceMap;
use crate::ticket::LogicalTicket;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome<'a> {
    /// Linked and the counterpart is in the current snapshot.
    Matched(&'a LogicalTicket),
    /// Linked, but the counterpart has disappeared. Left to the delete pass.
    Dangling { counterpart_id: String },
    /// No link. `originated_elsewhere` is set when the item carries a
    /// provenance tag naming the other system.
    Unmatched { originated_elsewhere: bool },
}

/// Snapshot of the other system indexed by remote id.
pub struct Counterparts<'a> {
    by_id: HashMap<&'a str, &'a LogicalTicket>,
}

impl<'a> Counterparts<'a> {
    pub fn new(tickets: &'a [LogicalTicket]) -> Self {
        Self {
            by_id: tickets.iter().map(|t| (t.remote_id.as_str(), t)).collect(),
        }
    }

    pub fn get(&self, remote_id: &str) -> Option<&'a LogicalTicket> {
        self.by_id.get(remote_id).copied()
    }
}

/// Classify `item` against the fetched `counterparts` of the other system.
/// With `honor_provenance` off, a tagged item without a link counts as new.
pub fn classify<'a>(
    item: &LogicalTicket,
    counterparts: &Counterparts<'a>,
    map: &CorrespondenceMap,
    honor_provenance: bool,
) -> MatchOutcome<'a> {
    if let Some(counterpart_id) = map.counterpart(item.system, &item.remote_id) {
        return match counterparts.get(counterpart_id) {
            Some(counterpart) => MatchOutcome::Matched(counterpart),
            None => MatchOutcome::Dangling {
                counterpart_id: counterpart_id.to_string(),
            },
        };
    }

    let originated_elsewhere = honor_provenance
        && item
            .provenance
            .as_ref()
            .is_some_and(|tag| tag.system == item.system.opposite());
    MatchOutcome::Unmatched {
        originated_elsewhere,
    }
}
