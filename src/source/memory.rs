use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::TicketSource;
use crate::error::{Error, Result};
use crate::provenance::ProvenanceTag;
use crate::ticket::{LogicalTicket, NewTicket, SourceSystem, TicketUpdate};

/// A call recorded by [`MemorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    Create(NewTicket),
    Update(String, TicketUpdate),
    Delete(String),
}

#[derive(Debug, Default)]
struct State {
    tickets: Vec<LogicalTicket>,
    calls: Vec<SourceCall>,
    next_id: u64,
    failing_ids: HashSet<String>,
    fail_fetch: bool,
}

/// In-memory ticket source. Created tickets get sequential ids and are
/// visible to later fetches, the way a real remote would behave.
#[derive(Debug)]
pub struct MemorySource {
    system: SourceSystem,
    allow_deletion: bool,
    now: DateTime<Utc>,
    state: Mutex<State>,
}

impl MemorySource {
    pub fn new(system: SourceSystem) -> Self {
        Self {
            system,
            allow_deletion: true,
            now: Utc::now(),
            state: Mutex::new(State {
                next_id: 1000,
                ..State::default()
            }),
        }
    }

    pub fn with_tickets(mut self, tickets: Vec<LogicalTicket>) -> Self {
        self.state.get_mut().tickets = tickets;
        self
    }

    pub fn with_deletion(mut self, allow: bool) -> Self {
        self.allow_deletion = allow;
        self
    }

    /// Make create/update/delete on `remote_id` fail. For creates, the id
    /// is matched against the new ticket's title.
    pub async fn fail_on(&self, remote_id: &str) {
        self.state.lock().await.failing_ids.insert(remote_id.to_string());
    }

    pub async fn fail_fetches(&self, fail: bool) {
        self.state.lock().await.fail_fetch = fail;
    }

    pub async fn get(&self, remote_id: &str) -> Option<LogicalTicket> {
        self.state
            .lock()
            .await
            .tickets
            .iter()
            .find(|t| t.remote_id == remote_id)
            .cloned()
    }

    pub async fn calls(&self) -> Vec<SourceCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    pub async fn create_count(&self) -> usize {
        self.calls()
            .await
            .iter()
            .filter(|c| matches!(c, SourceCall::Create(_)))
            .count()
    }

    fn failure(&self, what: &str, id: &str) -> Error {
        Error::api(self.system, format!("{what} {id} failed"))
    }
}

#[async_trait]
impl TicketSource for MemorySource {
    fn system(&self) -> SourceSystem {
        self.system
    }

    async fn fetch_all(&self) -> Result<Vec<LogicalTicket>> {
        let state = self.state.lock().await;
        if state.fail_fetch {
            return Err(Error::api(self.system, "fetch failed"));
        }
        Ok(state.tickets.clone())
    }

    async fn create(&self, ticket: &NewTicket) -> Result<String> {
        let mut state = self.state.lock().await;
        state.calls.push(SourceCall::Create(ticket.clone()));
        if state.failing_ids.contains(&ticket.title) {
            return Err(self.failure("create", &ticket.title));
        }
        state.next_id += 1;
        let id = state.next_id.to_string();
        let (body, provenance) = ProvenanceTag::extract(&ticket.body);
        state.tickets.push(LogicalTicket {
            system: self.system,
            remote_id: id.clone(),
            display_key: id.clone(),
            title: ticket.title.clone(),
            body,
            reporter_identity: None,
            owner_id: ticket.owner_id,
            last_modified: Some(self.now),
            provenance,
        });
        Ok(id)
    }

    async fn update(&self, remote_id: &str, update: &TicketUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(SourceCall::Update(remote_id.to_string(), update.clone()));
        if state.failing_ids.contains(remote_id) {
            return Err(self.failure("update", remote_id));
        }
        let now = self.now;
        let ticket = state
            .tickets
            .iter_mut()
            .find(|t| t.remote_id == remote_id)
            .ok_or_else(|| Error::NotFound(format!("{} ticket {remote_id}", self.system)))?;
        if let Some(title) = &update.title {
            ticket.title = title.clone();
        }
        if let Some(body) = &update.body {
            let (body, provenance) = ProvenanceTag::extract(body);
            ticket.body = body;
            ticket.provenance = provenance;
        }
        if update.owner_id.is_some() {
            ticket.owner_id = update.owner_id;
        }
        ticket.last_modified = Some(now);
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<bool> {
        if !self.allow_deletion {
            log::warn!("Deletion disabled - skipping deletion of {} ticket {remote_id}", self.system);
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        state.calls.push(SourceCall::Delete(remote_id.to_string()));
        if state.failing_ids.contains(remote_id) {
            return Err(self.failure("delete", remote_id));
        }
        state.tickets.retain(|t| t.remote_id != remote_id);
        Ok(true)
    }
}
